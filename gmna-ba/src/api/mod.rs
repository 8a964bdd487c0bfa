//! HTTP API handlers for gmna-ba
//!
//! REST endpoints for batch control and stored audits, plus an SSE stream of
//! batch events.

pub mod audits;
pub mod backups;
pub mod batch;
pub mod errors;
pub mod health;
pub mod sse;

pub use audits::audit_routes;
pub use backups::backup_routes;
pub use batch::batch_routes;
pub use errors::error_routes;
pub use health::health_routes;
pub use sse::batch_event_stream;
