//! # GMNA Common Library
//!
//! Shared code for the GMN audit services:
//! - Error type shared across crates
//! - Configuration loading and root folder resolution
//! - Event types (AuditEvent enum) and the EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
