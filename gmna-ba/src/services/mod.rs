//! Service modules for the batch audit workflow
//!
//! Input parsing → per-business audit → batch loop → persistence → export.

pub mod auditor;
pub mod batch_controller;
pub mod export;
pub mod input_parser;
pub mod openai_client;
pub mod persistence;

pub use auditor::{AuditError, Auditor};
pub use batch_controller::{BatchController, ProgressObserver};
pub use export::{ExportError, ExportFormat};
pub use input_parser::{parse_file, InputError, ParsedInput};
pub use openai_client::OpenAiAuditor;
pub use persistence::{DurableSink, LocalBackupLog, PersistenceService, ReplayReport, StoreSink};
