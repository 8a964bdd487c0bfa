//! Error log entries written to `error_logs`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded failure (or recovery) of an external dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    /// Failing dependency, e.g. "store" or "openai"
    pub kind: String,
    pub message: String,
    /// Free-form JSON describing the operation
    pub context: serde_json::Value,
    /// True when a later attempt succeeded
    pub recovered: bool,
    pub recovery_attempts: u32,
}

impl ErrorLogEntry {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: kind.into(),
            message: message.into(),
            context,
            recovered: false,
            recovery_attempts: 0,
        }
    }

    pub fn with_attempts(mut self, attempts: u32, recovered: bool) -> Self {
        self.recovery_attempts = attempts;
        self.recovered = recovered;
        self
    }
}
