//! Event types for the GMNA event system
//!
//! Provides the batch audit event definitions and the EventBus that carries
//! them to SSE clients and other in-process listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Status reported with each progress update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Completed,
    Error,
}

/// Per-item progress of a running batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// 1-based index of the item being processed
    pub current: usize,
    /// Number of items in the batch
    pub total: usize,
    /// Rounded percentage (0-100)
    pub percentage: u8,
    /// Name of the business being processed
    pub current_item: String,
    pub status: BatchStatus,
}

impl BatchProgress {
    /// Progress for item `current` (1-based) out of `total`
    pub fn processing(current: usize, total: usize, current_item: impl Into<String>) -> Self {
        Self {
            current,
            total,
            percentage: percentage(current, total),
            current_item: current_item.into(),
            status: BatchStatus::Processing,
        }
    }

    /// Final update emitted once every item has been processed
    pub fn completed(total: usize) -> Self {
        Self {
            current: total,
            total,
            percentage: 100,
            current_item: "Concluído".to_string(),
            status: BatchStatus::Completed,
        }
    }
}

fn percentage(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (current as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// GMNA event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuditEvent {
    /// A batch was accepted and its background task started
    BatchStarted {
        session_id: Uuid,
        total: usize,
        /// Rows dropped by the input parser
        skipped_rows: usize,
        timestamp: DateTime<Utc>,
    },

    /// Emitted before each item is sent to the auditor
    BatchProgressUpdate {
        session_id: Uuid,
        progress: BatchProgress,
        timestamp: DateTime<Utc>,
    },

    /// Every item processed
    BatchCompleted {
        session_id: Uuid,
        results: usize,
        /// Store identifier; None when the results only reached the local backup
        audit_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// Stopped by the operator before the last item
    BatchInterrupted {
        session_id: Uuid,
        results: usize,
        total: usize,
        audit_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// The batch task itself failed (not a per-item failure)
    BatchFailed {
        session_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Store writes were exhausted; results were written to a local snapshot
    EmergencyBackupCreated {
        snapshot_key: String,
        results: usize,
        timestamp: DateTime<Utc>,
    },

    /// Local snapshots were replayed into the store
    EmergencyBackupsReplayed {
        replayed: usize,
        remaining: usize,
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::BatchStarted { .. } => "BatchStarted",
            AuditEvent::BatchProgressUpdate { .. } => "BatchProgressUpdate",
            AuditEvent::BatchCompleted { .. } => "BatchCompleted",
            AuditEvent::BatchInterrupted { .. } => "BatchInterrupted",
            AuditEvent::BatchFailed { .. } => "BatchFailed",
            AuditEvent::EmergencyBackupCreated { .. } => "EmergencyBackupCreated",
            AuditEvent::EmergencyBackupsReplayed { .. } => "EmergencyBackupsReplayed",
        }
    }

    /// Whether the event ends a batch session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuditEvent::BatchCompleted { .. }
                | AuditEvent::BatchInterrupted { .. }
                | AuditEvent::BatchFailed { .. }
        )
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use gmna_common::events::{AuditEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(AuditEvent::EmergencyBackupsReplayed {
///     replayed: 1,
///     remaining: 0,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AuditEvent>,
}

impl EventBus {
    /// Creates a new EventBus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AuditEvent) {
        let _ = self.tx.send(event);
    }
}
