//! Ledger records and the deployment event vocabulary.

use perch_core::types::{AttemptStatus, DeploymentAttempt, HealthSample};

/// One appended record in an attempt's event sequence.
///
/// Serializes as a self-contained JSON document; the ledger stores one such
/// document per event and never rewrites it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LedgerEntry {
    pub attempt_id: String,
    /// Position in the attempt's sequence, starting at 0.
    pub sequence: u32,
    /// Unix epoch seconds when the event was appended.
    pub timestamp: u64,
    pub event: LedgerEvent,
}

/// What happened to a deployment attempt.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(
    tag = "event_type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum LedgerEvent {
    /// Attempt created; carries the full attempt snapshot that replay seeds
    /// from. Always sequence 0.
    Started { attempt: DeploymentAttempt },
    /// Traffic was shifted to `canary_weight` for phase `phase_index`.
    PhaseAdvanced { phase_index: u32, canary_weight: u32 },
    /// One health poll of the watched alarms.
    HealthSample { sample: HealthSample },
    /// Traffic was restored to the previous revision.
    RolledBack { reason: String },
    /// The new revision took 100% of traffic.
    Completed,
    /// The operator cancelled the attempt.
    Aborted { reason: String },
    /// The attempt ended in a state requiring manual intervention.
    Failed { reason: String },
}

impl LedgerEvent {
    /// Terminal events close an attempt; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        self.terminal_status().is_some()
    }

    /// The attempt status a terminal event pins, if this event is terminal.
    pub fn terminal_status(&self) -> Option<AttemptStatus> {
        match self {
            LedgerEvent::RolledBack { .. } => Some(AttemptStatus::RolledBack),
            LedgerEvent::Completed => Some(AttemptStatus::Completed),
            LedgerEvent::Aborted { .. } => Some(AttemptStatus::Aborted),
            LedgerEvent::Failed { .. } => Some(AttemptStatus::Failed),
            LedgerEvent::Started { .. }
            | LedgerEvent::PhaseAdvanced { .. }
            | LedgerEvent::HealthSample { .. } => None,
        }
    }

    /// The reason string carried by terminal events, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            LedgerEvent::RolledBack { reason }
            | LedgerEvent::Aborted { reason }
            | LedgerEvent::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}
