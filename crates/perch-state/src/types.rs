//! Domain types persisted by the local target backend.

use serde::{Deserialize, Serialize};

/// A provisioned deployment target.
///
/// Provisioning publishes a baseline revision and installs the initial
/// routing rule (baseline at 100%), standing in for the out-of-band
/// infrastructure that real deployments rely on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetRecord {
    pub name: String,
    /// The revision installed at provisioning time.
    pub baseline_revision_id: String,
    /// Health alarms watched during deployments of this target.
    pub alarm_names: Vec<String>,
    /// Unix timestamp (seconds) when the target was provisioned.
    pub created_at: u64,
}
