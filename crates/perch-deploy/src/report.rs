//! Per-attempt report artifact.
//!
//! A self-contained JSON document built from the ledger: the attempt as
//! replayed plus every health sample taken. Written once per attempt
//! whatever the outcome, so the evidence for a rollback survives the
//! process that made the call.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

use perch_core::error::{DeployError, DeployResult};
use perch_core::types::{DeploymentAttempt, HealthSample, epoch_secs};
use perch_ledger::Ledger;

use crate::machine::ledger_err;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeploymentReport {
    pub attempt: DeploymentAttempt,
    pub samples: Vec<HealthSample>,
    /// Unix epoch seconds when the report was assembled.
    pub generated_at: u64,
}

impl DeploymentReport {
    /// Assemble the report for an attempt from its ledger records.
    pub fn from_ledger(ledger: &Ledger, attempt_id: &str) -> DeployResult<Self> {
        let attempt = ledger
            .get_attempt(attempt_id)
            .map_err(ledger_err)?
            .ok_or_else(|| DeployError::Setup(format!("unknown attempt: {attempt_id}")))?;
        let samples = ledger.samples(attempt_id).map_err(ledger_err)?;
        Ok(Self {
            attempt,
            samples,
            generated_at: epoch_secs(),
        })
    }

    /// Write the report as `{dir}/{attempt_id}.json`, returning the path.
    pub fn write_to_dir(&self, dir: &Path) -> DeployResult<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating report dir {}", dir.display()))?;
        let path = dir.join(format!("{}.json", self.attempt.attempt_id));
        let json = serde_json::to_string_pretty(self)
            .context("serializing deployment report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("writing report {}", path.display()))?;
        info!(attempt_id = %self.attempt.attempt_id, path = %path.display(), "report written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use perch_core::types::{
        AttemptStatus, DeployOptions, PhasePlan, PhaseStep,
    };
    use perch_ledger::LedgerEvent;

    fn seeded_ledger() -> (Ledger, String) {
        let ledger = Ledger::open_in_memory().unwrap();
        let attempt = DeploymentAttempt {
            attempt_id: "att-aabbccddeeff".to_string(),
            target: "api".to_string(),
            previous_revision_id: "1".to_string(),
            new_revision_id: "2".to_string(),
            plan: PhasePlan::new(vec![PhaseStep {
                weight_percent: 100,
                hold_secs: 0,
            }]),
            alarm_names: Vec::new(),
            options: DeployOptions::default(),
            current_phase_index: 0,
            status: AttemptStatus::Pending,
            started_at: 1700000000,
            ended_at: None,
            termination_reason: None,
        };
        ledger.begin_attempt(&attempt).unwrap();
        ledger
            .append(
                &attempt.attempt_id,
                LedgerEvent::HealthSample {
                    sample: HealthSample::new(1700000001, Default::default()),
                },
            )
            .unwrap();
        ledger
            .append(&attempt.attempt_id, LedgerEvent::Completed)
            .unwrap();
        (ledger, attempt.attempt_id)
    }

    #[test]
    fn report_mirrors_the_ledger() {
        let (ledger, attempt_id) = seeded_ledger();
        let report = DeploymentReport::from_ledger(&ledger, &attempt_id).unwrap();
        assert_eq!(report.attempt.status, AttemptStatus::Completed);
        assert_eq!(report.samples.len(), 1);
        assert!(report.generated_at >= 1700000000);
    }

    #[test]
    fn unknown_attempt_is_setup() {
        let ledger = Ledger::open_in_memory().unwrap();
        let err = DeploymentReport::from_ledger(&ledger, "att-nope").unwrap_err();
        assert!(matches!(err, DeployError::Setup(_)));
    }

    #[test]
    fn report_round_trips_through_disk() {
        let (ledger, attempt_id) = seeded_ledger();
        let report = DeploymentReport::from_ledger(&ledger, &attempt_id).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = report.write_to_dir(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "att-aabbccddeeff.json");

        let raw = std::fs::read_to_string(&path).unwrap();
        let back: DeploymentReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.attempt.attempt_id, attempt_id);
        assert_eq!(back.samples.len(), 1);
    }
}
