//! Error taxonomy for deployment operations.

use thiserror::Error;

/// Result type alias for deployment operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Everything that can go wrong with a deployment, by operator-visible
/// category. The categories map to distinct process exit codes and are never
/// collapsed into one another.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The attempt never started: invalid plan, unknown target, publish
    /// failure. No state was mutated and no ledger entry was written.
    #[error("setup failed: {0}")]
    Setup(String),

    /// Another non-terminal attempt already owns this target.
    #[error("deployment already in flight for {target} (attempt {attempt_id})")]
    Conflict { target: String, attempt_id: String },

    /// Health degraded (or the budget ran out) and traffic was restored to
    /// the previous revision.
    #[error("deployment {attempt_id} rolled back: {reason}")]
    DegradedRollback { attempt_id: String, reason: String },

    /// Traffic restoration could not be verified. Manual intervention
    /// required; never reported as a successful rollback.
    #[error("rollback of {attempt_id} could not be verified: {reason}")]
    RollbackFailed { attempt_id: String, reason: String },

    /// The operator cancelled the attempt.
    #[error("deployment {attempt_id} aborted by operator")]
    Aborted { attempt_id: String },

    /// The audit ledger refused a read or write.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Infrastructure failure outside the categories above.
    #[error(transparent)]
    Infra(#[from] anyhow::Error),
}

impl DeployError {
    /// Process exit code for the CLI. Success is 0; internal errors are 1;
    /// each operator-facing category keeps its own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::Setup(_) => 2,
            DeployError::Conflict { .. } => 3,
            DeployError::DegradedRollback { .. } => 4,
            DeployError::RollbackFailed { .. } => 5,
            DeployError::Aborted { .. } => 6,
            DeployError::Ledger(_) | DeployError::Infra(_) => 1,
        }
    }

    /// The attempt this error terminated, when there is one. Lets callers
    /// pull the final attempt record out of the ledger after a failed run.
    pub fn attempt_id(&self) -> Option<&str> {
        match self {
            DeployError::DegradedRollback { attempt_id, .. }
            | DeployError::RollbackFailed { attempt_id, .. }
            | DeployError::Aborted { attempt_id } => Some(attempt_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_stay_distinct() {
        let errors = [
            DeployError::Setup("bad plan".into()),
            DeployError::Conflict {
                target: "api".into(),
                attempt_id: "att-1".into(),
            },
            DeployError::DegradedRollback {
                attempt_id: "att-1".into(),
                reason: "alarm".into(),
            },
            DeployError::RollbackFailed {
                attempt_id: "att-1".into(),
                reason: "verify".into(),
            },
            DeployError::Aborted {
                attempt_id: "att-1".into(),
            },
        ];
        let codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert_eq!(codes, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn internal_errors_exit_1() {
        assert_eq!(DeployError::Ledger("io".into()).exit_code(), 1);
        assert_eq!(
            DeployError::Infra(anyhow::anyhow!("socket closed")).exit_code(),
            1
        );
    }

    #[test]
    fn attempt_id_only_for_terminal_outcomes() {
        let rolled = DeployError::DegradedRollback {
            attempt_id: "att-1".into(),
            reason: "alarm".into(),
        };
        assert_eq!(rolled.attempt_id(), Some("att-1"));
        assert_eq!(DeployError::Setup("bad plan".into()).attempt_id(), None);
        assert_eq!(DeployError::Ledger("io".into()).attempt_id(), None);
    }

    #[test]
    fn conflict_names_the_holder() {
        let err = DeployError::Conflict {
            target: "api".into(),
            attempt_id: "att-9".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("api"));
        assert!(msg.contains("att-9"));
    }
}
