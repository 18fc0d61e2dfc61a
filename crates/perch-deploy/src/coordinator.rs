//! Deployment coordinator.
//!
//! Owns attempt setup (validation, target resolution, publish, the atomic
//! single-flight gate), crash resumption, and manual rollback. Phase
//! execution itself lives in [`Machine`].

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{error, info, warn};

use perch_core::error::{DeployError, DeployResult};
use perch_core::traits::{RevisionPublisher, TrafficRouter};
use perch_core::types::{
    AttemptStatus, DeployOptions, DeploymentAttempt, PhasePlan, RoutingRule, epoch_secs,
};
use perch_health::HealthEvaluator;
use perch_ledger::{Ledger, LedgerEvent};

use crate::machine::{Machine, ledger_err};
use crate::retry::{MAX_ATTEMPTS, with_backoff};
use crate::rollback::RollbackController;

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Everything needed to start one deployment attempt.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub target: String,
    pub artifact_ref: String,
    pub plan: PhasePlan,
    /// Alarms gating the holds; snapshotted into the attempt.
    pub alarm_names: Vec<String>,
    pub options: DeployOptions,
}

/// Entry point for deployments against one ledger and substrate.
#[derive(Clone)]
pub struct Coordinator {
    ledger: Ledger,
    publisher: Arc<dyn RevisionPublisher>,
    router: Arc<dyn TrafficRouter>,
    evaluator: HealthEvaluator,
    backoff_base: Duration,
}

impl Coordinator {
    pub fn new(
        ledger: Ledger,
        publisher: Arc<dyn RevisionPublisher>,
        router: Arc<dyn TrafficRouter>,
        evaluator: HealthEvaluator,
    ) -> Self {
        Self {
            ledger,
            publisher,
            router,
            evaluator,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// Override the retry base delay (tests use millisecond delays).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Validate, resolve, publish, and record a new attempt.
    ///
    /// Fails fast with `Setup` before the `STARTED` record on any validation,
    /// resolution, or publish problem; publishing ahead of the atomic gate is
    /// safe because publish is idempotent. The ledger's `begin_attempt` is
    /// the authoritative single-flight check; the earlier lookup merely
    /// avoids a useless publish.
    pub async fn start_deployment(&self, request: StartRequest) -> DeployResult<DeploymentAttempt> {
        request.plan.validate().map_err(DeployError::Setup)?;

        let current = self
            .router
            .current_weights(&request.target)
            .await
            .map_err(|e| {
                DeployError::Setup(format!("target {} not resolvable: {e}", request.target))
            })?;
        let previous_revision_id = current.primary_revision_id;

        if let Some(active) = self.ledger.active_attempt(&request.target).map_err(ledger_err)? {
            return Err(DeployError::Conflict {
                target: request.target,
                attempt_id: active.attempt_id,
            });
        }

        let revision = self
            .publisher
            .publish(&request.target, &request.artifact_ref)
            .await
            .map_err(|e| {
                DeployError::Setup(format!("publish of {} failed: {e}", request.artifact_ref))
            })?;

        let attempt = DeploymentAttempt {
            attempt_id: attempt_id(&request.target, &revision.id),
            target: request.target,
            previous_revision_id,
            new_revision_id: revision.id,
            plan: request.plan,
            alarm_names: request.alarm_names,
            options: request.options,
            current_phase_index: 0,
            status: AttemptStatus::Pending,
            started_at: epoch_secs(),
            ended_at: None,
            termination_reason: None,
        };
        self.ledger.begin_attempt(&attempt).map_err(ledger_err)?;
        info!(
            target = %attempt.target,
            attempt_id = %attempt.attempt_id,
            previous = %attempt.previous_revision_id,
            new = %attempt.new_revision_id,
            phases = attempt.plan.len(),
            "deployment attempt started"
        );
        Ok(attempt)
    }

    /// Start an attempt and drive it to a terminal state.
    pub async fn execute(
        &self,
        request: StartRequest,
        abort: &mut watch::Receiver<bool>,
    ) -> DeployResult<DeploymentAttempt> {
        let attempt = self.start_deployment(request).await?;
        self.machine().run(attempt, abort, false).await
    }

    /// Pick up an attempt after a crash.
    ///
    /// Terminal attempts are returned as-is. A pending attempt starts from
    /// scratch. An attempt inside phase `i` re-enters that phase's hold
    /// without re-recording the transition; the router is re-synced first if
    /// a crash landed between the traffic shift and its record.
    pub async fn resume(
        &self,
        attempt_id: &str,
        abort: &mut watch::Receiver<bool>,
    ) -> DeployResult<DeploymentAttempt> {
        let Some(attempt) = self.ledger.get_attempt(attempt_id).map_err(ledger_err)? else {
            return Err(DeployError::Setup(format!("unknown attempt: {attempt_id}")));
        };
        if attempt.status.is_terminal() {
            info!(%attempt_id, status = ?attempt.status, "attempt already terminal, nothing to resume");
            return Ok(attempt);
        }
        match attempt.status {
            AttemptStatus::Pending => {
                info!(%attempt_id, target = %attempt.target, "resuming before first traffic shift");
                self.machine().run(attempt, abort, false).await
            }
            AttemptStatus::Phase { index } => {
                let step = attempt.plan.steps.get(index as usize).copied().ok_or_else(|| {
                    DeployError::Ledger(format!(
                        "attempt {attempt_id} records phase {index} beyond its plan"
                    ))
                })?;
                let expected = RoutingRule::split(
                    &attempt.target,
                    &attempt.previous_revision_id,
                    &attempt.new_revision_id,
                    step.weight_percent,
                );
                let current = self
                    .router
                    .current_weights(&attempt.target)
                    .await
                    .map_err(DeployError::Infra)?;
                if current != expected {
                    warn!(
                        %attempt_id,
                        phase = index,
                        "router weights diverged from recorded phase, re-syncing"
                    );
                    let router = &self.router;
                    let resynced =
                        with_backoff("resync_weights", MAX_ATTEMPTS, self.backoff_base, || {
                            router.set_weights(&expected)
                        })
                        .await;
                    if let Err(e) = resynced {
                        return self
                            .machine()
                            .roll_back(
                                attempt,
                                format!("re-sync of phase {index} weights failed: {e}"),
                                abort,
                            )
                            .await;
                    }
                }
                info!(%attempt_id, phase = index, "resuming, re-running the interrupted hold");
                self.machine().run(attempt, abort, true).await
            }
            status => Err(DeployError::Ledger(format!(
                "attempt {attempt_id} replayed to unexpected status {status:?}"
            ))),
        }
    }

    /// Operator-initiated rollback of a target, outside any running process.
    ///
    /// Restores the last known-good revision from the ledger. With an active
    /// (crashed) attempt the restore is recorded as that attempt's
    /// `ROLLED_BACK` terminal, re-opening single-flight. With no active
    /// attempt the call is an idempotent no-op, unless `force`, which pushes
    /// last-known-good weights anyway (verified, but recorded nowhere since
    /// no attempt owns it).
    pub async fn rollback_target(
        &self,
        target: &str,
        reason: &str,
        force: bool,
    ) -> DeployResult<Option<DeploymentAttempt>> {
        let active = self.ledger.active_attempt(target).map_err(ledger_err)?;
        if active.is_none() && !force {
            info!(%target, "no active attempt, manual rollback is a no-op");
            return Ok(None);
        }
        let Some(revision) = self.ledger.last_good_revision(target).map_err(ledger_err)? else {
            return Err(DeployError::Setup(format!(
                "no deployment history for {target}, nothing to restore"
            )));
        };

        match active {
            Some(mut attempt) => {
                info!(
                    %target,
                    attempt_id = %attempt.attempt_id,
                    revision = %revision,
                    "manual rollback of active attempt"
                );
                match self.rollback_controller().restore_traffic(target, &revision).await {
                    Ok(()) => {
                        self.ledger
                            .append(
                                &attempt.attempt_id,
                                LedgerEvent::RolledBack {
                                    reason: reason.to_string(),
                                },
                            )
                            .map_err(ledger_err)?;
                        attempt.status = AttemptStatus::RolledBack;
                        attempt.ended_at = Some(epoch_secs());
                        attempt.termination_reason = Some(reason.to_string());
                        Ok(Some(attempt))
                    }
                    Err(e) => {
                        let reason = format!("{reason}; traffic restore unverified: {e:#}");
                        if let Err(le) = self.ledger.append(
                            &attempt.attempt_id,
                            LedgerEvent::Failed {
                                reason: reason.clone(),
                            },
                        ) {
                            error!(
                                attempt_id = %attempt.attempt_id,
                                error = %le,
                                "could not record FAILED event"
                            );
                        }
                        Err(DeployError::RollbackFailed {
                            attempt_id: attempt.attempt_id,
                            reason,
                        })
                    }
                }
            }
            None => {
                info!(%target, revision = %revision, "forced traffic restore with no active attempt");
                self.rollback_controller()
                    .restore_traffic(target, &revision)
                    .await
                    .map_err(|e| DeployError::RollbackFailed {
                        attempt_id: target.to_string(),
                        reason: format!("{e:#}"),
                    })?;
                Ok(None)
            }
        }
    }

    fn machine(&self) -> Machine {
        Machine::new(
            self.ledger.clone(),
            Arc::clone(&self.router),
            self.evaluator.clone(),
            self.rollback_controller(),
            self.backoff_base,
        )
    }

    fn rollback_controller(&self) -> RollbackController {
        RollbackController::new(Arc::clone(&self.router)).with_backoff_base(self.backoff_base)
    }
}

/// Fresh attempt id: `att-` plus 12 hex chars of
/// sha256(target ‖ now-nanos ‖ revision).
fn attempt_id(target: &str, revision_id: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = Sha256::new();
    hasher.update(format!("{target}:{nanos}:{revision_id}"));
    format!("att-{}", &hex::encode(hasher.finalize())[..12])
}
