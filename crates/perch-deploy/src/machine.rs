//! The phase state machine.
//!
//! One `run` drives an attempt from its current phase index to a terminal
//! state: shift traffic, record the shift, hold while sampling health,
//! repeat, finalize. Mutation always precedes its ledger record, and no new
//! mutation is issued until the previous record landed, so a crash never
//! leaves the ledger ahead of the router.
//!
//! `run` returns the completed attempt on success; every other terminal
//! carries its category out as a [`DeployError`] so callers keep the
//! rolled-back / rollback-failed / aborted distinction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use perch_core::error::{DeployError, DeployResult};
use perch_core::traits::TrafficRouter;
use perch_core::types::{
    AlarmState, AttemptStatus, DeploymentAttempt, HealthSample, RoutingRule, Verdict, epoch_secs,
};
use perch_health::HealthEvaluator;
use perch_ledger::{Ledger, LedgerError, LedgerEvent};

use crate::retry::{MAX_ATTEMPTS, with_backoff};
use crate::rollback::RollbackController;

/// Map ledger refusals onto the deployment taxonomy. A single-flight
/// conflict keeps its identity; everything else is a ledger fault.
pub(crate) fn ledger_err(e: LedgerError) -> DeployError {
    match e {
        LedgerError::Conflict { target, attempt_id } => {
            DeployError::Conflict { target, attempt_id }
        }
        other => DeployError::Ledger(other.to_string()),
    }
}

/// Executes the phase plan for one attempt.
pub struct Machine {
    ledger: Ledger,
    router: Arc<dyn TrafficRouter>,
    evaluator: HealthEvaluator,
    rollback: RollbackController,
    backoff_base: Duration,
}

impl Machine {
    pub fn new(
        ledger: Ledger,
        router: Arc<dyn TrafficRouter>,
        evaluator: HealthEvaluator,
        rollback: RollbackController,
        backoff_base: Duration,
    ) -> Self {
        Self {
            ledger,
            router,
            evaluator,
            rollback,
            backoff_base,
        }
    }

    /// Drive `attempt` from `current_phase_index` to a terminal state.
    ///
    /// With `skip_shift` the first phase's traffic shift and `PHASE_ADVANCED`
    /// record are assumed already applied (resumption re-entering a recorded
    /// phase) and only its hold is re-run.
    pub async fn run(
        &self,
        mut attempt: DeploymentAttempt,
        abort: &mut watch::Receiver<bool>,
        skip_shift: bool,
    ) -> DeployResult<DeploymentAttempt> {
        let deadline = attempt.started_at
            + attempt.plan.total_hold_secs()
            + attempt.plan.len() as u64 * attempt.options.per_phase_overhead_secs;
        let mut mutated = !matches!(attempt.status, AttemptStatus::Pending);
        let mut skip = skip_shift;

        let start = attempt.current_phase_index as usize;
        for index in start..attempt.plan.len() {
            let step = attempt.plan.steps[index];

            if *abort.borrow() {
                if !mutated {
                    return self.abort_before_shift(attempt).await;
                }
                return self
                    .roll_back(attempt, "aborted by operator".to_string(), abort)
                    .await;
            }
            if epoch_secs() > deadline {
                return self
                    .roll_back(attempt, "wall-clock budget exceeded".to_string(), abort)
                    .await;
            }

            if !skip {
                let rule = RoutingRule::split(
                    &attempt.target,
                    &attempt.previous_revision_id,
                    &attempt.new_revision_id,
                    step.weight_percent,
                );
                let router = &self.router;
                let shifted = with_backoff("set_weights", MAX_ATTEMPTS, self.backoff_base, || {
                    router.set_weights(&rule)
                })
                .await;
                if let Err(e) = shifted {
                    return self
                        .roll_back(
                            attempt,
                            format!("traffic shift to {}% failed: {e}", step.weight_percent),
                            abort,
                        )
                        .await;
                }
                mutated = true;

                // The shift is not committed until its record lands.
                if let Err(e) = self.ledger.append(
                    &attempt.attempt_id,
                    LedgerEvent::PhaseAdvanced {
                        phase_index: index as u32,
                        canary_weight: step.weight_percent,
                    },
                ) {
                    return self
                        .roll_back(attempt, format!("recording phase {index} failed: {e}"), abort)
                        .await;
                }
                info!(
                    target = %attempt.target,
                    attempt_id = %attempt.attempt_id,
                    phase = index,
                    canary_weight = step.weight_percent,
                    "phase advanced"
                );
            } else {
                debug!(
                    target = %attempt.target,
                    attempt_id = %attempt.attempt_id,
                    phase = index,
                    "weights already applied, re-entering hold"
                );
            }
            skip = false;
            attempt.current_phase_index = index as u32;
            attempt.status = AttemptStatus::Phase {
                index: index as u32,
            };

            // Hold: sample immediately, then every poll interval. A
            // zero-second hold takes no samples.
            if step.hold_secs > 0 {
                let hold = Duration::from_secs(step.hold_secs);
                let hold_started = Instant::now();
                let mut saw_data = false;
                loop {
                    if epoch_secs() > deadline {
                        return self
                            .roll_back(attempt, "wall-clock budget exceeded".to_string(), abort)
                            .await;
                    }

                    let sample = self.evaluator.evaluate(&attempt.alarm_names).await;
                    if let Err(e) = self.ledger.append(
                        &attempt.attempt_id,
                        LedgerEvent::HealthSample {
                            sample: sample.clone(),
                        },
                    ) {
                        return self
                            .roll_back(attempt, format!("recording health sample failed: {e}"), abort)
                            .await;
                    }
                    match sample.verdict {
                        Verdict::Degraded => {
                            saw_data = true;
                            if attempt.options.rollback_on_alarm {
                                return self
                                    .roll_back(attempt, degraded_reason(&sample), abort)
                                    .await;
                            }
                            warn!(
                                target = %attempt.target,
                                phase = index,
                                reason = %degraded_reason(&sample),
                                "health degraded, continuing (rollback_on_alarm = false)"
                            );
                        }
                        Verdict::Healthy => saw_data = true,
                        Verdict::Unknown => {}
                    }

                    let elapsed = hold_started.elapsed();
                    if elapsed >= hold {
                        break;
                    }
                    let sleep_for = (hold - elapsed)
                        .min(Duration::from_secs(attempt.options.poll_interval_secs.max(1)));
                    tokio::select! {
                        _ = tokio::time::sleep(sleep_for) => {}
                        changed = abort.changed() => {
                            if *abort.borrow() {
                                return self
                                    .roll_back(attempt, "aborted by operator".to_string(), abort)
                                    .await;
                            }
                            if changed.is_err() {
                                // Sender gone; no abort can arrive anymore.
                                tokio::time::sleep(sleep_for).await;
                            }
                        }
                    }
                }

                if !saw_data {
                    if attempt.options.treat_unknown_as_failure {
                        return self
                            .roll_back(
                                attempt,
                                "no monitoring data for the entire hold".to_string(),
                                abort,
                            )
                            .await;
                    }
                    warn!(
                        target = %attempt.target,
                        phase = index,
                        "no monitoring data during hold, proceeding"
                    );
                }
            }
        }

        // Finalize: the new revision becomes the primary, canary cleared.
        attempt.status = AttemptStatus::Finalizing;
        debug!(target = %attempt.target, attempt_id = %attempt.attempt_id, "finalizing");
        let final_rule = RoutingRule::single(&attempt.target, &attempt.new_revision_id);
        let router = &self.router;
        let cutover = with_backoff("finalize_weights", MAX_ATTEMPTS, self.backoff_base, || {
            router.set_weights(&final_rule)
        })
        .await;
        if let Err(e) = cutover {
            return self
                .roll_back(attempt, format!("final cutover failed: {e}"), abort)
                .await;
        }
        self.ledger
            .append(&attempt.attempt_id, LedgerEvent::Completed)
            .map_err(ledger_err)?;
        attempt.status = AttemptStatus::Completed;
        attempt.ended_at = Some(epoch_secs());
        info!(
            target = %attempt.target,
            attempt_id = %attempt.attempt_id,
            revision = %attempt.new_revision_id,
            "deployment completed"
        );
        Ok(attempt)
    }

    /// Restore traffic and close the attempt. The terminal entry is
    /// `ABORTED` when the operator's abort flag is set (even if the restore
    /// began for another reason), `ROLLED_BACK` otherwise, and `FAILED` when
    /// the restore could not be verified.
    pub(crate) async fn roll_back(
        &self,
        attempt: DeploymentAttempt,
        reason: String,
        abort: &watch::Receiver<bool>,
    ) -> DeployResult<DeploymentAttempt> {
        warn!(
            target = %attempt.target,
            attempt_id = %attempt.attempt_id,
            %reason,
            "restoring traffic to previous revision"
        );
        match self
            .rollback
            .restore_traffic(&attempt.target, &attempt.previous_revision_id)
            .await
        {
            Ok(()) => {
                if *abort.borrow() {
                    self.ledger
                        .append(
                            &attempt.attempt_id,
                            LedgerEvent::Aborted {
                                reason: reason.clone(),
                            },
                        )
                        .map_err(ledger_err)?;
                    info!(attempt_id = %attempt.attempt_id, "attempt aborted, traffic restored");
                    Err(DeployError::Aborted {
                        attempt_id: attempt.attempt_id,
                    })
                } else {
                    self.ledger
                        .append(
                            &attempt.attempt_id,
                            LedgerEvent::RolledBack {
                                reason: reason.clone(),
                            },
                        )
                        .map_err(ledger_err)?;
                    Err(DeployError::DegradedRollback {
                        attempt_id: attempt.attempt_id,
                        reason,
                    })
                }
            }
            Err(e) => {
                let reason = format!("{reason}; traffic restore unverified: {e:#}");
                if let Err(le) = self.ledger.append(
                    &attempt.attempt_id,
                    LedgerEvent::Failed {
                        reason: reason.clone(),
                    },
                ) {
                    error!(attempt_id = %attempt.attempt_id, error = %le, "could not record FAILED event");
                }
                error!(
                    target = %attempt.target,
                    attempt_id = %attempt.attempt_id,
                    %reason,
                    "rollback unverified, manual intervention required"
                );
                Err(DeployError::RollbackFailed {
                    attempt_id: attempt.attempt_id,
                    reason,
                })
            }
        }
    }

    /// Abort before any traffic shift: terminal entry only, no restore.
    async fn abort_before_shift(
        &self,
        attempt: DeploymentAttempt,
    ) -> DeployResult<DeploymentAttempt> {
        self.ledger
            .append(
                &attempt.attempt_id,
                LedgerEvent::Aborted {
                    reason: "aborted by operator before any traffic shift".to_string(),
                },
            )
            .map_err(ledger_err)?;
        info!(attempt_id = %attempt.attempt_id, "attempt aborted before any traffic shift");
        Err(DeployError::Aborted {
            attempt_id: attempt.attempt_id,
        })
    }
}

/// Human-readable reason naming the tripped alarms.
fn degraded_reason(sample: &HealthSample) -> String {
    let tripped: Vec<&str> = sample
        .alarm_states
        .iter()
        .filter(|(_, state)| **state == AlarmState::Alarm)
        .map(|(name, _)| name.as_str())
        .collect();
    format!("alarms in ALARM state: {}", tripped.join(", "))
}
