//! Domain types — revisions, routing rules, phase plans, attempts, health.

use std::collections::BTreeMap;
use std::fmt;

/// An immutable published revision of a target's artifact.
///
/// Revisions are never mutated or deleted by the orchestrator; retention is
/// the publisher's concern.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Revision {
    /// Opaque identifier, monotonically assigned by the publisher per target.
    pub id: String,
    /// sha256 hex digest of the artifact content.
    pub content_digest: String,
    /// Unix epoch seconds.
    pub created_at: u64,
    /// Free-form description, may be empty.
    pub description: String,
}

/// The weighted alias: how traffic for a target splits across revisions.
///
/// Invariant: `primary_weight + canary_weight == 100`, and a canary revision
/// is present exactly when `canary_weight > 0`. Every router implementation
/// re-checks this before accepting a write.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RoutingRule {
    pub target: String,
    pub primary_revision_id: String,
    /// Percentage of traffic on the primary revision (0-100).
    pub primary_weight: u32,
    pub canary_revision_id: Option<String>,
    /// Percentage of traffic on the canary revision (0-100).
    pub canary_weight: u32,
}

impl RoutingRule {
    /// A rule sending all traffic to one revision.
    pub fn single(target: impl Into<String>, revision_id: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            primary_revision_id: revision_id.into(),
            primary_weight: 100,
            canary_revision_id: None,
            canary_weight: 0,
        }
    }

    /// A rule splitting traffic between a primary and a canary revision.
    pub fn split(
        target: impl Into<String>,
        primary_revision_id: impl Into<String>,
        canary_revision_id: impl Into<String>,
        canary_weight: u32,
    ) -> Self {
        Self {
            target: target.into(),
            primary_revision_id: primary_revision_id.into(),
            primary_weight: 100u32.saturating_sub(canary_weight),
            canary_revision_id: Some(canary_revision_id.into()),
            canary_weight,
        }
    }

    /// Check the weighted-alias invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.primary_weight as u64 + self.canary_weight as u64 != 100 {
            return Err(format!(
                "weights must sum to 100, got {} + {}",
                self.primary_weight, self.canary_weight
            ));
        }
        match (&self.canary_revision_id, self.canary_weight) {
            (None, w) if w != 0 => Err(format!("canary weight {w} with no canary revision")),
            (Some(id), 0) => Err(format!("canary revision {id} with zero weight")),
            _ => Ok(()),
        }
    }
}

/// One step of a phase plan: shift the canary to `weight_percent`, then hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PhaseStep {
    /// Canary traffic percentage for this phase (1-100).
    pub weight_percent: u32,
    /// Seconds to hold at this weight while health is observed.
    pub hold_secs: u64,
}

/// An ordered list of traffic-shift phases, ending at 100%.
///
/// Serializes as a bare JSON array, which is also the `--plan` wire format.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PhasePlan {
    pub steps: Vec<PhaseStep>,
}

impl PhasePlan {
    pub fn new(steps: Vec<PhaseStep>) -> Self {
        Self { steps }
    }

    /// Check the plan invariants: non-empty, weights in (0, 100], strictly
    /// increasing, final weight exactly 100.
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err("phase plan is empty".to_string());
        }
        let mut prev = 0u32;
        for (i, step) in self.steps.iter().enumerate() {
            if step.weight_percent == 0 || step.weight_percent > 100 {
                return Err(format!(
                    "phase {i}: weight {} out of range (1-100)",
                    step.weight_percent
                ));
            }
            if step.weight_percent <= prev {
                return Err(format!(
                    "phase {i}: weight {} does not increase over {prev}",
                    step.weight_percent
                ));
            }
            prev = step.weight_percent;
        }
        if prev != 100 {
            return Err(format!("final phase weight must be 100, got {prev}"));
        }
        Ok(())
    }

    /// Sum of all hold durations, for the wall-clock budget.
    pub fn total_hold_secs(&self) -> u64 {
        self.steps.iter().map(|s| s.hold_secs).sum()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Operator knobs for one deployment attempt.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeployOptions {
    /// Roll back immediately when a health sample is degraded.
    pub rollback_on_alarm: bool,
    /// Roll back when a whole hold produced only unknown verdicts.
    pub treat_unknown_as_failure: bool,
    /// Seconds between health samples during a hold.
    pub poll_interval_secs: u64,
    /// Fixed per-phase allowance added to the wall-clock budget.
    pub per_phase_overhead_secs: u64,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            rollback_on_alarm: true,
            treat_unknown_as_failure: false,
            poll_interval_secs: 30,
            per_phase_overhead_secs: 60,
        }
    }
}

/// Where a deployment attempt stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AttemptStatus {
    /// Recorded, no traffic shifted yet.
    Pending,
    /// Holding at phase `index` of the plan.
    Phase { index: u32 },
    /// All phases passed; cutting the primary over to the new revision.
    Finalizing,
    Completed,
    /// Restoring traffic to the previous revision.
    RollingBack,
    RolledBack,
    /// Cancelled by the operator.
    Aborted,
    /// Rollback could not be verified; manual intervention required.
    Failed,
}

impl AttemptStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Completed
                | AttemptStatus::RolledBack
                | AttemptStatus::Aborted
                | AttemptStatus::Failed
        )
    }
}

/// One rollout execution of a new revision behind a target's alias.
///
/// Created by the coordinator, mutated only by the state machine, immutable
/// once the status is terminal. At most one non-terminal attempt exists per
/// target at any time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeploymentAttempt {
    pub attempt_id: String,
    pub target: String,
    /// Primary revision before any mutation; the rollback anchor.
    pub previous_revision_id: String,
    pub new_revision_id: String,
    pub plan: PhasePlan,
    /// Alarms snapshotted at start so resumption polls the same set.
    pub alarm_names: Vec<String>,
    /// Options snapshotted at start so resumption honors the original flags.
    pub options: DeployOptions,
    pub current_phase_index: u32,
    pub status: AttemptStatus,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    pub termination_reason: Option<String>,
}

/// Alarm states as reported by the monitoring system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Ok,
    Alarm,
    InsufficientData,
    Unknown,
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlarmState::Ok => "OK",
            AlarmState::Alarm => "ALARM",
            AlarmState::InsufficientData => "INSUFFICIENT_DATA",
            AlarmState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AlarmState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(AlarmState::Ok),
            "ALARM" => Ok(AlarmState::Alarm),
            "INSUFFICIENT_DATA" => Ok(AlarmState::InsufficientData),
            "UNKNOWN" => Ok(AlarmState::Unknown),
            other => Err(format!("unknown alarm state: {other}")),
        }
    }
}

/// One alarm's state at a point in time, as returned by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AlarmStatus {
    pub state: AlarmState,
    /// Unix epoch seconds of the observation.
    pub timestamp: u64,
}

/// Aggregate health judgement over one poll of all watched alarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Verdict {
    Healthy,
    Degraded,
    Unknown,
}

impl Verdict {
    /// Aggregation rule: any `ALARM` is degraded; otherwise any
    /// `UNKNOWN`/`INSUFFICIENT_DATA` is unknown; otherwise healthy.
    pub fn from_states(states: &BTreeMap<String, AlarmState>) -> Verdict {
        let mut unknown = false;
        for state in states.values() {
            match state {
                AlarmState::Alarm => return Verdict::Degraded,
                AlarmState::Unknown | AlarmState::InsufficientData => unknown = true,
                AlarmState::Ok => {}
            }
        }
        if unknown { Verdict::Unknown } else { Verdict::Healthy }
    }
}

/// One health poll: every watched alarm's state plus the aggregate verdict.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HealthSample {
    /// Unix epoch seconds when the poll ran.
    pub timestamp: u64,
    pub alarm_states: BTreeMap<String, AlarmState>,
    pub verdict: Verdict,
}

impl HealthSample {
    /// Build a sample, deriving the verdict from the collected states.
    pub fn new(timestamp: u64, alarm_states: BTreeMap<String, AlarmState>) -> Self {
        let verdict = Verdict::from_states(&alarm_states);
        Self {
            timestamp,
            alarm_states,
            verdict,
        }
    }
}

/// Current time as Unix epoch seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(steps: &[(u32, u64)]) -> PhasePlan {
        PhasePlan::new(
            steps
                .iter()
                .map(|&(weight_percent, hold_secs)| PhaseStep {
                    weight_percent,
                    hold_secs,
                })
                .collect(),
        )
    }

    #[test]
    fn canonical_plan_validates() {
        let p = plan(&[(10, 60), (50, 60), (100, 0)]);
        assert!(p.validate().is_ok());
        assert_eq!(p.total_hold_secs(), 120);
    }

    #[test]
    fn single_full_phase_validates() {
        assert!(plan(&[(100, 0)]).validate().is_ok());
    }

    #[test]
    fn empty_plan_rejected() {
        assert!(plan(&[]).validate().is_err());
    }

    #[test]
    fn zero_weight_rejected() {
        assert!(plan(&[(0, 10), (100, 0)]).validate().is_err());
    }

    #[test]
    fn over_100_rejected() {
        assert!(plan(&[(50, 10), (110, 0)]).validate().is_err());
    }

    #[test]
    fn non_increasing_rejected() {
        assert!(plan(&[(50, 10), (50, 10), (100, 0)]).validate().is_err());
        assert!(plan(&[(50, 10), (30, 10), (100, 0)]).validate().is_err());
    }

    #[test]
    fn plan_must_end_at_100() {
        assert!(plan(&[(10, 10), (50, 10)]).validate().is_err());
    }

    #[test]
    fn plan_serializes_as_bare_array() {
        let p = plan(&[(10, 60), (100, 0)]);
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.starts_with('['));
        let back: PhasePlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn routing_rule_constructors_validate() {
        assert!(RoutingRule::single("api", "3").validate().is_ok());
        assert!(RoutingRule::split("api", "3", "4", 10).validate().is_ok());
    }

    #[test]
    fn routing_rule_rejects_bad_sum() {
        let mut rule = RoutingRule::split("api", "3", "4", 10);
        rule.primary_weight = 80;
        assert!(rule.validate().is_err());
    }

    #[test]
    fn routing_rule_ties_canary_id_to_weight() {
        let mut rule = RoutingRule::single("api", "3");
        rule.canary_weight = 10;
        rule.primary_weight = 90;
        assert!(rule.validate().is_err());

        let mut rule = RoutingRule::split("api", "3", "4", 10);
        rule.canary_weight = 0;
        rule.primary_weight = 100;
        assert!(rule.validate().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(AttemptStatus::Completed.is_terminal());
        assert!(AttemptStatus::RolledBack.is_terminal());
        assert!(AttemptStatus::Aborted.is_terminal());
        assert!(AttemptStatus::Failed.is_terminal());
        assert!(!AttemptStatus::Pending.is_terminal());
        assert!(!AttemptStatus::Phase { index: 2 }.is_terminal());
        assert!(!AttemptStatus::Finalizing.is_terminal());
        assert!(!AttemptStatus::RollingBack.is_terminal());
    }

    #[test]
    fn default_options() {
        let opts = DeployOptions::default();
        assert!(opts.rollback_on_alarm);
        assert!(!opts.treat_unknown_as_failure);
        assert_eq!(opts.poll_interval_secs, 30);
        assert_eq!(opts.per_phase_overhead_secs, 60);
    }

    #[test]
    fn alarm_state_wire_names() {
        let json = serde_json::to_string(&AlarmState::InsufficientData).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_DATA\"");
        let back: AlarmState = serde_json::from_str("\"ALARM\"").unwrap();
        assert_eq!(back, AlarmState::Alarm);
        assert_eq!("OK".parse::<AlarmState>().unwrap(), AlarmState::Ok);
        assert!("ok".parse::<AlarmState>().is_err());
        assert_eq!(AlarmState::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn verdict_alarm_beats_unknown() {
        let mut states = BTreeMap::new();
        states.insert("lat".to_string(), AlarmState::Unknown);
        states.insert("err".to_string(), AlarmState::Alarm);
        states.insert("cpu".to_string(), AlarmState::Ok);
        assert_eq!(Verdict::from_states(&states), Verdict::Degraded);
    }

    #[test]
    fn verdict_unknown_when_data_missing() {
        let mut states = BTreeMap::new();
        states.insert("lat".to_string(), AlarmState::Ok);
        states.insert("err".to_string(), AlarmState::InsufficientData);
        assert_eq!(Verdict::from_states(&states), Verdict::Unknown);
    }

    #[test]
    fn verdict_healthy_when_all_ok() {
        let mut states = BTreeMap::new();
        states.insert("lat".to_string(), AlarmState::Ok);
        assert_eq!(Verdict::from_states(&states), Verdict::Healthy);
        assert_eq!(Verdict::from_states(&BTreeMap::new()), Verdict::Healthy);
    }

    #[test]
    fn sample_derives_verdict() {
        let mut states = BTreeMap::new();
        states.insert("err".to_string(), AlarmState::Alarm);
        let sample = HealthSample::new(1700000000, states);
        assert_eq!(sample.verdict, Verdict::Degraded);
    }

    #[test]
    fn attempt_roundtrips_through_json() {
        let attempt = DeploymentAttempt {
            attempt_id: "att-0011aabbccdd".to_string(),
            target: "api".to_string(),
            previous_revision_id: "3".to_string(),
            new_revision_id: "4".to_string(),
            plan: plan(&[(10, 60), (100, 0)]),
            alarm_names: vec!["api-errors".to_string()],
            options: DeployOptions::default(),
            current_phase_index: 1,
            status: AttemptStatus::Phase { index: 1 },
            started_at: 1700000000,
            ended_at: None,
            termination_reason: None,
        };
        let json = serde_json::to_string(&attempt).unwrap();
        let back: DeploymentAttempt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attempt);
    }
}
