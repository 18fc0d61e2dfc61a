//! `perch deploy` — run one deployment attempt to a terminal state.

use std::path::Path;

use perch_core::error::{DeployError, DeployResult};
use perch_core::types::{DeployOptions, PhasePlan};
use perch_deploy::StartRequest;

use super::{Context, finish, spawn_ctrl_c_abort, store_err};

pub async fn deploy(
    ctx: &Context,
    target: &str,
    artifact: &str,
    plan_json: &str,
    options: DeployOptions,
    report_dir: &Path,
) -> DeployResult<()> {
    let plan: PhasePlan = serde_json::from_str(plan_json)
        .map_err(|e| DeployError::Setup(format!("invalid plan JSON: {e}")))?;

    // The target record carries the alarms gating this deployment.
    let record = ctx
        .store
        .get_target(target)
        .map_err(store_err)?
        .ok_or_else(|| DeployError::Setup(format!("unknown target: {target}")))?;

    let request = StartRequest {
        target: target.to_string(),
        artifact_ref: artifact.to_string(),
        plan,
        alarm_names: record.alarm_names,
        options,
    };

    let mut abort = spawn_ctrl_c_abort();
    let outcome = ctx.coordinator.execute(request, &mut abort).await;
    finish(ctx, outcome, report_dir)
}
