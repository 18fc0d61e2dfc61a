//! `perch resume` — pick up an attempt interrupted by a crash.

use std::path::Path;

use perch_core::error::DeployResult;

use super::{Context, finish, spawn_ctrl_c_abort};

pub async fn resume(ctx: &Context, attempt_id: &str, report_dir: &Path) -> DeployResult<()> {
    let mut abort = spawn_ctrl_c_abort();
    let outcome = ctx.coordinator.resume(attempt_id, &mut abort).await;
    finish(ctx, outcome, report_dir)
}
