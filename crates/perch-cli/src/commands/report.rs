//! `perch report` — print the report document for an attempt.

use perch_core::error::DeployResult;
use perch_deploy::DeploymentReport;

use super::Context;

pub fn report(ctx: &Context, attempt_id: &str) -> DeployResult<()> {
    let report = DeploymentReport::from_ledger(&ctx.ledger, attempt_id)?;
    let json = serde_json::to_string_pretty(&report).map_err(anyhow::Error::from)?;
    println!("{json}");
    Ok(())
}
