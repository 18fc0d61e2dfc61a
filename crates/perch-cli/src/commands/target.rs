//! `perch target` — provision and list deployment targets.

use perch_core::error::DeployResult;

use super::{Context, store_err};

pub fn add(ctx: &Context, name: &str, artifact: &str, alarms: Vec<String>) -> DeployResult<()> {
    let record = ctx
        .store
        .provision_target(name, artifact, alarms)
        .map_err(store_err)?;
    println!(
        "provisioned target {} (baseline revision {})",
        record.name, record.baseline_revision_id
    );
    Ok(())
}

pub fn list(ctx: &Context) -> DeployResult<()> {
    let targets = ctx.store.list_targets().map_err(store_err)?;
    if targets.is_empty() {
        println!("no targets provisioned");
        return Ok(());
    }
    for record in targets {
        println!(
            "{}  baseline={}  alarms=[{}]",
            record.name,
            record.baseline_revision_id,
            record.alarm_names.join(", ")
        );
    }
    Ok(())
}
