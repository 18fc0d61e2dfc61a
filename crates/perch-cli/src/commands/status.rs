//! `perch status` — a target's routing rule and any active attempt.

use perch_core::error::{DeployError, DeployResult};

use super::{Context, ledger_err, store_err};

pub fn status(ctx: &Context, target: &str) -> DeployResult<()> {
    let record = ctx
        .store
        .get_target(target)
        .map_err(store_err)?
        .ok_or_else(|| DeployError::Setup(format!("unknown target: {target}")))?;
    let route = ctx.store.get_route(target).map_err(store_err)?;
    let active = ctx.ledger.active_attempt(target).map_err(ledger_err)?;

    println!("target: {}", record.name);
    if record.alarm_names.is_empty() {
        println!("alarms: (none)");
    } else {
        println!("alarms: {}", record.alarm_names.join(", "));
    }
    match route {
        Some(rule) => match &rule.canary_revision_id {
            Some(canary) => println!(
                "route:  revision {} at {}%, revision {} at {}%",
                rule.primary_revision_id, rule.primary_weight, canary, rule.canary_weight
            ),
            None => println!("route:  revision {} at 100%", rule.primary_revision_id),
        },
        None => println!("route:  (none)"),
    }
    match active {
        Some(attempt) => println!(
            "active: {} ({:?}, phase {} of {})",
            attempt.attempt_id,
            attempt.status,
            attempt.current_phase_index,
            attempt.plan.len()
        ),
        None => println!("active: none"),
    }
    Ok(())
}
