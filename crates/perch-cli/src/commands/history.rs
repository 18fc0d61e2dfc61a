//! `perch history` — a target's attempts, newest first.

use perch_core::error::DeployResult;

use super::{Context, ledger_err};

pub fn history(ctx: &Context, target: &str, limit: usize) -> DeployResult<()> {
    let attempts = ctx
        .ledger
        .attempts_for_target(target, limit)
        .map_err(ledger_err)?;
    if attempts.is_empty() {
        println!("no attempts recorded for {target}");
        return Ok(());
    }
    for attempt in attempts {
        let ended = attempt
            .ended_at
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let reason = attempt
            .termination_reason
            .map(|r| format!("  ({r})"))
            .unwrap_or_default();
        println!(
            "{}  {:?}  {} to {}  started={} ended={}{}",
            attempt.attempt_id,
            attempt.status,
            attempt.previous_revision_id,
            attempt.new_revision_id,
            attempt.started_at,
            ended,
            reason
        );
    }
    Ok(())
}
