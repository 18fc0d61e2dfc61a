//! `perch rollback` — restore a target's last known-good revision.

use perch_core::error::DeployResult;

use super::{Context, print_attempt};

pub async fn rollback(ctx: &Context, target: &str, reason: &str, force: bool) -> DeployResult<()> {
    match ctx.coordinator.rollback_target(target, reason, force).await? {
        Some(attempt) => {
            println!("rolled back attempt {} on {}", attempt.attempt_id, attempt.target);
            print_attempt(&attempt);
        }
        None if force => println!("restored last known-good weights for {target}"),
        None => println!("no active attempt for {target}, nothing to roll back"),
    }
    Ok(())
}
