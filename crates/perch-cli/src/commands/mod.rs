//! perch subcommands.
//!
//! Every subcommand runs against a [`Context`]: the local target store, the
//! deployment ledger, and a coordinator wired over them. Commands print
//! human-oriented lines to stdout; attempt records and reports are JSON.

pub mod alarm;
pub mod deploy;
pub mod history;
pub mod report;
pub mod resume;
pub mod rollback;
pub mod status;
pub mod target;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::watch;
use tracing::{info, warn};

use perch_core::error::{DeployError, DeployResult};
use perch_core::types::DeploymentAttempt;
use perch_deploy::{Coordinator, DeploymentReport};
use perch_health::{HealthEvaluator, HttpAlarmGateway};
use perch_ledger::{Ledger, LedgerError};
use perch_state::{StateError, StoreAlarmGateway, StorePublisher, StoreRouter, TargetStore};

use crate::config::PerchConfig;

/// Shared wiring for one command invocation.
pub struct Context {
    pub store: TargetStore,
    pub ledger: Ledger,
    pub coordinator: Coordinator,
}

/// Open the databases under the configured data dir and wire the
/// coordinator. Alarm states come from the HTTP feed when `alarm_endpoint`
/// is set, otherwise from the local store (`perch alarm set`).
pub fn context(config: &PerchConfig) -> DeployResult<Context> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))
        .map_err(DeployError::Infra)?;

    let store =
        TargetStore::open(&config.data_dir.join("state.redb")).map_err(anyhow::Error::from)?;
    let ledger = Ledger::open(&config.data_dir.join("ledger.redb")).map_err(ledger_err)?;

    let evaluator = match &config.alarm_endpoint {
        Some(endpoint) => HealthEvaluator::new(Arc::new(HttpAlarmGateway::new(endpoint.clone()))),
        None => HealthEvaluator::new(Arc::new(StoreAlarmGateway::new(store.clone()))),
    };
    let coordinator = Coordinator::new(
        ledger.clone(),
        Arc::new(StorePublisher::new(store.clone())),
        Arc::new(StoreRouter::new(store.clone())),
        evaluator,
    );

    Ok(Context {
        store,
        ledger,
        coordinator,
    })
}

/// Abort channel flipped by Ctrl-C. The running attempt notices at the next
/// phase boundary or poll tick and rolls back gracefully.
pub fn spawn_ctrl_c_abort() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("abort signal received, rolling back at the next safe point");
        let _ = tx.send(true);
    });
    rx
}

/// Print the terminal attempt and write its report artifact. Rolled-back,
/// aborted, and failed outcomes still get a report; the error (and its exit
/// code) passes through.
pub fn finish(
    ctx: &Context,
    outcome: DeployResult<DeploymentAttempt>,
    report_dir: &Path,
) -> DeployResult<()> {
    match outcome {
        Ok(attempt) => {
            write_report(ctx, &attempt.attempt_id, report_dir);
            print_attempt(&attempt);
            Ok(())
        }
        Err(err) => {
            if let Some(attempt_id) = err.attempt_id() {
                write_report(ctx, attempt_id, report_dir);
                if let Ok(Some(attempt)) = ctx.ledger.get_attempt(attempt_id) {
                    print_attempt(&attempt);
                }
            }
            Err(err)
        }
    }
}

fn write_report(ctx: &Context, attempt_id: &str, dir: &Path) {
    match DeploymentReport::from_ledger(&ctx.ledger, attempt_id).and_then(|r| r.write_to_dir(dir))
    {
        Ok(path) => eprintln!("report written to {}", path.display()),
        Err(e) => warn!(%attempt_id, error = %e, "could not write report artifact"),
    }
}

pub(crate) fn print_attempt(attempt: &DeploymentAttempt) {
    match serde_json::to_string_pretty(attempt) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!(error = %e, "could not serialize attempt"),
    }
}

/// Store errors caused by operator input map to `Setup`; the rest are
/// infrastructure failures.
pub(crate) fn store_err(e: StateError) -> DeployError {
    match e {
        StateError::TargetNotFound(_) | StateError::TargetExists(_) | StateError::InvalidRule(_) => {
            DeployError::Setup(e.to_string())
        }
        other => DeployError::Infra(other.into()),
    }
}

pub(crate) fn ledger_err(e: LedgerError) -> DeployError {
    DeployError::Ledger(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PerchConfig;

    #[test]
    fn context_opens_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = PerchConfig {
            data_dir: dir.path().join("data"),
            ..PerchConfig::default()
        };

        let ctx = context(&config).unwrap();
        target::add(&ctx, "api", "builds/api-v1.zip", vec!["api-errors".into()]).unwrap();
        let record = ctx.store.get_target("api").unwrap().unwrap();
        assert_eq!(record.alarm_names, vec!["api-errors".to_string()]);
        drop(ctx);

        let ctx = context(&config).unwrap();
        assert_eq!(ctx.store.list_targets().unwrap().len(), 1);
    }

    #[test]
    fn operator_mistakes_map_to_setup() {
        let err = store_err(StateError::TargetNotFound("ghost".into()));
        assert_eq!(err.exit_code(), 2);
        let err = store_err(StateError::Open("disk".into()));
        assert_eq!(err.exit_code(), 1);
    }
}
