//! perch — health-gated canary deployments.
//!
//! Drives a new revision through a phased traffic plan against a deployment
//! target, watching monitoring alarms during each hold and rolling back
//! automatically when health degrades. Every attempt is recorded in an
//! append-only ledger, so interrupted deployments can be resumed and audited.
//!
//! # Usage
//!
//! ```text
//! perch target add --name api --artifact builds/api-v1.zip --alarm api-errors
//! perch deploy --target api --artifact builds/api-v2.zip \
//!     --plan '[{"weight_percent":10,"hold_secs":300},{"weight_percent":50,"hold_secs":300},{"weight_percent":100,"hold_secs":0}]'
//! perch status --target api
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use perch_core::error::DeployResult;
use perch_core::types::DeployOptions;

mod commands;
mod config;

use config::PerchConfig;

#[derive(Parser)]
#[command(
    name = "perch",
    about = "Perch — health-gated canary deployments",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Configuration file (missing file means defaults).
    #[arg(long, global = true, default_value = "perch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy an artifact through a phased traffic plan.
    ///
    /// Runs to a terminal state: Completed, RolledBack, Aborted (Ctrl-C),
    /// or Failed. The terminal attempt is printed as JSON and a report
    /// artifact is written either way.
    Deploy {
        /// Deployment target name.
        #[arg(long)]
        target: String,
        /// Artifact reference (a file path or an opaque reference).
        #[arg(long)]
        artifact: String,
        /// Phase plan as a JSON array:
        /// [{"weight_percent":10,"hold_secs":60},...]
        #[arg(long)]
        plan: String,
        /// Roll back as soon as a health sample degrades.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        rollback_on_alarm: bool,
        /// Treat a hold that produced no monitoring data as a failure.
        #[arg(long)]
        treat_unknown_as_failure: bool,
        /// Seconds between health samples during holds.
        #[arg(long)]
        poll_interval: Option<u64>,
        /// Directory for report artifacts.
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// Resume an attempt interrupted by a crash.
    Resume {
        /// Attempt id, e.g. att-3fb6c02a91d4.
        #[arg(long)]
        attempt: String,
        /// Directory for report artifacts.
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// Restore a target's last known-good revision.
    Rollback {
        #[arg(long)]
        target: String,
        /// Reason recorded in the ledger.
        #[arg(long, default_value = "manual rollback")]
        reason: String,
        /// Push last-known-good weights even with no active attempt.
        #[arg(long)]
        force: bool,
    },
    /// Show a target's routing rule and any active attempt.
    Status {
        #[arg(long)]
        target: String,
    },
    /// List a target's attempts, newest first.
    History {
        #[arg(long)]
        target: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the report document for an attempt.
    Report {
        #[arg(long)]
        attempt: String,
    },
    /// Manage deployment targets (local provisioning stand-in).
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },
    /// Manage alarm states (local monitoring feed).
    Alarm {
        #[command(subcommand)]
        action: AlarmAction,
    },
}

#[derive(Subcommand)]
enum TargetAction {
    /// Provision a target with a baseline artifact.
    Add {
        #[arg(long)]
        name: String,
        /// Baseline artifact reference.
        #[arg(long)]
        artifact: String,
        /// Alarm gating this target's deployments (repeatable).
        #[arg(long = "alarm")]
        alarms: Vec<String>,
    },
    /// List provisioned targets.
    List,
}

#[derive(Subcommand)]
enum AlarmAction {
    /// Record an alarm state.
    Set {
        #[arg(long)]
        name: String,
        /// OK, ALARM, INSUFFICIENT_DATA, or UNKNOWN.
        #[arg(long)]
        state: String,
    },
    /// List recorded alarm states.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,perch=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> DeployResult<()> {
    let config = PerchConfig::load(&cli.config)?;

    match cli.command {
        Commands::Deploy {
            target,
            artifact,
            plan,
            rollback_on_alarm,
            treat_unknown_as_failure,
            poll_interval,
            report_dir,
        } => {
            let ctx = commands::context(&config)?;
            let report_dir = report_dir.unwrap_or_else(|| config.report_dir());
            let options = DeployOptions {
                rollback_on_alarm,
                treat_unknown_as_failure,
                poll_interval_secs: poll_interval.unwrap_or(config.poll_interval_secs),
                ..DeployOptions::default()
            };
            commands::deploy::deploy(&ctx, &target, &artifact, &plan, options, &report_dir).await
        }
        Commands::Resume { attempt, report_dir } => {
            let ctx = commands::context(&config)?;
            let report_dir = report_dir.unwrap_or_else(|| config.report_dir());
            commands::resume::resume(&ctx, &attempt, &report_dir).await
        }
        Commands::Rollback {
            target,
            reason,
            force,
        } => {
            let ctx = commands::context(&config)?;
            commands::rollback::rollback(&ctx, &target, &reason, force).await
        }
        Commands::Status { target } => {
            let ctx = commands::context(&config)?;
            commands::status::status(&ctx, &target)
        }
        Commands::History { target, limit } => {
            let ctx = commands::context(&config)?;
            commands::history::history(&ctx, &target, limit)
        }
        Commands::Report { attempt } => {
            let ctx = commands::context(&config)?;
            commands::report::report(&ctx, &attempt)
        }
        Commands::Target { action } => {
            let ctx = commands::context(&config)?;
            match action {
                TargetAction::Add {
                    name,
                    artifact,
                    alarms,
                } => commands::target::add(&ctx, &name, &artifact, alarms),
                TargetAction::List => commands::target::list(&ctx),
            }
        }
        Commands::Alarm { action } => {
            let ctx = commands::context(&config)?;
            match action {
                AlarmAction::Set { name, state } => commands::alarm::set(&ctx, &name, &state),
                AlarmAction::List => commands::alarm::list(&ctx),
            }
        }
    }
}
