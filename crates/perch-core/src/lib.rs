//! Perch core — domain types, phase plans, collaborator traits.
//!
//! This crate defines everything the rest of the workspace agrees on: the
//! revision/routing/attempt data model, phase-plan validation, the deployment
//! error taxonomy with its exit-code mapping, and the three async traits
//! behind which the deployment substrate (publisher, router, alarm source)
//! is plugged in.
//!
//! # Components
//!
//! - **`types`** — Revision, RoutingRule, PhasePlan, DeploymentAttempt,
//!   alarm/verdict vocabulary
//! - **`error`** — `DeployError` taxonomy and exit codes
//! - **`traits`** — `RevisionPublisher`, `TrafficRouter`, `AlarmGateway`

pub mod error;
pub mod traits;
pub mod types;

pub use error::{DeployError, DeployResult};
pub use traits::{AlarmGateway, RevisionPublisher, TrafficRouter};
pub use types::{
    AlarmState, AlarmStatus, AttemptStatus, DeployOptions, DeploymentAttempt, HealthSample,
    PhasePlan, PhaseStep, Revision, RoutingRule, Verdict, epoch_secs,
};
