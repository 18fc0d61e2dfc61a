//! Collaborator interfaces to the deployment substrate.
//!
//! The orchestrator never talks to a cloud SDK directly; it drives these
//! three traits. The workspace ships store-backed implementations for local
//! use, and real backends plug in behind the same signatures.

use async_trait::async_trait;

use crate::types::{AlarmStatus, Revision, RoutingRule};

/// Publishes artifacts as immutable revisions.
#[async_trait]
pub trait RevisionPublisher: Send + Sync {
    /// Publish `artifact_ref` as a revision of `target`.
    ///
    /// Idempotent: publishing the same artifact again returns the existing
    /// revision instead of minting a new id.
    async fn publish(&self, target: &str, artifact_ref: &str) -> Result<Revision, anyhow::Error>;
}

/// Owns the weighted alias in front of a target's revisions.
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Atomically replace the routing rule for `rule.target`. Implementations
    /// must reject rules that fail [`RoutingRule::validate`]; there is no
    /// observable state where weights do not sum to 100.
    async fn set_weights(&self, rule: &RoutingRule) -> Result<(), anyhow::Error>;

    /// Current routing rule for `target`. An unknown target is an error.
    async fn current_weights(&self, target: &str) -> Result<RoutingRule, anyhow::Error>;
}

/// Read-only view of the monitoring system's alarms.
#[async_trait]
pub trait AlarmGateway: Send + Sync {
    /// Current state of one alarm by name.
    async fn alarm_state(&self, name: &str) -> Result<AlarmStatus, anyhow::Error>;
}
