//! Store-backed implementations of the substrate traits.
//!
//! These make a [`TargetStore`] usable wherever the orchestrator expects a
//! publisher, router, or alarm gateway, which is how everything runs in
//! local mode.

use async_trait::async_trait;

use perch_core::traits::{AlarmGateway, RevisionPublisher, TrafficRouter};
use perch_core::types::{AlarmState, AlarmStatus, Revision, RoutingRule, epoch_secs};

use crate::store::TargetStore;

/// [`RevisionPublisher`] over the local store.
#[derive(Clone)]
pub struct StorePublisher {
    store: TargetStore,
}

impl StorePublisher {
    pub fn new(store: TargetStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RevisionPublisher for StorePublisher {
    async fn publish(&self, target: &str, artifact_ref: &str) -> Result<Revision, anyhow::Error> {
        let revision = self.store.publish_revision(target, artifact_ref, artifact_ref)?;
        Ok(revision)
    }
}

/// [`TrafficRouter`] over the local store.
#[derive(Clone)]
pub struct StoreRouter {
    store: TargetStore,
}

impl StoreRouter {
    pub fn new(store: TargetStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TrafficRouter for StoreRouter {
    async fn set_weights(&self, rule: &RoutingRule) -> Result<(), anyhow::Error> {
        self.store.put_route(rule)?;
        Ok(())
    }

    async fn current_weights(&self, target: &str) -> Result<RoutingRule, anyhow::Error> {
        self.store
            .get_route(target)?
            .ok_or_else(|| anyhow::anyhow!("no routing rule for target {target}"))
    }
}

/// [`AlarmGateway`] over the local store.
///
/// An alarm the feed has never written reads as `INSUFFICIENT_DATA`, the
/// same answer a real monitoring system gives for a brand-new alarm.
#[derive(Clone)]
pub struct StoreAlarmGateway {
    store: TargetStore,
}

impl StoreAlarmGateway {
    pub fn new(store: TargetStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AlarmGateway for StoreAlarmGateway {
    async fn alarm_state(&self, name: &str) -> Result<AlarmStatus, anyhow::Error> {
        match self.store.get_alarm(name)? {
            Some(status) => Ok(status),
            None => Ok(AlarmStatus {
                state: AlarmState::InsufficientData,
                timestamp: epoch_secs(),
            }),
        }
    }
}
