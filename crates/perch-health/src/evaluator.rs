//! Health evaluation over a set of alarms.
//!
//! The evaluator polls every watched alarm through an [`AlarmGateway`] and
//! folds the answers into one [`HealthSample`]. Queries run concurrently
//! with bounded parallelism and a per-alarm timeout. A query that errors or
//! times out records `UNKNOWN` for that alarm; evaluation itself never
//! fails, the deployment machinery decides what an unknown verdict means.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use perch_core::traits::AlarmGateway;
use perch_core::types::{AlarmState, HealthSample, epoch_secs};

const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Polls alarms and aggregates their states into samples.
#[derive(Clone)]
pub struct HealthEvaluator {
    gateway: Arc<dyn AlarmGateway>,
    limit: Arc<Semaphore>,
    per_alarm_timeout: Duration,
}

impl HealthEvaluator {
    /// Create an evaluator over a gateway with default bounds.
    pub fn new(gateway: Arc<dyn AlarmGateway>) -> Self {
        Self {
            gateway,
            limit: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            per_alarm_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-alarm query timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_alarm_timeout = timeout;
        self
    }

    /// Query every named alarm once and build a sample.
    pub async fn evaluate(&self, alarm_names: &[String]) -> HealthSample {
        let mut handles = Vec::with_capacity(alarm_names.len());
        for name in alarm_names {
            let gateway = Arc::clone(&self.gateway);
            let limit = Arc::clone(&self.limit);
            let timeout = self.per_alarm_timeout;
            let name = name.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limit.acquire_owned().await.ok();
                let state = query_one(gateway.as_ref(), &name, timeout).await;
                (name, state)
            }));
        }

        let mut states = BTreeMap::new();
        for handle in handles {
            match handle.await {
                Ok((name, state)) => {
                    states.insert(name, state);
                }
                Err(e) => {
                    warn!(error = %e, "alarm query task panicked");
                }
            }
        }

        HealthSample::new(epoch_secs(), states)
    }
}

/// One alarm query under a timeout. Errors and timeouts degrade to
/// `UNKNOWN` rather than bubbling up.
async fn query_one(gateway: &dyn AlarmGateway, name: &str, timeout: Duration) -> AlarmState {
    match tokio::time::timeout(timeout, gateway.alarm_state(name)).await {
        Ok(Ok(status)) => status.state,
        Ok(Err(e)) => {
            warn!(alarm = %name, error = %e, "alarm query failed");
            AlarmState::Unknown
        }
        Err(_) => {
            warn!(alarm = %name, timeout_ms = timeout.as_millis() as u64, "alarm query timed out");
            AlarmState::Unknown
        }
    }
}
