//! Verified traffic restoration.
//!
//! Restoring the previous revision is the one operation that must not fail
//! quietly: the controller pushes the restore rule with retries, then reads
//! the rule back and compares. Only a verified restore counts as a rollback;
//! anything else is surfaced as a failure needing manual intervention.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info};

use perch_core::traits::TrafficRouter;
use perch_core::types::RoutingRule;

use crate::retry::{MAX_ATTEMPTS, with_backoff};

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Restores and verifies a target's traffic rule.
#[derive(Clone)]
pub struct RollbackController {
    router: Arc<dyn TrafficRouter>,
    backoff_base: Duration,
}

impl RollbackController {
    pub fn new(router: Arc<dyn TrafficRouter>) -> Self {
        Self {
            router,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// Override the retry base delay (tests use millisecond delays).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Point all traffic for `target` at `revision_id`, then read the rule
    /// back to confirm the router applied it. Both steps retry with backoff;
    /// an error from either means the restore is unverified.
    pub async fn restore_traffic(
        &self,
        target: &str,
        revision_id: &str,
    ) -> Result<(), anyhow::Error> {
        let restore = RoutingRule::single(target, revision_id);
        debug!(%target, revision = %revision_id, "restoring traffic");

        let router = &self.router;
        with_backoff("restore_weights", MAX_ATTEMPTS, self.backoff_base, || {
            router.set_weights(&restore)
        })
        .await
        .with_context(|| format!("pushing restore rule for {target}"))?;

        with_backoff("verify_restore", MAX_ATTEMPTS, self.backoff_base, || async {
            let current = router.current_weights(target).await?;
            if current == restore {
                Ok(())
            } else {
                anyhow::bail!(
                    "router reports primary {}@{} canary {:?}@{}",
                    current.primary_revision_id,
                    current.primary_weight,
                    current.canary_revision_id,
                    current.canary_weight
                )
            }
        })
        .await
        .with_context(|| format!("verifying restore for {target}"))?;

        info!(%target, revision = %revision_id, "traffic restored and verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use perch_state::{StoreRouter, TargetStore};

    fn fast(controller: RollbackController) -> RollbackController {
        controller.with_backoff_base(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn restore_overwrites_a_split() {
        let store = TargetStore::open_in_memory().unwrap();
        store
            .provision_target("api", "builds/api-v1.zip", Vec::new())
            .unwrap();
        store
            .publish_revision("api", "builds/api-v2.zip", "v2")
            .unwrap();
        store
            .put_route(&RoutingRule::split("api", "1", "2", 25))
            .unwrap();

        let controller = fast(RollbackController::new(Arc::new(StoreRouter::new(
            store.clone(),
        ))));
        controller.restore_traffic("api", "1").await.unwrap();

        assert_eq!(
            store.get_route("api").unwrap(),
            Some(RoutingRule::single("api", "1"))
        );
    }

    /// Accepts writes but keeps reporting a stale rule.
    struct StaleRouter;

    #[async_trait]
    impl TrafficRouter for StaleRouter {
        async fn set_weights(&self, _rule: &RoutingRule) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn current_weights(&self, target: &str) -> Result<RoutingRule, anyhow::Error> {
            Ok(RoutingRule::split(target, "1", "2", 50))
        }
    }

    #[tokio::test]
    async fn unverified_restore_is_an_error() {
        let controller = fast(RollbackController::new(Arc::new(StaleRouter)));
        let err = controller.restore_traffic("api", "1").await.unwrap_err();
        assert!(err.to_string().contains("verifying restore"));
    }

    /// Rejects every write.
    struct DownRouter;

    #[async_trait]
    impl TrafficRouter for DownRouter {
        async fn set_weights(&self, _rule: &RoutingRule) -> Result<(), anyhow::Error> {
            anyhow::bail!("router unavailable")
        }

        async fn current_weights(&self, _target: &str) -> Result<RoutingRule, anyhow::Error> {
            anyhow::bail!("router unavailable")
        }
    }

    #[tokio::test]
    async fn unreachable_router_is_an_error() {
        let controller = fast(RollbackController::new(Arc::new(DownRouter)));
        let err = controller.restore_traffic("api", "1").await.unwrap_err();
        assert!(err.to_string().contains("pushing restore rule"));
    }
}
