//! TargetStore — redb-backed deployment substrate.
//!
//! Holds provisioned targets, their published revisions, the weighted
//! routing rule per target, and alarm states written by the monitoring
//! feed. All values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use sha2::{Digest, Sha256};
use tracing::debug;

use perch_core::types::{AlarmState, AlarmStatus, Revision, RoutingRule, epoch_secs};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::TargetRecord;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Content digest for an artifact reference: sha256 of the file bytes when
/// the reference is a readable path, otherwise of the reference string
/// itself. Publish idempotency keys off this digest.
pub fn artifact_digest(artifact_ref: &str) -> String {
    let mut hasher = Sha256::new();
    match std::fs::read(artifact_ref) {
        Ok(bytes) => hasher.update(&bytes),
        Err(_) => hasher.update(artifact_ref.as_bytes()),
    }
    hex::encode(hasher.finalize())
}

/// Key for one revision record. Zero-padding keeps ids in publish order.
fn revision_key(target: &str, id: u32) -> String {
    format!("{target}:{id:08}")
}

/// Thread-safe target store backed by redb.
#[derive(Clone)]
pub struct TargetStore {
    db: Arc<Database>,
}

impl TargetStore {
    /// Open (or create) a persistent target store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "target store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory target store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory target store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TARGETS).map_err(map_err!(Table))?;
        txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        txn.open_table(ROUTES).map_err(map_err!(Table))?;
        txn.open_table(ALARMS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Targets ────────────────────────────────────────────────────

    /// Provision a new target: publish its baseline revision and install
    /// the initial routing rule (baseline at 100%). One write transaction,
    /// so a target never exists half-provisioned.
    pub fn provision_target(
        &self,
        name: &str,
        baseline_artifact: &str,
        alarm_names: Vec<String>,
    ) -> StateResult<TargetRecord> {
        let now = epoch_secs();
        let revision = Revision {
            id: "1".to_string(),
            content_digest: artifact_digest(baseline_artifact),
            created_at: now,
            description: format!("baseline: {baseline_artifact}"),
        };
        let record = TargetRecord {
            name: name.to_string(),
            baseline_revision_id: revision.id.clone(),
            alarm_names,
            created_at: now,
        };
        let route = RoutingRule::single(name, revision.id.clone());

        let record_value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let revision_value = serde_json::to_vec(&revision).map_err(map_err!(Serialize))?;
        let route_value = serde_json::to_vec(&route).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let exists;
        {
            let mut targets = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            exists = targets.get(name).map_err(map_err!(Read))?.is_some();
            if !exists {
                targets
                    .insert(name, record_value.as_slice())
                    .map_err(map_err!(Write))?;
                let mut revisions = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
                revisions
                    .insert(revision_key(name, 1).as_str(), revision_value.as_slice())
                    .map_err(map_err!(Write))?;
                let mut routes = txn.open_table(ROUTES).map_err(map_err!(Table))?;
                routes
                    .insert(name, route_value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        if exists {
            return Err(StateError::TargetExists(name.to_string()));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(target = %name, "target provisioned");
        Ok(record)
    }

    /// Get a target record by name.
    pub fn get_target(&self, name: &str) -> StateResult<Option<TargetRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: TargetRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all provisioned targets.
    pub fn list_targets(&self) -> StateResult<Vec<TargetRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: TargetRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Revisions ──────────────────────────────────────────────────

    /// Publish an artifact as a revision of `target`.
    ///
    /// Idempotent by content digest: republishing an artifact the target
    /// already has returns the existing revision instead of minting a new
    /// id. New revisions get the next monotonic numeric id.
    pub fn publish_revision(
        &self,
        target: &str,
        artifact_ref: &str,
        description: &str,
    ) -> StateResult<Revision> {
        let digest = artifact_digest(artifact_ref);
        let prefix = format!("{target}:");

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let published;
        {
            let targets = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            if targets.get(target).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::TargetNotFound(target.to_string()));
            }

            let mut revisions = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            let mut existing = None;
            let mut max_id = 0u32;
            for entry in revisions.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                let revision: Revision =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                max_id = max_id.max(revision.id.parse::<u32>().unwrap_or(0));
                if revision.content_digest == digest {
                    existing = Some(revision);
                }
            }

            published = match existing {
                Some(revision) => {
                    debug!(target = %target, id = %revision.id, "artifact already published");
                    revision
                }
                None => {
                    let id = max_id + 1;
                    let revision = Revision {
                        id: id.to_string(),
                        content_digest: digest,
                        created_at: epoch_secs(),
                        description: description.to_string(),
                    };
                    let value = serde_json::to_vec(&revision).map_err(map_err!(Serialize))?;
                    revisions
                        .insert(revision_key(target, id).as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    debug!(target = %target, id = %revision.id, "revision published");
                    revision
                }
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(published)
    }

    /// List all revisions of a target, in publish order.
    pub fn list_revisions(&self, target: &str) -> StateResult<Vec<Revision>> {
        let prefix = format!("{target}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let revision: Revision =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(revision);
            }
        }
        Ok(results)
    }

    // ── Routes ─────────────────────────────────────────────────────

    /// Current routing rule for a target.
    pub fn get_route(&self, target: &str) -> StateResult<Option<RoutingRule>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROUTES).map_err(map_err!(Table))?;
        match table.get(target).map_err(map_err!(Read))? {
            Some(guard) => {
                let rule: RoutingRule =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }

    /// Replace the routing rule for `rule.target`. Rejects rules that break
    /// the weighted-alias invariants and unknown targets; the single write
    /// transaction means no observable intermediate state.
    pub fn put_route(&self, rule: &RoutingRule) -> StateResult<()> {
        rule.validate().map_err(StateError::InvalidRule)?;
        let value = serde_json::to_vec(rule).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let targets = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            if targets.get(rule.target.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::TargetNotFound(rule.target.clone()));
            }
            let mut routes = txn.open_table(ROUTES).map_err(map_err!(Table))?;
            routes
                .insert(rule.target.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            target = %rule.target,
            primary = %rule.primary_revision_id,
            primary_weight = rule.primary_weight,
            canary_weight = rule.canary_weight,
            "route updated"
        );
        Ok(())
    }

    // ── Alarms ─────────────────────────────────────────────────────

    /// Record the current state of an alarm, stamped with now. Written by
    /// the monitoring feed (or `perch alarm set` in local use).
    pub fn set_alarm(&self, name: &str, state: AlarmState) -> StateResult<()> {
        let status = AlarmStatus {
            state,
            timestamp: epoch_secs(),
        };
        let value = serde_json::to_vec(&status).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ALARMS).map_err(map_err!(Table))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(alarm = %name, state = %state, "alarm state recorded");
        Ok(())
    }

    /// Last recorded state of an alarm, if the feed ever reported one.
    pub fn get_alarm(&self, name: &str) -> StateResult<Option<AlarmStatus>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALARMS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let status: AlarmStatus =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// All recorded alarms with their last state.
    pub fn list_alarms(&self) -> StateResult<Vec<(String, AlarmStatus)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALARMS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let status: AlarmStatus =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((key.value().to_string(), status));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioned_store() -> TargetStore {
        let store = TargetStore::open_in_memory().unwrap();
        store
            .provision_target("api", "builds/api-v1.zip", vec!["api-errors".to_string()])
            .unwrap();
        store
    }

    // ── Provisioning ───────────────────────────────────────────────

    #[test]
    fn provision_installs_baseline_and_route() {
        let store = provisioned_store();

        let record = store.get_target("api").unwrap().unwrap();
        assert_eq!(record.baseline_revision_id, "1");
        assert_eq!(record.alarm_names, vec!["api-errors".to_string()]);

        let revisions = store.list_revisions("api").unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].id, "1");

        let route = store.get_route("api").unwrap().unwrap();
        assert_eq!(route, RoutingRule::single("api", "1"));
    }

    #[test]
    fn provision_twice_fails() {
        let store = provisioned_store();
        let err = store
            .provision_target("api", "builds/api-v1.zip", Vec::new())
            .unwrap_err();
        assert!(matches!(err, StateError::TargetExists(_)));
        // The original provisioning is untouched.
        assert_eq!(store.list_revisions("api").unwrap().len(), 1);
    }

    #[test]
    fn list_targets_sees_all() {
        let store = provisioned_store();
        store
            .provision_target("web", "builds/web-v1.zip", Vec::new())
            .unwrap();
        assert_eq!(store.list_targets().unwrap().len(), 2);
    }

    // ── Revisions ──────────────────────────────────────────────────

    #[test]
    fn publish_assigns_monotonic_ids() {
        let store = provisioned_store();

        let rev2 = store
            .publish_revision("api", "builds/api-v2.zip", "v2")
            .unwrap();
        assert_eq!(rev2.id, "2");

        let rev3 = store
            .publish_revision("api", "builds/api-v3.zip", "v3")
            .unwrap();
        assert_eq!(rev3.id, "3");

        let ids: Vec<String> = store
            .list_revisions("api")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn publish_same_artifact_is_idempotent() {
        let store = provisioned_store();

        let first = store
            .publish_revision("api", "builds/api-v2.zip", "v2")
            .unwrap();
        let second = store
            .publish_revision("api", "builds/api-v2.zip", "republished")
            .unwrap();

        assert_eq!(second, first);
        assert_eq!(store.list_revisions("api").unwrap().len(), 2);
    }

    #[test]
    fn publish_to_unknown_target_fails() {
        let store = TargetStore::open_in_memory().unwrap();
        let err = store
            .publish_revision("ghost", "builds/x.zip", "")
            .unwrap_err();
        assert!(matches!(err, StateError::TargetNotFound(_)));
    }

    #[test]
    fn digest_of_file_contents_when_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, b"payload-a").unwrap();
        let by_path = artifact_digest(path.to_str().unwrap());

        std::fs::write(&path, b"payload-b").unwrap();
        let changed = artifact_digest(path.to_str().unwrap());
        assert_ne!(by_path, changed);

        // Unreadable references hash the reference string itself.
        assert_eq!(
            artifact_digest("oci://registry/app:v1"),
            artifact_digest("oci://registry/app:v1")
        );
        assert_ne!(
            artifact_digest("oci://registry/app:v1"),
            artifact_digest("oci://registry/app:v2")
        );
    }

    // ── Routes ─────────────────────────────────────────────────────

    #[test]
    fn route_update_and_readback() {
        let store = provisioned_store();
        store
            .publish_revision("api", "builds/api-v2.zip", "v2")
            .unwrap();

        let split = RoutingRule::split("api", "1", "2", 10);
        store.put_route(&split).unwrap();
        assert_eq!(store.get_route("api").unwrap(), Some(split));
    }

    #[test]
    fn route_rejects_invalid_weights() {
        let store = provisioned_store();
        let mut rule = RoutingRule::split("api", "1", "2", 10);
        rule.primary_weight = 80;
        assert!(matches!(
            store.put_route(&rule),
            Err(StateError::InvalidRule(_))
        ));
        // The provisioned route is untouched.
        assert_eq!(
            store.get_route("api").unwrap(),
            Some(RoutingRule::single("api", "1"))
        );
    }

    #[test]
    fn route_rejects_unknown_target() {
        let store = TargetStore::open_in_memory().unwrap();
        let rule = RoutingRule::single("ghost", "1");
        assert!(matches!(
            store.put_route(&rule),
            Err(StateError::TargetNotFound(_))
        ));
    }

    // ── Alarms ─────────────────────────────────────────────────────

    #[test]
    fn alarm_set_and_get() {
        let store = TargetStore::open_in_memory().unwrap();
        assert!(store.get_alarm("api-errors").unwrap().is_none());

        store.set_alarm("api-errors", AlarmState::Ok).unwrap();
        let status = store.get_alarm("api-errors").unwrap().unwrap();
        assert_eq!(status.state, AlarmState::Ok);

        store.set_alarm("api-errors", AlarmState::Alarm).unwrap();
        let status = store.get_alarm("api-errors").unwrap().unwrap();
        assert_eq!(status.state, AlarmState::Alarm);
    }

    #[test]
    fn alarm_list_all() {
        let store = TargetStore::open_in_memory().unwrap();
        store.set_alarm("api-errors", AlarmState::Ok).unwrap();
        store.set_alarm("api-latency", AlarmState::InsufficientData).unwrap();
        assert_eq!(store.list_alarms().unwrap().len(), 2);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = TargetStore::open(&db_path).unwrap();
            store
                .provision_target("api", "builds/api-v1.zip", Vec::new())
                .unwrap();
        }

        // Reopen the same database file.
        let store = TargetStore::open(&db_path).unwrap();
        assert!(store.get_target("api").unwrap().is_some());
        assert!(store.get_route("api").unwrap().is_some());
    }
}
