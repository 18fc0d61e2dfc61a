//! Ledger — redb-backed append-only event store for deployment attempts.
//!
//! One table holds every event, keyed `{attempt_id}:{sequence:08}` so that a
//! key-ordered scan yields each attempt's records in append order. Records
//! are JSON-serialized [`LedgerEntry`] values and are never updated or
//! deleted. The single-flight rule (at most one non-terminal attempt per
//! target) is enforced inside the same write transaction that appends the
//! `STARTED` record, so it holds across concurrent coordinators and process
//! restarts.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use perch_core::types::{
    AttemptStatus, DeploymentAttempt, HealthSample, epoch_secs,
};

use crate::error::{LedgerError, LedgerResult};
use crate::event::{LedgerEntry, LedgerEvent};

/// Deployment events keyed by `{attempt_id}:{sequence:08}`.
const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");

/// Convert any `Display` error into a `LedgerError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| LedgerError::$variant(e.to_string())
    };
}

/// Key for one event record. Zero-padding keeps sequences in key order.
fn event_key(attempt_id: &str, sequence: u32) -> String {
    format!("{attempt_id}:{sequence:08}")
}

/// Thread-safe deployment ledger backed by redb.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
}

impl Ledger {
    /// Open (or create) a persistent ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!(?path, "ledger opened");
        Ok(ledger)
    }

    /// Create an ephemeral in-memory ledger (for testing).
    pub fn open_in_memory() -> LedgerResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!("in-memory ledger opened");
        Ok(ledger)
    }

    /// Create the events table if it doesn't exist yet.
    fn ensure_tables(&self) -> LedgerResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Appending ──────────────────────────────────────────────────

    /// Record the `STARTED` event for a new attempt, enforcing single-flight.
    ///
    /// The scan for an existing non-terminal attempt on the same target and
    /// the insert of the `STARTED` record happen in one write transaction;
    /// redb serializes writers, so two concurrent starts cannot both win.
    pub fn begin_attempt(&self, attempt: &DeploymentAttempt) -> LedgerResult<()> {
        let entry = LedgerEntry {
            attempt_id: attempt.attempt_id.clone(),
            sequence: 0,
            timestamp: attempt.started_at,
            event: LedgerEvent::Started {
                attempt: attempt.clone(),
            },
        };
        let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let refusal = {
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            match scan_open_attempt(&table, &attempt.target)? {
                Some(holder) => Some(LedgerError::Conflict {
                    target: attempt.target.clone(),
                    attempt_id: holder,
                }),
                None => {
                    let key = event_key(&attempt.attempt_id, 0);
                    let previous = table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    previous.is_some().then(|| {
                        LedgerError::Write(format!(
                            "attempt id already recorded: {}",
                            attempt.attempt_id
                        ))
                    })
                }
            }
        };
        // Dropping the transaction without commit discards the insert.
        if let Some(err) = refusal {
            return Err(err);
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(attempt_id = %attempt.attempt_id, target = %attempt.target, "attempt started");
        Ok(())
    }

    /// Append one event to an attempt's sequence, returning the sequence
    /// number assigned. Fails on unknown attempts and refuses to append past
    /// a terminal event; it never fails silently.
    pub fn append(&self, attempt_id: &str, event: LedgerEvent) -> LedgerResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let sequence;
        {
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            let prefix = format!("{attempt_id}:");
            let mut next = None;
            let mut closed = false;
            for item in table.iter().map_err(map_err!(Read))? {
                let (key, value) = item.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                let recorded: LedgerEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                next = Some(recorded.sequence + 1);
                closed = closed || recorded.event.is_terminal();
            }
            let Some(next) = next else {
                return Err(LedgerError::NotFound(attempt_id.to_string()));
            };
            if closed {
                return Err(LedgerError::Terminal(attempt_id.to_string()));
            }
            sequence = next;
            let entry = LedgerEntry {
                attempt_id: attempt_id.to_string(),
                sequence,
                timestamp: epoch_secs(),
                event,
            };
            let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
            let key = event_key(attempt_id, sequence);
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(sequence)
    }

    // ── Reading & replay ───────────────────────────────────────────

    /// All entries for an attempt, in sequence order.
    pub fn entries(&self, attempt_id: &str) -> LedgerResult<Vec<LedgerEntry>> {
        let prefix = format!("{attempt_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for item in table.iter().map_err(map_err!(Read))? {
            let (key, value) = item.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let entry: LedgerEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(entry);
            }
        }
        Ok(results)
    }

    /// Reconstruct an attempt by replaying its events in order.
    pub fn get_attempt(&self, attempt_id: &str) -> LedgerResult<Option<DeploymentAttempt>> {
        Ok(replay(&self.entries(attempt_id)?))
    }

    /// The newest non-terminal attempt for a target, if one exists.
    pub fn active_attempt(&self, target: &str) -> LedgerResult<Option<DeploymentAttempt>> {
        let attempts = self.replay_target(target)?;
        Ok(attempts
            .into_iter()
            .filter(|a| !a.status.is_terminal())
            .max_by_key(|a| a.started_at))
    }

    /// The last known-good revision for a target: the newest `COMPLETED`
    /// attempt's new revision, falling back to the baseline captured by the
    /// earliest attempt when nothing ever completed.
    pub fn last_good_revision(&self, target: &str) -> LedgerResult<Option<String>> {
        let attempts = self.replay_target(target)?;
        let completed = attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Completed)
            .max_by_key(|a| a.ended_at.unwrap_or(a.started_at));
        if let Some(attempt) = completed {
            return Ok(Some(attempt.new_revision_id.clone()));
        }
        Ok(attempts
            .iter()
            .min_by_key(|a| a.started_at)
            .map(|a| a.previous_revision_id.clone()))
    }

    /// Attempts for a target, newest first, up to `limit`.
    pub fn attempts_for_target(
        &self,
        target: &str,
        limit: usize,
    ) -> LedgerResult<Vec<DeploymentAttempt>> {
        let mut attempts = self.replay_target(target)?;
        attempts.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        attempts.truncate(limit);
        Ok(attempts)
    }

    /// Every health sample recorded for an attempt, in poll order.
    pub fn samples(&self, attempt_id: &str) -> LedgerResult<Vec<HealthSample>> {
        let samples = self
            .entries(attempt_id)?
            .into_iter()
            .filter_map(|entry| match entry.event {
                LedgerEvent::HealthSample { sample } => Some(sample),
                _ => None,
            })
            .collect();
        Ok(samples)
    }

    /// Replay every attempt recorded for a target.
    fn replay_target(&self, target: &str) -> LedgerResult<Vec<DeploymentAttempt>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
        let mut attempts: Vec<DeploymentAttempt> = Vec::new();
        // Key order groups each attempt's events together in sequence order,
        // so replay can fold into the most recently seeded attempt.
        for item in table.iter().map_err(map_err!(Read))? {
            let (_, value) = item.map_err(map_err!(Read))?;
            let entry: LedgerEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            match entry.event {
                LedgerEvent::Started { attempt } if attempt.target == target => {
                    attempts.push(attempt);
                }
                event => {
                    if let Some(attempt) = attempts
                        .iter_mut()
                        .find(|a| a.attempt_id == entry.attempt_id)
                    {
                        apply(attempt, &event, entry.timestamp);
                    }
                }
            }
        }
        Ok(attempts)
    }
}

/// Scan for a non-terminal attempt on `target`. Works on whichever table
/// handle the caller holds, so `begin_attempt` can run it inside its own
/// write transaction. Key order guarantees each attempt's `STARTED` record
/// precedes its terminal record, but attempts themselves may interleave, so
/// open attempts are tracked as a set.
fn scan_open_attempt(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    target: &str,
) -> LedgerResult<Option<String>> {
    let mut open = std::collections::BTreeSet::new();
    for item in table.iter().map_err(map_err!(Read))? {
        let (_, value) = item.map_err(map_err!(Read))?;
        let entry: LedgerEntry =
            serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        match &entry.event {
            LedgerEvent::Started { attempt } if attempt.target == target => {
                open.insert(entry.attempt_id.clone());
            }
            event if event.is_terminal() => {
                open.remove(&entry.attempt_id);
            }
            _ => {}
        }
    }
    Ok(open.into_iter().next())
}

/// Fold an ordered entry list into the attempt it describes. `None` when the
/// list has no `STARTED` seed.
fn replay(entries: &[LedgerEntry]) -> Option<DeploymentAttempt> {
    let mut iter = entries.iter();
    let mut attempt = match iter.next()?.event {
        LedgerEvent::Started { ref attempt } => attempt.clone(),
        _ => return None,
    };
    for entry in iter {
        apply(&mut attempt, &entry.event, entry.timestamp);
    }
    Some(attempt)
}

/// Apply one replayed event to the reconstructed attempt.
fn apply(attempt: &mut DeploymentAttempt, event: &LedgerEvent, timestamp: u64) {
    match event {
        LedgerEvent::PhaseAdvanced { phase_index, .. } => {
            attempt.current_phase_index = *phase_index;
            attempt.status = AttemptStatus::Phase {
                index: *phase_index,
            };
        }
        LedgerEvent::Started { .. } | LedgerEvent::HealthSample { .. } => {}
        terminal => {
            if let Some(status) = terminal.terminal_status() {
                attempt.status = status;
                attempt.ended_at = Some(timestamp);
                attempt.termination_reason = terminal.reason().map(str::to_string);
            }
        }
    }
}
