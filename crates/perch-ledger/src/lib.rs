//! Perch deployment ledger — append-only audit trail backed by redb.
//!
//! Every deployment attempt is recorded as an ordered sequence of JSON event
//! records. Entries are only ever appended, never updated or deleted;
//! replaying them reconstructs an attempt's state after a crash, resolves the
//! last known-good revision for rollbacks, and enforces the one-attempt-per-
//! target rule durably across process restarts.
//!
//! # Components
//!
//! - **`event`** — `LedgerEntry` records and the `LedgerEvent` vocabulary
//! - **`ledger`** — the redb-backed `Ledger`: append, replay, queries
//! - **`error`** — `LedgerError`

pub mod error;
pub mod event;
pub mod ledger;

pub use error::{LedgerError, LedgerResult};
pub use event::{LedgerEntry, LedgerEvent};
pub use ledger::Ledger;
