//! perch-state — embedded deployment substrate for perch.
//!
//! Models the externally provisioned side of a deployment (targets, their
//! published revisions, the weighted routing rule, and monitoring alarms) in
//! a [redb](https://docs.rs/redb) store, so the orchestrator runs
//! self-contained. Real cloud backends plug in behind the perch-core traits;
//! this crate ships the store-backed implementations used by the CLI and the
//! integration tests.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Revisions use composite keys (`{target}:{id:08}`) for prefix scans in
//! publish order. The `TargetStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod adapters;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use adapters::{StoreAlarmGateway, StorePublisher, StoreRouter};
pub use error::{StateError, StateResult};
pub use store::{TargetStore, artifact_digest};
pub use types::TargetRecord;
