//! Perch deployment engine.
//!
//! Drives a new revision through a phased traffic plan with health-gated
//! holds, writing every step to the audit ledger and restoring the previous
//! revision when anything degrades.
//!
//! # Components
//!
//! - **`coordinator`** — attempt setup, single-flight, resumption, manual
//!   rollback
//! - **`machine`** — the phase state machine: shift, record, hold, finalize
//! - **`rollback`** — verified traffic restoration
//! - **`retry`** — bounded exponential backoff for transient failures
//! - **`report`** — the per-attempt report artifact

pub mod coordinator;
pub mod machine;
pub mod report;
pub mod retry;
pub mod rollback;

pub use coordinator::{Coordinator, StartRequest};
pub use machine::Machine;
pub use report::DeploymentReport;
pub use retry::with_backoff;
pub use rollback::RollbackController;
