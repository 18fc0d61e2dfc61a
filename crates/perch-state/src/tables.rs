//! redb table definitions for the local target backend.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Revision keys zero-pad the numeric id so a prefix scan yields
//! publish order.

use redb::TableDefinition;

/// Target records keyed by `{name}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Published revisions keyed by `{target}:{id:08}`.
pub const REVISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("revisions");

/// Routing rules keyed by `{target}`.
pub const ROUTES: TableDefinition<&str, &[u8]> = TableDefinition::new("routes");

/// Alarm states keyed by `{alarm_name}`.
pub const ALARMS: TableDefinition<&str, &[u8]> = TableDefinition::new("alarms");
