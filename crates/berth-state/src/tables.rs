//! redb table definitions for the Berth state store.
//!
//! Record tables use zero-padded `{id:016}` keys so iteration order is
//! creation order. Log lines use `{execution:016}:{stream}:{line:010}`, which
//! doubles as their uniqueness constraint.

use redb::TableDefinition;

/// Sandboxes keyed by id.
pub const SANDBOXES: TableDefinition<&str, &[u8]> = TableDefinition::new("sandboxes");

/// Releases keyed by id.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Executions keyed by id.
pub const EXECUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("executions");

/// Execution log lines keyed by `{execution}:{stream}:{line}`.
pub const LOG_LINES: TableDefinition<&str, &[u8]> = TableDefinition::new("execution_log_lines");

/// Last issued id per record table.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
