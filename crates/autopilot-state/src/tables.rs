//! redb table definitions for the Autopilot state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Per-target keys follow `{target_id}:{zero-padded number}` so a
//! lexicographic range scan returns one target's records in order.

use redb::TableDefinition;

/// Policies keyed by `{policy_id}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Control state keyed by `{target_id}`.
pub const CONTROL: TableDefinition<&str, &[u8]> = TableDefinition::new("control");

/// Audit records keyed by `{target_id}:{sequence:020}`.
pub const AUDIT: TableDefinition<&str, &[u8]> = TableDefinition::new("audit");

/// Metric snapshots keyed by `{target_id}:{timestamp:020}`.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Counters keyed by name.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in [`META`] holding the last assigned audit sequence number.
pub const AUDIT_SEQUENCE: &str = "audit_sequence";
