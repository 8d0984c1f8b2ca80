//! StateStore: redb-backed persistence for Autopilot.
//!
//! Implements every repository trait over a single redb database. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use autopilot_core::{AuditRecord, ControlState, Decision, MetricSnapshot, Outcome, Policy};

use crate::error::{StateError, StateResult};
use crate::repository::{
    AuditRepository, ControlRepository, PolicyRepository, SnapshotRepository,
};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Key range covering every `{target_id}:...` key.
fn target_range(target_id: &str) -> (String, String) {
    // ';' is the byte after ':'.
    (format!("{target_id}:"), format!("{target_id};"))
}

/// Target ids may contain ':', the numeric suffix never does.
fn key_belongs_to(key: &str, target_id: &str) -> bool {
    key.rsplit_once(':').is_some_and(|(t, _)| t == target_id)
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(CONTROL).map_err(map_err!(Table))?;
        txn.open_table(AUDIT).map_err(map_err!(Table))?;
        txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    fn delete_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Records of one target in key order, optionally only the last `limit`.
    fn list_for_target<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        target_id: &str,
        limit: Option<usize>,
    ) -> StateResult<Vec<T>> {
        let (start, end) = target_range(target_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let limit = limit.unwrap_or(usize::MAX);
        let mut results = Vec::new();
        // Walk newest first so `limit` keeps the most recent entries.
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            if results.len() >= limit {
                break;
            }
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key_belongs_to(key.value(), target_id) {
                continue;
            }
            let item: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        results.reverse();
        Ok(results)
    }
}

// ── Policies ───────────────────────────────────────────────────────

impl PolicyRepository for StateStore {
    fn put_policy(&self, policy: &Policy) -> StateResult<()> {
        self.put_json(POLICIES, &policy.id, policy)?;
        debug!(policy = %policy.id, "policy stored");
        Ok(())
    }

    fn get_policy(&self, id: &str) -> StateResult<Option<Policy>> {
        self.get_json(POLICIES, id)
    }

    fn list_policies(&self) -> StateResult<Vec<Policy>> {
        self.list_json(POLICIES)
    }

    fn delete_policy(&self, id: &str) -> StateResult<bool> {
        let existed = self.delete_key(POLICIES, id)?;
        debug!(policy = %id, existed, "policy deleted");
        Ok(existed)
    }
}

// ── Control state ──────────────────────────────────────────────────

impl ControlRepository for StateStore {
    fn put_control_state(&self, state: &ControlState) -> StateResult<()> {
        self.put_json(CONTROL, &state.target_id, state)
    }

    fn get_control_state(&self, target_id: &str) -> StateResult<Option<ControlState>> {
        self.get_json(CONTROL, target_id)
    }

    fn list_control_states(&self) -> StateResult<Vec<ControlState>> {
        self.list_json(CONTROL)
    }
}

// ── Audit ──────────────────────────────────────────────────────────

impl StateStore {
    /// Assign the next sequence number and write the record inside `txn`.
    fn write_audit(
        txn: &WriteTransaction,
        decision: &Decision,
        outcome: &Outcome,
    ) -> StateResult<AuditRecord> {
        let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
        let last = meta
            .get(AUDIT_SEQUENCE)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let sequence = last + 1;
        meta.insert(AUDIT_SEQUENCE, sequence)
            .map_err(map_err!(Write))?;

        let record = AuditRecord {
            sequence,
            decision: decision.clone(),
            outcome: outcome.clone(),
        };
        let key = record.table_key();
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let mut table = txn.open_table(AUDIT).map_err(map_err!(Table))?;
        table
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(record)
    }
}

impl AuditRepository for StateStore {
    fn append_audit(&self, decision: &Decision, outcome: &Outcome) -> StateResult<AuditRecord> {
        self.commit_decision(decision, outcome, None)
    }

    fn commit_decision(
        &self,
        decision: &Decision,
        outcome: &Outcome,
        control: Option<&ControlState>,
    ) -> StateResult<AuditRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = Self::write_audit(&txn, decision, outcome)?;
        if let Some(state) = control {
            let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(CONTROL).map_err(map_err!(Table))?;
            table
                .insert(state.target_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            target = %record.decision.target_id,
            sequence = record.sequence,
            control = control.map(|c| c.current),
            "audit record appended"
        );
        Ok(record)
    }

    fn list_audit_for_target(&self, target_id: &str) -> StateResult<Vec<AuditRecord>> {
        self.list_for_target(AUDIT, target_id, None)
    }

    fn list_audit(&self) -> StateResult<Vec<AuditRecord>> {
        self.list_json(AUDIT)
    }
}

// ── Snapshots ──────────────────────────────────────────────────────

impl SnapshotRepository for StateStore {
    fn put_snapshot(&self, snapshot: &MetricSnapshot, keep: usize) -> StateResult<()> {
        let key = snapshot.table_key();
        let value = serde_json::to_vec(snapshot).map_err(map_err!(Serialize))?;
        let target_id = snapshot.target_id.as_str();
        let keep = keep.max(1);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let trimmed;
        {
            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let (start, end) = target_range(target_id);
            let keys: Vec<String> = table
                .range(start.as_str()..end.as_str())
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    key_belongs_to(&k, target_id).then_some(k)
                })
                .collect();

            trimmed = keys.len().saturating_sub(keep);
            for key in &keys[..trimmed] {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if trimmed > 0 {
            debug!(target = %target_id, trimmed, "snapshot history trimmed");
        }
        Ok(())
    }

    fn list_snapshots_for_target(
        &self,
        target_id: &str,
        limit: usize,
    ) -> StateResult<Vec<MetricSnapshot>> {
        self.list_for_target(SNAPSHOTS, target_id, Some(limit))
    }
}
