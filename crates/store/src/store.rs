//! The shared table store and per-transaction bookkeeping
//!
//! All state lives behind one lock. Each active transaction keeps its
//! snapshot, an undo log of everything it changed and a stack of
//! savepoints marking positions in that log.

use crate::error::{Error, Result};
use crate::storage::{CommitLog, ReadView, Table, Version};
use crate::transaction::StoreTransaction;
use keel_common::TransactionId;
use keel_exec::{FieldDef, FormatHistory, Isolation, Record, SavepointId, TransactionOptions};
use keel_value::Value;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug)]
enum Undo {
    Version { table: String, record: u64 },
    CreateTable(String),
    DropTable(String, Table),
    AlterTable { table: String, history: Arc<FormatHistory> },
}

#[derive(Debug)]
struct Savepoint {
    id: SavepointId,
    name: Option<String>,
    mark: usize,
}

#[derive(Debug)]
struct TxnState {
    options: TransactionOptions,
    snapshot: u64,
    undo: Vec<Undo>,
    savepoints: Vec<Savepoint>,
    next_savepoint: SavepointId,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: BTreeMap<String, Table>,
    log: CommitLog,
    active: HashMap<TransactionId, TxnState>,
    /// One-shot conflicts armed by `inject_conflict`
    injected: HashSet<(String, u64)>,
}

impl StoreState {
    fn txn(&self, txn: TransactionId) -> Result<&TxnState> {
        self.active.get(&txn).ok_or(Error::TransactionNotActive(txn))
    }

    fn txn_mut(&mut self, txn: TransactionId) -> Result<&mut TxnState> {
        self.active
            .get_mut(&txn)
            .ok_or(Error::TransactionNotActive(txn))
    }

    fn view(&self, txn: TransactionId) -> Result<ReadView> {
        let state = self.txn(txn)?;
        let snapshot = match state.options.isolation {
            // Plain read committed sees every commit as soon as it happens
            Isolation::ReadCommitted {
                read_consistency: false,
            } => self.log.sequence(),
            _ => state.snapshot,
        };
        Ok(ReadView { txn, snapshot })
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Fail unless `txn` may put a new version on top of `record`
    fn check_write(&mut self, txn: TransactionId, table: &str, record: u64) -> Result<()> {
        let conflict = || Error::UpdateConflict {
            table: table.to_string(),
            record,
        };
        if self.injected.remove(&(table.to_string(), record)) {
            return Err(conflict());
        }

        let view = self.view(txn)?;
        let head = self
            .table(table)?
            .head(record)
            .ok_or_else(|| Error::RecordNotFound {
                table: table.to_string(),
                record,
            })?;
        if !view.sees(head, &self.log) {
            // Uncommitted foreign version, or committed after our snapshot
            return Err(conflict());
        }
        if head.values.is_none() {
            return Err(Error::RecordNotFound {
                table: table.to_string(),
                record,
            });
        }
        Ok(())
    }

    fn push_version(
        &mut self,
        txn: TransactionId,
        table: &str,
        record: u64,
        values: Option<Vec<Value>>,
    ) -> Result<()> {
        let target = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;
        target.push(
            record,
            Version {
                values,
                format: target.format(),
                created_by: txn,
            },
        );
        self.txn_mut(txn)?.undo.push(Undo::Version {
            table: table.to_string(),
            record,
        });
        Ok(())
    }

    fn undo(&mut self, txn: TransactionId, entry: Undo) {
        match entry {
            Undo::Version { table, record } => {
                if let Some(target) = self.tables.get_mut(&table) {
                    target.pop(record, txn);
                }
            }
            Undo::CreateTable(name) => {
                self.tables.remove(&name);
            }
            Undo::DropTable(name, table) => {
                self.tables.insert(name, table);
            }
            Undo::AlterTable { table, history } => {
                if let Some(target) = self.tables.get_mut(&table) {
                    target.history = history;
                }
            }
        }
    }

    /// Undo everything `txn` logged after `mark`, newest first
    fn undo_to(&mut self, txn: TransactionId, mark: usize) -> Result<()> {
        let entries = {
            let state = self.txn_mut(txn)?;
            let mark = mark.min(state.undo.len());
            state.undo.split_off(mark)
        };
        for entry in entries.into_iter().rev() {
            self.undo(txn, entry);
        }
        Ok(())
    }
}

/// In-memory MVCC table store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction with a snapshot of everything committed so far
    pub fn begin_transaction(&self, options: TransactionOptions) -> StoreTransaction {
        let id = TransactionId::new();
        let mut state = self.state.lock();
        let snapshot = state.log.sequence();
        state.active.insert(
            id,
            TxnState {
                options: options.clone(),
                snapshot,
                undo: Vec::new(),
                savepoints: Vec::new(),
                next_savepoint: 0,
            },
        );
        tracing::debug!("Began transaction {} at snapshot {}", id, snapshot);
        StoreTransaction::new(id, options, self.clone())
    }

    /// Make the next write to `record` fail with an update conflict
    pub fn inject_conflict(&self, table: &str, record: u64) {
        self.state.lock().injected.insert((table.to_string(), record));
    }

    pub fn table_names(&self) -> Vec<String> {
        self.state.lock().tables.keys().cloned().collect()
    }

    pub fn history(&self, table: &str) -> Result<Arc<FormatHistory>> {
        Ok(Arc::clone(&self.state.lock().table(table)?.history))
    }

    /// Versions stored for `table`, committed or not
    pub fn version_count(&self, table: &str) -> Result<usize> {
        Ok(self.state.lock().table(table)?.version_count())
    }

    pub fn active_transactions(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn scan(&self, txn: TransactionId, table: &str) -> Result<Vec<(u64, Record)>> {
        let state = self.state.lock();
        let view = state.view(txn)?;
        Ok(state.table(table)?.scan(&view, &state.log))
    }

    pub fn fetch(&self, txn: TransactionId, table: &str, record: u64) -> Result<Option<Record>> {
        let state = self.state.lock();
        let view = state.view(txn)?;
        Ok(state.table(table)?.visible(record, &view, &state.log))
    }

    pub fn insert(&self, txn: TransactionId, table: &str, values: Vec<Value>) -> Result<u64> {
        let mut state = self.state.lock();
        state.txn(txn)?;
        let record = state
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?
            .allocate();
        state.push_version(txn, table, record, Some(values))?;
        Ok(record)
    }

    pub fn update(
        &self,
        txn: TransactionId,
        table: &str,
        record: u64,
        values: Vec<Value>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_write(txn, table, record)?;
        state.push_version(txn, table, record, Some(values))
    }

    pub fn delete(&self, txn: TransactionId, table: &str, record: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.check_write(txn, table, record)?;
        state.push_version(txn, table, record, None)
    }

    /// Claim `record` for `txn` by writing an unchanged copy of it
    pub fn lock(&self, txn: TransactionId, table: &str, record: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.check_write(txn, table, record)?;
        let view = state.view(txn)?;
        let current = state
            .table(table)?
            .visible(record, &view, &state.log)
            .ok_or_else(|| Error::RecordNotFound {
                table: table.to_string(),
                record,
            })?;
        state.push_version(txn, table, record, Some(current.values))
    }

    pub fn create_table(&self, txn: TransactionId, name: &str, fields: Vec<FieldDef>) -> Result<()> {
        let mut state = self.state.lock();
        state.txn(txn)?;
        if state.tables.contains_key(name) {
            return Err(Error::TableExists(name.to_string()));
        }
        state.tables.insert(name.to_string(), Table::new(fields));
        state.txn_mut(txn)?.undo.push(Undo::CreateTable(name.to_string()));
        Ok(())
    }

    /// Add a field to the table's format; existing records keep their
    /// format version
    pub fn add_column(&self, txn: TransactionId, table: &str, field: FieldDef) -> Result<()> {
        let mut state = self.state.lock();
        state.txn(txn)?;
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;

        let current = target.history.current();
        if current.fields.iter().any(|f| f.name == field.name) {
            return Err(Error::ColumnExists {
                table: table.to_string(),
                column: field.name,
            });
        }
        let mut fields = current.fields.clone();
        fields.push(field);
        let next = Arc::new(target.history.with_format(fields));
        let previous = std::mem::replace(&mut target.history, next);

        state.txn_mut(txn)?.undo.push(Undo::AlterTable {
            table: table.to_string(),
            history: previous,
        });
        Ok(())
    }

    pub fn drop_table(&self, txn: TransactionId, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.txn(txn)?;
        let table = state
            .tables
            .remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        state.txn_mut(txn)?.undo.push(Undo::DropTable(name.to_string(), table));
        Ok(())
    }

    pub(crate) fn is_active(&self, txn: TransactionId) -> bool {
        self.state.lock().active.contains_key(&txn)
    }

    pub(crate) fn start_savepoint(&self, txn: TransactionId, name: Option<&str>) -> Result<SavepointId> {
        let mut state = self.state.lock();
        let txn_state = state.txn_mut(txn)?;
        txn_state.next_savepoint += 1;
        let id = txn_state.next_savepoint;
        let mark = txn_state.undo.len();
        txn_state.savepoints.push(Savepoint {
            id,
            name: name.map(str::to_string),
            mark,
        });
        Ok(id)
    }

    fn savepoint_position(state: &TxnState, id: SavepointId) -> Result<usize> {
        state
            .savepoints
            .iter()
            .position(|s| s.id == id)
            .ok_or(Error::UnknownSavepoint(id))
    }

    /// Forget the savepoint and those started after it, keeping the work
    pub(crate) fn release_savepoint(&self, txn: TransactionId, id: SavepointId) -> Result<()> {
        let mut state = self.state.lock();
        let txn_state = state.txn_mut(txn)?;
        let position = Self::savepoint_position(txn_state, id)?;
        txn_state.savepoints.truncate(position);
        Ok(())
    }

    /// Undo the work done since the savepoint and forget it
    pub(crate) fn rollback_savepoint(&self, txn: TransactionId, id: SavepointId) -> Result<()> {
        let mut state = self.state.lock();
        let txn_state = state.txn_mut(txn)?;
        let position = Self::savepoint_position(txn_state, id)?;
        let mark = txn_state.savepoints[position].mark;
        txn_state.savepoints.truncate(position);
        state.undo_to(txn, mark)
    }

    pub(crate) fn find_savepoint(&self, txn: TransactionId, name: &str) -> Option<SavepointId> {
        let state = self.state.lock();
        let txn_state = state.active.get(&txn)?;
        txn_state
            .savepoints
            .iter()
            .rev()
            .find(|s| s.name.as_deref() == Some(name))
            .map(|s| s.id)
    }

    /// Move a read-consistency transaction's snapshot to the latest commit.
    /// Other isolation levels keep the snapshot they started with.
    pub(crate) fn refresh_snapshot(&self, txn: TransactionId) -> Result<()> {
        let mut state = self.state.lock();
        let sequence = state.log.sequence();
        let txn_state = state.txn_mut(txn)?;
        if let Isolation::ReadCommitted { .. } = txn_state.options.isolation {
            txn_state.snapshot = sequence;
        }
        Ok(())
    }

    pub(crate) fn commit(&self, txn: TransactionId, retaining: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.txn(txn)?;
        let seq = state.log.commit(txn);

        if retaining {
            // Work continues under a new snapshot that includes our commit
            let txn_state = state.txn_mut(txn)?;
            txn_state.undo.clear();
            txn_state.savepoints.clear();
            txn_state.snapshot = seq;
        } else {
            state.active.remove(&txn);
        }
        tracing::debug!("Committed transaction {} as {}", txn, seq);
        Ok(())
    }

    pub(crate) fn rollback(&self, txn: TransactionId, retaining: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.undo_to(txn, 0)?;

        if retaining {
            let sequence = state.log.sequence();
            let txn_state = state.txn_mut(txn)?;
            txn_state.savepoints.clear();
            txn_state.snapshot = sequence;
        } else {
            state.active.remove(&txn);
        }
        tracing::debug!("Rolled back transaction {}", txn);
        Ok(())
    }
}
