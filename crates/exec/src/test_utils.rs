//! Scripted collaborators for executor tests

use crate::bridge::{FieldDef, FormatHistory, Record};
use crate::error::{Error, Result};
use crate::executor::ddl::DdlNode;
use crate::request::{CompiledRequest, RecordKey, RequestFactory, RequestInput, Row};
use crate::context::SessionContext;
use crate::timer::CancellationToken;
use crate::transaction::{
    SavepointId, Transaction, TransactionManager, TransactionOptions, TransactionRef,
};
use keel_common::TransactionId;
use keel_value::{DataType, Value};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Write log shared by transactions, requests and DDL nodes
#[derive(Debug, Default)]
pub struct TestStore {
    pending: Mutex<HashMap<TransactionId, Vec<String>>>,
    committed: Mutex<Vec<String>>,
}

impl TestStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn write(&self, txn: TransactionId, entry: impl Into<String>) {
        self.pending.lock().entry(txn).or_default().push(entry.into());
    }

    /// Uncommitted writes of `txn`
    pub fn writes(&self, txn: TransactionId) -> Vec<String> {
        self.pending.lock().get(&txn).cloned().unwrap_or_default()
    }

    pub fn committed(&self) -> Vec<String> {
        self.committed.lock().clone()
    }

    fn mark(&self, txn: TransactionId) -> usize {
        self.pending.lock().get(&txn).map_or(0, Vec::len)
    }

    fn truncate(&self, txn: TransactionId, len: usize) {
        if let Some(writes) = self.pending.lock().get_mut(&txn) {
            writes.truncate(len);
        }
    }

    fn commit(&self, txn: TransactionId) {
        let writes = self.pending.lock().remove(&txn).unwrap_or_default();
        self.committed.lock().extend(writes);
    }
}

#[derive(Debug)]
struct Savepoint {
    id: SavepointId,
    name: Option<String>,
    mark: usize,
}

#[derive(Debug, Default)]
struct TxnState {
    active: bool,
    savepoints: Vec<Savepoint>,
    next_savepoint: SavepointId,
    snapshot_refreshes: u32,
}

#[derive(Debug)]
pub struct TestTransaction {
    id: TransactionId,
    options: TransactionOptions,
    store: Arc<TestStore>,
    state: Mutex<TxnState>,
}

impl TestTransaction {
    pub fn new(store: &Arc<TestStore>, options: TransactionOptions) -> Arc<Self> {
        Arc::new(Self {
            id: TransactionId::new(),
            options,
            store: Arc::clone(store),
            state: Mutex::new(TxnState {
                active: true,
                ..TxnState::default()
            }),
        })
    }

    pub fn read_committed(store: &Arc<TestStore>) -> Arc<Self> {
        Self::new(store, TransactionOptions::read_committed())
    }

    pub fn writes(&self) -> Vec<String> {
        self.store.writes(self.id)
    }

    pub fn snapshot_refreshes(&self) -> u32 {
        self.state.lock().snapshot_refreshes
    }

    pub fn savepoint_count(&self) -> usize {
        self.state.lock().savepoints.len()
    }

    fn position(state: &TxnState, id: SavepointId) -> Result<usize> {
        state
            .savepoints
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| Error::Internal(format!("unknown savepoint {}", id)))
    }
}

impl Transaction for TestTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn options(&self) -> TransactionOptions {
        self.options.clone()
    }

    fn is_active(&self) -> bool {
        self.state.lock().active
    }

    fn start_savepoint(&self, name: Option<&str>) -> Result<SavepointId> {
        let mark = self.store.mark(self.id);
        let mut state = self.state.lock();
        state.next_savepoint += 1;
        let id = state.next_savepoint;
        state.savepoints.push(Savepoint {
            id,
            name: name.map(str::to_string),
            mark,
        });
        Ok(id)
    }

    fn release_savepoint(&self, id: SavepointId) -> Result<()> {
        let mut state = self.state.lock();
        let position = Self::position(&state, id)?;
        state.savepoints.truncate(position);
        Ok(())
    }

    fn rollback_savepoint(&self, id: SavepointId) -> Result<()> {
        let mut state = self.state.lock();
        let position = Self::position(&state, id)?;
        let mark = state.savepoints[position].mark;
        state.savepoints.truncate(position);
        self.store.truncate(self.id, mark);
        Ok(())
    }

    fn find_savepoint(&self, name: &str) -> Option<SavepointId> {
        let state = self.state.lock();
        state
            .savepoints
            .iter()
            .rev()
            .find(|s| s.name.as_deref() == Some(name))
            .map(|s| s.id)
    }

    fn refresh_snapshot(&self) -> Result<()> {
        self.state.lock().snapshot_refreshes += 1;
        Ok(())
    }

    fn commit(&self, retaining: bool) -> Result<()> {
        self.store.commit(self.id);
        let mut state = self.state.lock();
        state.savepoints.clear();
        state.active = retaining;
        Ok(())
    }

    fn rollback(&self, retaining: bool) -> Result<()> {
        self.store.truncate(self.id, 0);
        let mut state = self.state.lock();
        state.savepoints.clear();
        state.active = retaining;
        Ok(())
    }
}

#[derive(Debug)]
pub struct TestManager {
    store: Arc<TestStore>,
    begun: Mutex<Vec<Arc<TestTransaction>>>,
}

impl TestManager {
    pub fn new(store: &Arc<TestStore>) -> Arc<Self> {
        Arc::new(Self {
            store: Arc::clone(store),
            begun: Mutex::new(Vec::new()),
        })
    }

    pub fn begun(&self) -> usize {
        self.begun.lock().len()
    }
}

impl TransactionManager for TestManager {
    fn begin(&self, options: TransactionOptions) -> Result<TransactionRef> {
        let txn = TestTransaction::new(&self.store, options);
        self.begun.lock().push(Arc::clone(&txn));
        Ok(txn)
    }
}

/// Where a scripted request reports an update conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAt {
    /// In `start`, after writing the first row
    Start,
    /// While producing the given 1-based row
    Row(u64),
}

/// Shared script of a statement: how many rows it has and which
/// conflicts it hits. Each queued conflict fires once.
#[derive(Debug)]
pub struct Script {
    pub store: Arc<TestStore>,
    rows: u64,
    conflicts: Mutex<VecDeque<ConflictAt>>,
    always_conflict: bool,
    slow_from: Option<u64>,
    starts: AtomicU32,
    current_of: Mutex<Vec<RecordKey>>,
    history: Arc<FormatHistory>,
}

impl Script {
    pub fn new(store: &Arc<TestStore>, rows: u64) -> Self {
        Self {
            store: Arc::clone(store),
            rows,
            conflicts: Mutex::new(VecDeque::new()),
            always_conflict: false,
            slow_from: None,
            starts: AtomicU32::new(0),
            current_of: Mutex::new(Vec::new()),
            history: Arc::new(FormatHistory::new(vec![FieldDef::new(
                "id",
                DataType::Integer,
            )])),
        }
    }

    pub fn with_conflicts(self, conflicts: impl IntoIterator<Item = ConflictAt>) -> Self {
        *self.conflicts.lock() = conflicts.into_iter().collect();
        self
    }

    pub fn queue_conflict(&self, at: ConflictAt) {
        self.conflicts.lock().push_back(at);
    }

    pub fn always_conflicting(mut self) -> Self {
        self.always_conflict = true;
        self
    }

    /// Rows from `row` on take long enough to trip a short timeout
    pub fn slow_from(mut self, row: u64) -> Self {
        self.slow_from = Some(row);
        self
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Keys handed to the request through `WHERE CURRENT OF`
    pub fn current_of(&self) -> Vec<RecordKey> {
        self.current_of.lock().clone()
    }

    fn conflict(&self, at: ConflictAt) -> Result<()> {
        if self.always_conflict {
            return Err(Error::UpdateConflict("record is locked".to_string()));
        }
        let mut conflicts = self.conflicts.lock();
        if conflicts.front() == Some(&at) {
            conflicts.pop_front();
            return Err(Error::UpdateConflict(format!("conflict at {:?}", at)));
        }
        Ok(())
    }

    fn row(&self, n: u64) -> Row {
        Row {
            records: vec![Some(Record {
                history: Arc::clone(&self.history),
                version: 0,
                values: vec![Value::I32(n as i32)],
            })],
            keys: vec![RecordKey::new(0, "T", n)],
        }
    }
}

#[derive(Debug)]
pub struct ScriptedFactory {
    script: Arc<Script>,
    /// Writes one entry per row in `start` instead of returning rows
    command: bool,
}

impl ScriptedFactory {
    pub fn query(script: &Arc<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::clone(script),
            command: false,
        })
    }

    pub fn command(script: &Arc<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::clone(script),
            command: true,
        })
    }
}

impl RequestFactory for ScriptedFactory {
    fn compile(&self) -> Result<Box<dyn CompiledRequest>> {
        Ok(Box::new(ScriptedRequest {
            script: Arc::clone(&self.script),
            command: self.command,
            produced: 0,
            affected: 0,
            running: false,
        }))
    }
}

#[derive(Debug)]
struct ScriptedRequest {
    script: Arc<Script>,
    command: bool,
    produced: u64,
    affected: u64,
    running: bool,
}

impl CompiledRequest for ScriptedRequest {
    fn start(&mut self, transaction: &TransactionRef, input: RequestInput<'_>) -> Result<()> {
        let script = &self.script;
        script.starts.fetch_add(1, Ordering::SeqCst);
        self.produced = 0;
        self.affected = 0;
        if let Some(key) = input.current_of {
            script.current_of.lock().push(key.clone());
        }

        if self.command {
            for n in 1..=script.rows {
                script.store.write(transaction.id(), format!("row {}", n));
                if n == 1 {
                    script.conflict(ConflictAt::Start)?;
                }
                self.affected += 1;
            }
        } else {
            script.conflict(ConflictAt::Start)?;
        }
        self.running = true;
        Ok(())
    }

    fn receive(
        &mut self,
        transaction: &TransactionRef,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>> {
        if !self.running || self.command || self.produced == self.script.rows {
            return Ok(None);
        }
        let n = self.produced + 1;
        if self.script.slow_from.is_some_and(|slow| n >= slow) {
            std::thread::sleep(Duration::from_millis(200));
        }
        cancel.check()?;

        self.script.store.write(transaction.id(), format!("lock {}", n));
        self.script.conflict(ConflictAt::Row(n))?;
        self.produced = n;
        Ok(Some(self.script.row(n)))
    }

    fn records_affected(&self) -> u64 {
        self.affected
    }

    fn unwind(&mut self) {
        self.running = false;
    }
}

/// DDL node that logs a write and optionally fails afterwards
#[derive(Debug)]
pub struct TestDdl {
    pub store: Arc<TestStore>,
    pub fail: bool,
}

impl DdlNode for TestDdl {
    fn execute(&self, _ctx: &SessionContext, transaction: &TransactionRef) -> Result<()> {
        self.store.write(transaction.id(), "create table");
        if self.fail {
            return Err(Error::Execution("table T already exists".to_string()));
        }
        Ok(())
    }
}
