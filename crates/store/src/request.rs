//! Compiled requests over store tables
//!
//! Factories are the prepared form; every executor compiles its own
//! request from them.

use crate::store::MemoryStore;
use keel_exec::{
    CancellationToken, CompiledRequest, Error, Evaluate, Expression, ItemInfo, Record, RecordKey,
    RequestFactory, RequestInput, Result, Row, TransactionRef, validate,
};
use keel_value::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// `field = value` on the scanned record
#[derive(Debug)]
struct FieldEquals {
    field: usize,
    value: Value,
}

impl Evaluate for FieldEquals {
    fn evaluate(&self, row: &Row, params: &[Value]) -> Result<Value> {
        let field = Expression::Field {
            stream: 0,
            id: self.field,
        }
        .evaluate(row, params)?;
        Ok(Value::Bool(field == self.value))
    }
}

pub fn field_equals(field: usize, value: impl Into<Value>) -> Expression {
    Expression::Custom(Arc::new(FieldEquals {
        field,
        value: value.into(),
    }))
}

fn row_of(table: &str, record: u64, data: Record) -> Row {
    Row {
        records: vec![Some(data)],
        keys: vec![RecordKey::new(0, table, record)],
    }
}

fn matches(filter: Option<&Expression>, row: &Row, params: &[Value]) -> Result<bool> {
    match filter {
        Some(filter) => Ok(filter.evaluate(row, params)? == Value::Bool(true)),
        None => Ok(true),
    }
}

/// Check every value against its field's not-null rule
fn validate_fields(store: &MemoryStore, table: &str, values: &[Value]) -> Result<()> {
    let history = store.history(table)?;
    for (field, value) in history.current().fields.iter().zip(values) {
        let mut info = ItemInfo::new(format!("{}.{}", table, field.name));
        if !field.nullable {
            info = info.not_null();
        }
        validate(&info, value)?;
    }
    Ok(())
}

/// Full scan of a table. With `lock`, every row returned is claimed for
/// the transaction.
#[derive(Debug, Clone)]
pub struct Scan {
    store: MemoryStore,
    table: String,
    filter: Option<Expression>,
    lock: bool,
}

impl Scan {
    pub fn new(store: &MemoryStore, table: impl Into<String>) -> Self {
        Self {
            store: store.clone(),
            table: table.into(),
            filter: None,
            lock: false,
        }
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = Some(filter);
        self
    }

    /// `SELECT ... WITH LOCK`
    pub fn with_lock(mut self) -> Self {
        self.lock = true;
        self
    }
}

impl RequestFactory for Scan {
    fn compile(&self) -> Result<Box<dyn CompiledRequest>> {
        Ok(Box::new(ScanRequest {
            scan: self.clone(),
            pending: VecDeque::new(),
            params: Vec::new(),
        }))
    }
}

#[derive(Debug)]
struct ScanRequest {
    scan: Scan,
    pending: VecDeque<(u64, Record)>,
    params: Vec<Value>,
}

impl CompiledRequest for ScanRequest {
    fn start(&mut self, transaction: &TransactionRef, input: RequestInput<'_>) -> Result<()> {
        transaction.refresh_snapshot()?;
        self.params = input.params.to_vec();
        self.pending = self.scan.store.scan(transaction.id(), &self.scan.table)?.into();
        Ok(())
    }

    fn receive(
        &mut self,
        transaction: &TransactionRef,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>> {
        loop {
            cancel.check()?;
            let Some((record, data)) = self.pending.pop_front() else {
                return Ok(None);
            };
            let row = row_of(&self.scan.table, record, data);
            if !matches(self.scan.filter.as_ref(), &row, &self.params)? {
                continue;
            }
            if self.scan.lock {
                self.scan
                    .store
                    .lock(transaction.id(), &self.scan.table, record)?;
            }
            return Ok(Some(row));
        }
    }

    fn records_affected(&self) -> u64 {
        0
    }

    fn unwind(&mut self) {
        self.pending.clear();
    }
}

/// `INSERT INTO table (...) VALUES (...)`
#[derive(Debug, Clone)]
pub struct Insert {
    store: MemoryStore,
    table: String,
    /// Field id and the expression giving its value; other fields take
    /// their default
    columns: Vec<(usize, Expression)>,
}

impl Insert {
    pub fn new(
        store: &MemoryStore,
        table: impl Into<String>,
        columns: Vec<(usize, Expression)>,
    ) -> Self {
        Self {
            store: store.clone(),
            table: table.into(),
            columns,
        }
    }
}

impl RequestFactory for Insert {
    fn compile(&self) -> Result<Box<dyn CompiledRequest>> {
        Ok(Box::new(InsertRequest {
            insert: self.clone(),
            affected: 0,
        }))
    }
}

#[derive(Debug)]
struct InsertRequest {
    insert: Insert,
    affected: u64,
}

impl CompiledRequest for InsertRequest {
    fn start(&mut self, transaction: &TransactionRef, input: RequestInput<'_>) -> Result<()> {
        self.affected = 0;
        let insert = &self.insert;
        let history = insert.store.history(&insert.table)?;

        let mut values: Vec<Value> = history
            .current()
            .fields
            .iter()
            .map(|f| f.default.clone().unwrap_or(Value::Null))
            .collect();
        let empty = Row::default();
        for (id, expr) in &insert.columns {
            let slot = values.get_mut(*id).ok_or_else(|| {
                Error::Execution(format!("table {} has no field {}", insert.table, id))
            })?;
            *slot = expr.evaluate(&empty, input.params)?;
        }

        validate_fields(&insert.store, &insert.table, &values)?;
        insert
            .store
            .insert(transaction.id(), &insert.table, values)?;
        self.affected = 1;
        Ok(())
    }

    fn receive(&mut self, _: &TransactionRef, _: &CancellationToken) -> Result<Option<Row>> {
        Ok(None)
    }

    fn records_affected(&self) -> u64 {
        self.affected
    }

    fn unwind(&mut self) {}
}

#[derive(Debug, Clone)]
enum Action {
    Update(Vec<(usize, Expression)>),
    Delete,
}

/// Searched or positioned change of a table's records
#[derive(Debug, Clone)]
struct Modify {
    store: MemoryStore,
    table: String,
    filter: Option<Expression>,
    action: Action,
}

impl Modify {
    fn compile(&self) -> Box<dyn CompiledRequest> {
        Box::new(ModifyRequest {
            modify: self.clone(),
            affected: 0,
        })
    }
}

/// `UPDATE table SET ...`, searched or `WHERE CURRENT OF`
#[derive(Debug, Clone)]
pub struct Update(Modify);

impl Update {
    pub fn new(
        store: &MemoryStore,
        table: impl Into<String>,
        assignments: Vec<(usize, Expression)>,
    ) -> Self {
        Self(Modify {
            store: store.clone(),
            table: table.into(),
            filter: None,
            action: Action::Update(assignments),
        })
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.0.filter = Some(filter);
        self
    }
}

impl RequestFactory for Update {
    fn compile(&self) -> Result<Box<dyn CompiledRequest>> {
        Ok(self.0.compile())
    }
}

/// `DELETE FROM table`, searched or `WHERE CURRENT OF`
#[derive(Debug, Clone)]
pub struct Delete(Modify);

impl Delete {
    pub fn new(store: &MemoryStore, table: impl Into<String>) -> Self {
        Self(Modify {
            store: store.clone(),
            table: table.into(),
            filter: None,
            action: Action::Delete,
        })
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.0.filter = Some(filter);
        self
    }
}

impl RequestFactory for Delete {
    fn compile(&self) -> Result<Box<dyn CompiledRequest>> {
        Ok(self.0.compile())
    }
}

#[derive(Debug)]
struct ModifyRequest {
    modify: Modify,
    affected: u64,
}

impl ModifyRequest {
    fn targets(
        &self,
        transaction: &TransactionRef,
        input: &RequestInput<'_>,
    ) -> Result<Vec<(u64, Record)>> {
        let modify = &self.modify;
        let txn = transaction.id();

        if let Some(key) = input.current_of {
            if key.relation != modify.table {
                return Err(Error::Execution(format!(
                    "cursor row has no record of table {}",
                    modify.table
                )));
            }
            let record = modify.store.fetch(txn, &modify.table, key.record)?;
            return Ok(record.map(|r| (key.record, r)).into_iter().collect());
        }

        let mut targets = Vec::new();
        for (record, data) in modify.store.scan(txn, &modify.table)? {
            let row = row_of(&modify.table, record, data);
            if matches(modify.filter.as_ref(), &row, input.params)? {
                targets.extend(row.records.into_iter().flatten().map(|r| (record, r)));
            }
        }
        Ok(targets)
    }
}

impl CompiledRequest for ModifyRequest {
    fn start(&mut self, transaction: &TransactionRef, input: RequestInput<'_>) -> Result<()> {
        self.affected = 0;
        transaction.refresh_snapshot()?;
        let targets = self.targets(transaction, &input)?;
        let modify = &self.modify;

        for (record, data) in targets {
            match &modify.action {
                Action::Update(assignments) => {
                    let mut values = data.upgraded_values();
                    let row = row_of(&modify.table, record, data);
                    for (id, expr) in assignments {
                        let value = expr.evaluate(&row, input.params)?;
                        let slot = values.get_mut(*id).ok_or_else(|| {
                            Error::Execution(format!("table {} has no field {}", modify.table, id))
                        })?;
                        *slot = value;
                    }
                    validate_fields(&modify.store, &modify.table, &values)?;
                    modify
                        .store
                        .update(transaction.id(), &modify.table, record, values)?;
                }
                Action::Delete => {
                    modify
                        .store
                        .delete(transaction.id(), &modify.table, record)?;
                }
            }
            self.affected += 1;
        }

        if self.affected > 0 {
            tracing::debug!("{} records changed in {}", self.affected, modify.table);
        }
        Ok(())
    }

    fn receive(&mut self, _: &TransactionRef, _: &CancellationToken) -> Result<Option<Row>> {
        Ok(None)
    }

    fn records_affected(&self) -> u64 {
        self.affected
    }

    fn unwind(&mut self) {}
}
