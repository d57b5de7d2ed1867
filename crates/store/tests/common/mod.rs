//! Common test utilities for store integration tests
#![allow(dead_code)]

use keel_exec::{
    CursorFlags, DmlBody, ExecConfig, Executor, Expression, FieldDef, OutMessage, Outcome,
    OutputItem, Result, SessionContext, Statement, StatementType, TransactionOptions,
    Transaction, TransactionManager, TransactionRef,
};
use keel_message::{Format, FormatBuilder};
use keel_store::{CreateTable, Insert, MemoryStore, Scan};
use keel_value::{DataType, Value};
use std::sync::Arc;

pub const PEOPLE: &str = "PEOPLE";

/// Store, session and the session's current transaction
pub struct TestContext {
    pub store: MemoryStore,
    pub ctx: SessionContext,
    pub txn: Option<TransactionRef>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(ExecConfig::for_testing())
    }

    pub fn with_config(config: ExecConfig) -> Self {
        let store = MemoryStore::new();
        let ctx = SessionContext::new(config, Arc::new(store.clone()));
        Self {
            store,
            ctx,
            txn: None,
        }
    }

    /// Begin a read committed transaction with read consistency
    pub fn begin(&mut self) {
        self.begin_with(TransactionOptions::read_committed());
    }

    pub fn begin_with(&mut self, options: TransactionOptions) {
        self.txn = Some(self.store.begin(options).unwrap());
    }

    pub fn commit(&mut self) {
        if let Some(txn) = self.txn.take() {
            txn.commit(false).unwrap();
        }
    }

    pub fn rollback(&mut self) {
        if let Some(txn) = self.txn.take() {
            txn.rollback(false).unwrap();
        }
    }

    pub fn prepare(&self, statement: Statement) -> Executor {
        Executor::new(Arc::new(statement), &self.ctx).unwrap()
    }

    /// Execute a statement that returns no rows
    pub fn exec(&mut self, statement: Statement) -> Result<Outcome> {
        let mut executor = Executor::new(Arc::new(statement), &self.ctx)?;
        executor.execute(&mut self.ctx, &mut self.txn, None, None, false)
    }

    /// Execute a query and fetch every row, decoded through `format`
    pub fn query(&mut self, statement: Statement, format: &Format) -> Result<Vec<Vec<Value>>> {
        let mut executor = Executor::new(Arc::new(statement), &self.ctx)?;
        executor.execute(&mut self.ctx, &mut self.txn, None, None, false)?;

        let mut rows = Vec::new();
        let mut message = format.new_message();
        while executor.fetch(OutMessage {
            format,
            data: &mut message,
        })? {
            rows.push(format.read_row(&message)?);
        }
        Ok(rows)
    }

    /// Open a cursor over all people
    pub fn open_people(&mut self, flags: CursorFlags) -> Executor {
        let mut executor = self.prepare(select_people(&self.store));
        executor
            .open_cursor(&mut self.ctx, &mut self.txn, None, &people_format(), flags)
            .unwrap();
        executor
    }

    /// Create PEOPLE (ID not null, NAME) holding `count` people, committed
    pub fn create_people(&mut self, count: i32) {
        self.begin();
        self.exec(Statement::ddl(
            "CREATE TABLE PEOPLE (ID INTEGER NOT NULL, NAME VARCHAR(32))",
            Arc::new(CreateTable {
                store: self.store.clone(),
                name: PEOPLE.to_string(),
                fields: vec![
                    FieldDef::new("ID", DataType::Integer).not_null(),
                    FieldDef::new("NAME", DataType::Text),
                ],
            }),
        ))
        .unwrap();
        for id in 1..=count {
            self.exec(insert_person(&self.store, id, &format!("person {}", id)))
                .unwrap();
        }
        self.commit();
    }
}

pub fn people_format() -> Format {
    FormatBuilder::new().long(0).varying(32).build().unwrap()
}

pub fn select_people(store: &MemoryStore) -> Statement {
    Statement::dml(
        StatementType::Select,
        "SELECT ID, NAME FROM PEOPLE",
        DmlBody::query(
            Arc::new(Scan::new(store, PEOPLE)),
            vec![OutputItem::field(0, 0), OutputItem::field(0, 1)],
        ),
    )
}

pub fn insert_person(store: &MemoryStore, id: i32, name: &str) -> Statement {
    Statement::dml(
        StatementType::Insert,
        "INSERT INTO PEOPLE (ID, NAME) VALUES (?, ?)",
        DmlBody::command(Arc::new(Insert::new(
            store,
            PEOPLE,
            vec![
                (0, Expression::Literal(Value::I32(id))),
                (1, Expression::Literal(Value::from(name))),
            ],
        ))),
    )
}

pub fn person(id: i32, name: &str) -> Vec<Value> {
    vec![Value::I32(id), Value::from(name)]
}
