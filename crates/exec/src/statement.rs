//! Prepared statements
//!
//! A `Statement` is immutable once prepared and shared by every executor
//! created from it.

use crate::bridge::OutputItem;
use crate::executor::ddl::DdlNode;
use crate::executor::session::SessionCommand;
use crate::executor::transaction::TransactionCommand;
use crate::request::RequestFactory;
use std::sync::Arc;

/// Statement type as reported by statement info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Select,
    SelectForUpdate,
    Insert,
    Update,
    Delete,
    Ddl,
    StartTransaction,
    Commit,
    Rollback,
    Savepoint,
    SetSession,
}

impl StatementType {
    /// Wire code for the statement type info item
    pub fn code(self) -> i32 {
        match self {
            StatementType::Select => 1,
            StatementType::Insert => 2,
            StatementType::Update => 3,
            StatementType::Delete => 4,
            StatementType::Ddl => 5,
            StatementType::StartTransaction => 9,
            StatementType::Commit => 10,
            StatementType::Rollback => 11,
            StatementType::SelectForUpdate => 12,
            StatementType::SetSession => 13,
            StatementType::Savepoint => 14,
        }
    }
}

/// `WHERE CURRENT OF <name>` target of a positioned update or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRef {
    pub name: String,
    /// Relation whose record key is taken from the cursor's current row
    pub relation: String,
}

#[derive(Debug, Clone)]
pub struct DmlBody {
    pub request: Arc<dyn RequestFactory>,
    pub outputs: Vec<OutputItem>,
    pub has_result_set: bool,
    pub cursor_ref: Option<CursorRef>,
    /// Runs in its own transaction, committed when the statement completes
    pub autonomous: bool,
}

impl DmlBody {
    /// A statement that returns rows
    pub fn query(request: Arc<dyn RequestFactory>, outputs: Vec<OutputItem>) -> Self {
        Self {
            request,
            outputs,
            has_result_set: true,
            cursor_ref: None,
            autonomous: false,
        }
    }

    /// A statement that only changes data
    pub fn command(request: Arc<dyn RequestFactory>) -> Self {
        Self {
            request,
            outputs: Vec::new(),
            has_result_set: false,
            cursor_ref: None,
            autonomous: false,
        }
    }

    pub fn with_cursor_ref(mut self, name: impl Into<String>, relation: impl Into<String>) -> Self {
        self.cursor_ref = Some(CursorRef {
            name: name.into(),
            relation: relation.into(),
        });
        self
    }

    pub fn autonomous(mut self) -> Self {
        self.autonomous = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum StatementBody {
    Dml(DmlBody),
    Ddl(Arc<dyn DdlNode>),
    Transaction(TransactionCommand),
    Session(SessionCommand),
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementType,
    pub sql: String,
    pub body: StatementBody,
    /// Statement-level timeout in milliseconds (0 = none)
    pub timeout_ms: u32,
}

impl Statement {
    pub fn dml(kind: StatementType, sql: impl Into<String>, body: DmlBody) -> Self {
        Self::new(kind, sql, StatementBody::Dml(body))
    }

    pub fn ddl(sql: impl Into<String>, node: Arc<dyn DdlNode>) -> Self {
        Self::new(StatementType::Ddl, sql, StatementBody::Ddl(node))
    }

    pub fn transaction(sql: impl Into<String>, command: TransactionCommand) -> Self {
        let kind = command.statement_type();
        Self::new(kind, sql, StatementBody::Transaction(command))
    }

    pub fn session(sql: impl Into<String>, command: SessionCommand) -> Self {
        Self::new(StatementType::SetSession, sql, StatementBody::Session(command))
    }

    fn new(kind: StatementType, sql: impl Into<String>, body: StatementBody) -> Self {
        Self {
            kind,
            sql: sql.into(),
            body,
            timeout_ms: 0,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Whether executing the statement yields rows to fetch
    pub fn has_result_set(&self) -> bool {
        matches!(&self.body, StatementBody::Dml(body) if body.has_result_set)
    }
}
