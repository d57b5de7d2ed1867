//! Compiled request contract
//!
//! A compiled request is the runnable, forward-only form of a DML
//! statement. It is started once per execution and then asked for rows
//! one at a time; everything about scrolling, restarts and messages is
//! layered on top by the executor.

use crate::bridge::Record;
use crate::error::Result;
use crate::timer::CancellationToken;
use crate::transaction::TransactionRef;
use keel_value::Value;
use std::fmt;

/// Identifies the stored record a stream is positioned on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub stream: u16,
    pub relation: String,
    pub record: u64,
}

impl RecordKey {
    pub fn new(stream: u16, relation: impl Into<String>, record: u64) -> Self {
        Self {
            stream,
            relation: relation.into(),
            record,
        }
    }
}

/// The current row of a request: one record per stream plus the keys of
/// the records it was built from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub records: Vec<Option<Record>>,
    pub keys: Vec<RecordKey>,
}

impl Row {
    pub fn key_for(&self, relation: &str) -> Option<&RecordKey> {
        self.keys.iter().find(|k| k.relation == relation)
    }
}

/// Inputs handed to a request when it starts
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestInput<'a> {
    pub params: &'a [Value],
    /// Record the statement targets with `WHERE CURRENT OF`
    pub current_of: Option<&'a RecordKey>,
}

pub trait CompiledRequest: Send + fmt::Debug {
    /// Begin an execution in `transaction`. Data-changing requests without
    /// a result set do all their work here.
    fn start(&mut self, transaction: &TransactionRef, input: RequestInput<'_>) -> Result<()>;

    /// Produce the next row, `None` at end of stream
    fn receive(
        &mut self,
        transaction: &TransactionRef,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>>;

    /// Records inserted, updated or deleted by the last execution. Reset by
    /// `start`, kept across `unwind`.
    fn records_affected(&self) -> u64;

    /// Abandon the current execution, if any
    fn unwind(&mut self);
}

/// Produces a fresh compiled request for each executor of a statement
pub trait RequestFactory: Send + Sync + fmt::Debug {
    fn compile(&self) -> Result<Box<dyn CompiledRequest>>;
}
