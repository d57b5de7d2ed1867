//! Data manipulation statements and their restart protocol
//!
//! A DML statement may be restarted after an update conflict as long as
//! nothing observable has happened yet: no row has been handed to the
//! caller, no parent cursor is positioned on a row the statement depends
//! on, and the transaction's isolation lets each statement take a fresh
//! snapshot. Every attempt runs inside its own savepoint, so a restarted
//! attempt leaves no trace of the previous one.

use super::retry::{Attempt, with_restarts};
use super::{ExecutorBase, InMessage, OutMessage, Outcome};
use crate::bridge::materialize_row;
use crate::context::SessionContext;
use crate::cursor::{Cursor, CursorFlags, CursorLink, FetchDirection, Fetched, RowSource};
use crate::error::{Error, ErrorKind, Result};
use crate::request::{CompiledRequest, RecordKey, RequestInput, Row};
use crate::statement::DmlBody;
use crate::timer::CancellationToken;
use crate::transaction::{TransactionOptions, TransactionRef};
use keel_message::Format;
use keel_value::Value;
use std::sync::{Arc, Weak};

/// Execution state of a DML request, everything but the cursor
#[derive(Debug)]
pub(crate) struct DmlStream {
    body: DmlBody,
    sql: String,
    request: Box<dyn CompiledRequest>,
    cancel: CancellationToken,
    params: Vec<Value>,
    current_of: Option<RecordKey>,
    /// Cursor a positioned statement depends on
    parent: Option<Weak<CursorLink>>,
    first_row_fetched: bool,
    /// Started and not yet exhausted
    open: bool,
    /// Error that ended the stream; reported again by later fetches
    failed: Option<Error>,
    max_restarts: u32,
}

impl DmlStream {
    fn parent_positioned(&self) -> bool {
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|link| link.is_positioned())
    }

    /// Whether a conflict may still be handled by restarting
    fn need_restarts(&self, transaction: &TransactionRef) -> bool {
        !self.first_row_fetched && !self.parent_positioned() && transaction.allows_restart()
    }

    fn run_once(&mut self, transaction: &TransactionRef, exec: bool, fetch: bool) -> Result<Option<Row>> {
        if exec {
            self.request.unwind();
            let input = RequestInput {
                params: &self.params,
                current_of: self.current_of.as_ref(),
            };
            self.request.start(transaction, input)?;
        }
        if fetch {
            return self.request.receive(transaction, &self.cancel);
        }
        Ok(None)
    }

    /// Run the execute and/or receive phase inside a savepoint, restarting
    /// the whole sequence from scratch after a conflict while restarts are
    /// allowed
    fn execute_receive_with_restarts(
        &mut self,
        transaction: &TransactionRef,
        exec: bool,
        fetch: bool,
    ) -> Result<Option<Row>> {
        let sql = self.sql.clone();
        let cancel = self.cancel.clone();
        with_restarts(self.max_restarts, &sql, &cancel, |attempt| {
            if attempt > 0
                && let Err(e) = transaction.refresh_snapshot()
            {
                return Attempt::Fatal(e);
            }
            let savepoint = match transaction.start_savepoint(None) {
                Ok(savepoint) => savepoint,
                Err(e) => return Attempt::Fatal(e),
            };

            // A restarted attempt always re-executes
            match self.run_once(transaction, exec || attempt > 0, fetch) {
                Ok(row) => {
                    Attempt::from_result(transaction.release_savepoint(savepoint).map(|_| row), false)
                }
                Err(e) => {
                    self.request.unwind();
                    if let Err(undo) = transaction.rollback_savepoint(savepoint) {
                        return Attempt::Fatal(undo);
                    }
                    let restartable = self.need_restarts(transaction);
                    Attempt::from_result(Err(e), restartable)
                }
            }
        })
    }

    /// Next row of the open stream
    fn receive_row(&mut self, transaction: &TransactionRef) -> Result<Option<Row>> {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        if !self.open {
            return Ok(None);
        }
        self.cancel.check()?;

        let result = if self.first_row_fetched {
            self.request.receive(transaction, &self.cancel)
        } else {
            self.execute_receive_with_restarts(transaction, false, true)
        };
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                // A timeout leaves the stream where it was
                if e.kind() != ErrorKind::Timeout {
                    self.request.unwind();
                    self.failed = Some(e.clone());
                }
                return Err(e);
            }
        };

        match &row {
            Some(_) => self.first_row_fetched = true,
            None => {
                self.open = false;
                self.request.unwind();
            }
        }
        Ok(row)
    }

    /// Run the whole statement in transactions of its own, one per attempt
    fn execute_autonomous(
        &mut self,
        ctx: &SessionContext,
        options: TransactionOptions,
        fetch: bool,
    ) -> Result<Option<Row>> {
        let sql = self.sql.clone();
        let cancel = self.cancel.clone();
        let manager = ctx.transaction_manager().clone();

        with_restarts(self.max_restarts, &sql, &cancel, |_| {
            let transaction = match manager.begin(options.clone()) {
                Ok(transaction) => transaction,
                Err(e) => return Attempt::Fatal(e),
            };

            let result = self.run_once(&transaction, true, fetch).and_then(|row| {
                if row.is_some() && self.request.receive(&transaction, &self.cancel)?.is_some() {
                    return Err(Error::MultipleRowsInSingleton);
                }
                Ok(row)
            });
            self.request.unwind();

            match result.and_then(|row| transaction.commit(false).map(|_| row)) {
                Ok(row) => Attempt::Done(row),
                Err(e) => {
                    if let Err(undo) = transaction.rollback(false) {
                        tracing::warn!("Rollback of autonomous transaction failed: {}", undo);
                    }
                    Attempt::from_result(Err(e), true)
                }
            }
        })
    }
}

/// Feeds cursor forward fills from the request
struct Feed<'a> {
    stream: &'a mut DmlStream,
    transaction: Option<&'a TransactionRef>,
    format: &'a Format,
}

impl RowSource for Feed<'_> {
    fn next_row(&mut self, message: &mut [u8], keys: &mut Vec<RecordKey>) -> Result<bool> {
        let transaction = self.transaction.ok_or(Error::TransactionRequired)?;
        match self.stream.receive_row(transaction)? {
            Some(row) => {
                materialize_row(
                    &self.stream.body.outputs,
                    &row,
                    &self.stream.params,
                    self.format,
                    message,
                )?;
                keys.extend(row.keys);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Executor of INSERT, UPDATE, DELETE and SELECT statements
#[derive(Debug)]
pub struct DmlExecutor {
    stream: DmlStream,
    cursor: Option<Cursor>,
    cursor_format: Option<Format>,
}

impl DmlExecutor {
    pub(crate) fn new(
        body: DmlBody,
        sql: String,
        cancel: CancellationToken,
        max_restarts: u32,
    ) -> Result<Self> {
        let request = body.request.compile()?;
        Ok(Self {
            stream: DmlStream {
                body,
                sql,
                request,
                cancel,
                params: Vec::new(),
                current_of: None,
                parent: None,
                first_row_fetched: false,
                open: false,
                failed: None,
                max_restarts,
            },
            cursor: None,
            cursor_format: None,
        })
    }

    pub fn has_result_set(&self) -> bool {
        self.stream.body.has_result_set
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Whether the executor has delivered a row since the last execute
    pub fn first_row_fetched(&self) -> bool {
        self.stream.first_row_fetched
    }

    #[cfg(test)]
    pub(crate) fn current_of(&self) -> Option<&RecordKey> {
        self.stream.current_of.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn has_parent(&self) -> bool {
        self.stream.parent.is_some()
    }

    /// Parent cursor link and the key of its current row, for statements
    /// positioned on a named cursor
    fn resolve_cursor_ref(
        &self,
        ctx: &SessionContext,
    ) -> Result<Option<(Weak<CursorLink>, RecordKey)>> {
        let Some(cursor_ref) = &self.stream.body.cursor_ref else {
            return Ok(None);
        };

        let link = ctx
            .cursors()
            .lookup(&cursor_ref.name)
            .ok_or_else(|| Error::CursorNotFound(cursor_ref.name.clone()))?;
        let key = link
            .key_for(&cursor_ref.relation)
            .ok_or_else(|| Error::CursorNotPositioned(cursor_ref.name.clone()))?;

        Ok(Some((Arc::downgrade(&link), key)))
    }

    pub(crate) fn execute(
        &mut self,
        base: &mut ExecutorBase,
        ctx: &mut SessionContext,
        transaction: Option<&TransactionRef>,
        input: Option<InMessage<'_>>,
        output: Option<OutMessage<'_>>,
        singleton: bool,
    ) -> Result<Outcome> {
        if self.cursor.is_some() {
            return Err(Error::CursorAlreadyOpen);
        }
        let autonomous = self.stream.body.autonomous;
        let has_result_set = self.stream.body.has_result_set;
        if transaction.is_none() && !autonomous {
            return Err(Error::TransactionRequired);
        }
        if has_result_set && singleton && output.is_none() {
            return Err(Error::StatementNotExecutable(
                "singleton execution needs an output message".to_string(),
            ));
        }
        if autonomous && has_result_set && !singleton {
            return Err(Error::StatementNotExecutable(
                "autonomous statements cannot keep a result set open".to_string(),
            ));
        }

        let params = match &input {
            Some(message) => message.format.read_row(message.data)?,
            None => Vec::new(),
        };
        let positioned = self.resolve_cursor_ref(ctx)?;

        self.stream.params = params;
        (self.stream.parent, self.stream.current_of) = positioned.unzip();

        self.stream.request.unwind();
        self.stream.open = false;
        self.stream.failed = None;
        self.stream.first_row_fetched = false;
        self.stream.max_restarts = ctx.config().max_restarts;
        base.setup_timer(ctx)?;

        let result = self.run(ctx, transaction, output, singleton);

        let keep_timer = result.is_ok() && self.stream.open;
        if !keep_timer {
            base.stop_timer();
        }
        if result.is_err() {
            self.stream.request.unwind();
            self.stream.open = false;
        }
        result
    }

    fn run(
        &mut self,
        ctx: &SessionContext,
        transaction: Option<&TransactionRef>,
        output: Option<OutMessage<'_>>,
        singleton: bool,
    ) -> Result<Outcome> {
        let fetch = self.stream.body.has_result_set && singleton;

        if self.stream.body.autonomous {
            let options = transaction.map(|t| t.options()).unwrap_or_default();
            let row = self.stream.execute_autonomous(ctx, options, fetch)?;
            let records_affected = self.stream.request.records_affected();
            return self.deliver_singleton(row, output, records_affected);
        }

        let transaction = transaction.ok_or(Error::TransactionRequired)?;

        if !self.stream.body.has_result_set {
            self.stream.execute_receive_with_restarts(transaction, true, false)?;
            let records_affected = self.stream.request.records_affected();
            self.stream.request.unwind();
            return Ok(Outcome {
                records_affected,
                has_row: false,
            });
        }

        if !singleton {
            // Rows are pulled by fetches; the first one still goes through
            // the restart loop
            self.stream.execute_receive_with_restarts(transaction, true, false)?;
            self.stream.open = true;
            return Ok(Outcome::default());
        }

        let row = self.stream.execute_receive_with_restarts(transaction, true, true)?;
        if row.is_some() {
            self.stream.first_row_fetched = true;
            if self.stream.request.receive(transaction, &self.stream.cancel)?.is_some() {
                self.stream.request.unwind();
                return Err(Error::MultipleRowsInSingleton);
            }
        }
        let records_affected = self.stream.request.records_affected();
        self.stream.request.unwind();
        self.deliver_singleton(row, output, records_affected)
    }

    fn deliver_singleton(
        &mut self,
        row: Option<Row>,
        output: Option<OutMessage<'_>>,
        records_affected: u64,
    ) -> Result<Outcome> {
        let has_row = match (row, output) {
            (Some(row), Some(out)) => {
                materialize_row(
                    &self.stream.body.outputs,
                    &row,
                    &self.stream.params,
                    out.format,
                    out.data,
                )?;
                true
            }
            (Some(_), None) => true,
            (None, _) => false,
        };
        Ok(Outcome {
            records_affected,
            has_row,
        })
    }

    /// Next row of a statement executed without a cursor
    pub(crate) fn fetch(&mut self, transaction: &TransactionRef, output: OutMessage<'_>) -> Result<bool> {
        if self.cursor.is_some() {
            return Err(Error::StatementNotExecutable(
                "rows of an open cursor must be fetched through the cursor".to_string(),
            ));
        }
        match self.stream.receive_row(transaction)? {
            Some(row) => {
                materialize_row(
                    &self.stream.body.outputs,
                    &row,
                    &self.stream.params,
                    output.format,
                    output.data,
                )?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether rows remain to be fetched
    pub(crate) fn is_open(&self) -> bool {
        self.stream.open
    }

    pub(crate) fn open_cursor(&mut self, flags: CursorFlags, format: &Format, ctx: &SessionContext) {
        self.cursor = Some(Cursor::new(flags, format.length, ctx.config().row_cache.clone()));
        self.cursor_format = Some(format.clone());
    }

    pub(crate) fn cursor_fetch(
        &mut self,
        transaction: Option<&TransactionRef>,
        direction: FetchDirection,
        message: &mut [u8],
    ) -> Result<Fetched> {
        let (Some(cursor), Some(format)) = (self.cursor.as_mut(), self.cursor_format.as_ref()) else {
            return Err(Error::CursorNotOpen);
        };
        let mut feed = Feed {
            stream: &mut self.stream,
            transaction,
            format,
        };
        cursor.fetch(direction, &mut feed, message)
    }

    /// Drop the cursor and abandon the request
    pub(crate) fn close_cursor(&mut self) -> Result<()> {
        if self.cursor.take().is_none() {
            return Err(Error::CursorNotOpen);
        }
        self.cursor_format = None;
        self.stream.request.unwind();
        self.stream.open = false;
        Ok(())
    }

    pub(crate) fn cursor_link(&self) -> Option<&Arc<CursorLink>> {
        self.cursor.as_ref().map(Cursor::link)
    }

    pub(crate) fn release(&mut self) {
        self.cursor = None;
        self.cursor_format = None;
        self.stream.request.unwind();
        self.stream.open = false;
        self.stream.parent = None;
    }
}
