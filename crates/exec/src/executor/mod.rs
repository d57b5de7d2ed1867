//! Request executors
//!
//! An `Executor` is the per-use instance of a prepared statement. All
//! statement kinds share one contract (execute, open a cursor, fetch,
//! timeouts, info); capabilities a kind does not have fail with a
//! contract violation instead of being silently ignored.

pub mod ddl;
pub mod dml;
mod retry;
pub mod session;
pub mod transaction;

use crate::context::SessionContext;
use crate::cursor::{CursorFlags, FetchDirection, Fetched};
use crate::error::{Error, Result};
use crate::info::{self, InfoWriter};
use crate::statement::{Statement, StatementBody, StatementType};
use crate::stats::FetchStats;
use crate::timer::{CancellationToken, TimeoutTimer};
use crate::transaction::{Transaction, TransactionRef};
use ddl::DdlExecutor;
use dml::DmlExecutor;
use keel_message::Format;
use session::SessionExecutor;
use std::sync::{Arc, Weak};
use std::time::Instant;
use transaction::TransactionExecutor;

/// An input message: parameters of the statement
#[derive(Debug, Clone, Copy)]
pub struct InMessage<'a> {
    pub format: &'a Format,
    pub data: &'a [u8],
}

/// An output message the executor writes a row into
#[derive(Debug)]
pub struct OutMessage<'a> {
    pub format: &'a Format,
    pub data: &'a mut [u8],
}

/// Result of an execute call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    pub records_affected: u64,
    /// A singleton execution delivered a row
    pub has_row: bool,
}

/// State every executor kind has
#[derive(Debug)]
pub(crate) struct ExecutorBase {
    statement: Arc<Statement>,
    transaction: Option<Weak<dyn Transaction>>,
    cursor_name: Option<String>,
    timeout_ms: u32,
    timer: Option<TimeoutTimer>,
    cancel: CancellationToken,
    fetch_stats: FetchStats,
    records_affected: u64,
    rows_fetched: u64,
}

impl ExecutorBase {
    fn bind(&mut self, transaction: Option<&TransactionRef>) {
        self.transaction = transaction.map(Arc::downgrade);
    }

    fn bound_transaction(&self) -> Option<TransactionRef> {
        self.transaction.as_ref().and_then(Weak::upgrade)
    }

    /// Smallest non-zero of the executor, session and configured timeouts
    fn actual_timeout(&self, ctx: &SessionContext) -> u32 {
        [
            self.timeout_ms,
            ctx.statement_timeout_ms(),
            ctx.config().statement_timeout_ms,
        ]
        .into_iter()
        .filter(|ms| *ms > 0)
        .min()
        .unwrap_or(0)
    }

    pub(crate) fn setup_timer(&mut self, ctx: &SessionContext) -> Result<()> {
        self.stop_timer();
        self.cancel.reset();
        let timeout = self.actual_timeout(ctx);
        if timeout > 0 {
            self.timer = Some(TimeoutTimer::start(timeout, self.cancel.clone())?);
        }
        Ok(())
    }

    pub(crate) fn stop_timer(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
    }
}

/// Closed set of executor kinds
#[derive(Debug)]
pub enum ExecutorKind {
    Dml(DmlExecutor),
    Ddl(DdlExecutor),
    Transaction(TransactionExecutor),
    Session(SessionExecutor),
}

#[derive(Debug)]
pub struct Executor {
    base: ExecutorBase,
    kind: ExecutorKind,
}

impl Executor {
    pub fn new(statement: Arc<Statement>, ctx: &SessionContext) -> Result<Self> {
        let cancel = CancellationToken::new();
        let kind = match &statement.body {
            StatementBody::Dml(body) => ExecutorKind::Dml(DmlExecutor::new(
                body.clone(),
                statement.sql.clone(),
                cancel.clone(),
                ctx.config().max_restarts,
            )?),
            StatementBody::Ddl(node) => ExecutorKind::Ddl(DdlExecutor::new(Arc::clone(node))),
            StatementBody::Transaction(command) => {
                ExecutorKind::Transaction(TransactionExecutor::new(command.clone()))
            }
            StatementBody::Session(command) => {
                ExecutorKind::Session(SessionExecutor::new(command.clone()))
            }
        };

        Ok(Self {
            base: ExecutorBase {
                timeout_ms: statement.timeout_ms,
                statement,
                transaction: None,
                cursor_name: None,
                timer: None,
                cancel,
                fetch_stats: FetchStats::default(),
                records_affected: 0,
                rows_fetched: 0,
            },
            kind,
        })
    }

    pub fn statement(&self) -> &Arc<Statement> {
        &self.base.statement
    }

    pub fn kind(&self) -> &ExecutorKind {
        &self.kind
    }

    /// The transaction the executor is bound to, if it is still alive
    pub fn transaction(&self) -> Option<TransactionRef> {
        self.base.bound_transaction()
    }

    pub fn cursor_name(&self) -> Option<&str> {
        self.base.cursor_name.as_deref()
    }

    /// Run the statement.
    ///
    /// `transaction` is the caller's handle; transaction control statements
    /// may fill or clear it. On failure the executor's transaction binding
    /// is left as it was.
    pub fn execute(
        &mut self,
        ctx: &mut SessionContext,
        transaction: &mut Option<TransactionRef>,
        input: Option<InMessage<'_>>,
        output: Option<OutMessage<'_>>,
        singleton: bool,
    ) -> Result<Outcome> {
        let previous = self.base.transaction.clone();
        self.base.bind(transaction.as_ref());
        self.base.rows_fetched = 0;

        let result = match &mut self.kind {
            ExecutorKind::Dml(dml) => dml.execute(
                &mut self.base,
                ctx,
                transaction.as_ref(),
                input,
                output,
                singleton,
            ),
            ExecutorKind::Ddl(ddl) => ddl.execute(ctx, transaction.as_ref()),
            ExecutorKind::Transaction(txn) => txn.execute(ctx, transaction),
            ExecutorKind::Session(session) => session.execute(ctx, transaction.as_ref()),
        };

        match result {
            Ok(outcome) => {
                self.base.bind(transaction.as_ref());
                self.base.records_affected = outcome.records_affected;
                if outcome.has_row {
                    self.base.rows_fetched = 1;
                }
                Ok(outcome)
            }
            Err(e) => {
                self.base.transaction = previous;
                Err(e)
            }
        }
    }

    fn dml_mut(&mut self) -> Result<&mut DmlExecutor> {
        match &mut self.kind {
            ExecutorKind::Dml(dml) if dml.has_result_set() => Ok(dml),
            _ => Err(Error::NoCursorAvailable),
        }
    }

    /// Execute the statement and open a cursor over its rows
    pub fn open_cursor(
        &mut self,
        ctx: &mut SessionContext,
        transaction: &mut Option<TransactionRef>,
        input: Option<InMessage<'_>>,
        format: &Format,
        flags: CursorFlags,
    ) -> Result<()> {
        let dml = self.dml_mut()?;
        if dml.cursor().is_some() {
            return Err(Error::CursorAlreadyOpen);
        }
        self.execute(ctx, transaction, input, None, false)?;

        let dml = self.dml_mut()?;
        dml.open_cursor(flags, format, ctx);
        tracing::debug!(
            "Opened {} cursor for: {}",
            if flags.scrollable { "scrollable" } else { "forward-only" },
            self.base.statement.sql
        );
        Ok(())
    }

    /// Move the open cursor and leave the row, if any, in `message`
    pub fn fetch_cursor(
        &mut self,
        direction: FetchDirection,
        message: &mut [u8],
    ) -> Result<Fetched> {
        let transaction = self.base.bound_transaction();
        let started = Instant::now();

        let ExecutorKind::Dml(dml) = &mut self.kind else {
            return Err(Error::NoCursorAvailable);
        };
        let fetched = dml.cursor_fetch(transaction.as_ref(), direction, message)?;

        if fetched.has_row() {
            self.base.fetch_stats.record(1, started);
            self.base.rows_fetched += 1;
        }
        if !dml.is_open() {
            self.base.stop_timer();
        }
        Ok(fetched)
    }

    /// Next row of a statement executed without singleton and without a
    /// cursor; false at end of stream
    pub fn fetch(&mut self, output: OutMessage<'_>) -> Result<bool> {
        let transaction = self.base.bound_transaction();
        let started = Instant::now();

        let dml = match &mut self.kind {
            ExecutorKind::Dml(dml) if dml.has_result_set() => dml,
            _ => return Err(Error::NoCursorAvailable),
        };
        if !dml.is_open() {
            return Ok(false);
        }
        let transaction = transaction.ok_or(Error::TransactionRequired)?;
        let has_row = dml.fetch(&transaction, output)?;

        if has_row {
            self.base.fetch_stats.record(1, started);
            self.base.rows_fetched += 1;
        } else {
            self.base.stop_timer();
        }
        Ok(has_row)
    }

    /// Close the open cursor, releasing its cache and name
    pub fn close_cursor(&mut self, ctx: &mut SessionContext) -> Result<()> {
        self.dml_mut()?.close_cursor()?;
        if let Some(name) = self.base.cursor_name.take() {
            ctx.cursors_mut().unregister(&name);
        }
        self.base.stop_timer();
        tracing::debug!("Closed cursor for: {}", self.base.statement.sql);
        Ok(())
    }

    /// Name the open cursor for `WHERE CURRENT OF`
    pub fn set_cursor_name(&mut self, ctx: &mut SessionContext, name: &str) -> Result<()> {
        let link = match &self.kind {
            ExecutorKind::Dml(dml) if dml.has_result_set() => {
                Arc::clone(dml.cursor_link().ok_or(Error::CursorNotOpen)?)
            }
            _ => return Err(Error::NoCursorAvailable),
        };

        if self.base.cursor_name.as_deref() == Some(name) {
            return Ok(());
        }
        ctx.cursors_mut().register(name, &link)?;
        if let Some(old) = self.base.cursor_name.replace(name.to_string()) {
            ctx.cursors_mut().unregister(&old);
        }
        Ok(())
    }

    /// User-set timeout in milliseconds
    pub fn timeout(&self) -> u32 {
        self.base.timeout_ms
    }

    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.base.timeout_ms = timeout_ms;
    }

    /// Timeout the next execution will run under
    pub fn actual_timeout(&self, ctx: &SessionContext) -> u32 {
        self.base.actual_timeout(ctx)
    }

    /// Report and reset fetch statistics
    pub fn take_fetch_stats(&mut self) -> FetchStats {
        self.base.fetch_stats.take()
    }

    /// Encode statement info items
    pub fn info(&self, ctx: &SessionContext, items: &[u8], max_len: usize) -> Vec<u8> {
        let kind = self.base.statement.kind;
        let mut writer = InfoWriter::new(max_len);
        for &item in items {
            let written = match item {
                info::STMT_TYPE => writer.put_int(item, kind.code()),
                info::RECORDS => {
                    let mut counts = vec![(info::REQ_SELECT_COUNT, self.base.rows_fetched)];
                    let affected = match kind {
                        StatementType::Insert => Some(info::REQ_INSERT_COUNT),
                        StatementType::Update => Some(info::REQ_UPDATE_COUNT),
                        StatementType::Delete => Some(info::REQ_DELETE_COUNT),
                        _ => None,
                    };
                    if let Some(sub_item) = affected {
                        counts.push((sub_item, self.base.records_affected));
                    }
                    writer.put(item, &info::records_cluster(&counts))
                }
                info::TIMEOUT_USER => writer.put_int(item, self.base.timeout_ms as i32),
                info::TIMEOUT_RUN => writer.put_int(item, self.actual_timeout(ctx) as i32),
                other => writer.unknown(other),
            };
            if !written {
                break;
            }
        }
        writer.finish()
    }

    /// Encode info items of the open cursor
    pub fn cursor_info(&self, items: &[u8], max_len: usize) -> Result<Vec<u8>> {
        match &self.kind {
            ExecutorKind::Dml(dml) => dml
                .cursor()
                .map(|cursor| cursor.info(items, max_len))
                .ok_or(Error::CursorNotOpen),
            _ => Err(Error::NoCursorAvailable),
        }
    }

    /// Give up everything the executor holds: cursor, request, timer,
    /// cursor name and transaction binding
    pub fn release(&mut self, ctx: &mut SessionContext) {
        if let ExecutorKind::Dml(dml) = &mut self.kind {
            dml.release();
        }
        if let Some(name) = self.base.cursor_name.take() {
            ctx.cursors_mut().unregister(&name);
        }
        self.base.stop_timer();
        self.base.transaction = None;
    }
}
