//! Transaction control statements

use super::Outcome;
use crate::context::SessionContext;
use crate::error::{Error, Result};
use crate::statement::StatementType;
use crate::transaction::{TransactionOptions, TransactionRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionCommand {
    Start(TransactionOptions),
    Commit,
    CommitRetaining,
    Rollback,
    RollbackRetaining,
    Savepoint(String),
    ReleaseSavepoint(String),
    RollbackToSavepoint(String),
}

impl TransactionCommand {
    pub fn statement_type(&self) -> StatementType {
        match self {
            TransactionCommand::Start(_) => StatementType::StartTransaction,
            TransactionCommand::Commit | TransactionCommand::CommitRetaining => {
                StatementType::Commit
            }
            TransactionCommand::Rollback | TransactionCommand::RollbackRetaining => {
                StatementType::Rollback
            }
            TransactionCommand::Savepoint(_)
            | TransactionCommand::ReleaseSavepoint(_)
            | TransactionCommand::RollbackToSavepoint(_) => StatementType::Savepoint,
        }
    }
}

#[derive(Debug)]
pub struct TransactionExecutor {
    command: TransactionCommand,
}

impl TransactionExecutor {
    pub(crate) fn new(command: TransactionCommand) -> Self {
        Self { command }
    }

    /// Run the command against the caller's transaction handle. Starting
    /// fills the handle; commit and rollback (non-retaining) empty it.
    pub(crate) fn execute(
        &self,
        ctx: &SessionContext,
        transaction: &mut Option<TransactionRef>,
    ) -> Result<Outcome> {
        let TransactionCommand::Start(options) = &self.command else {
            return self.apply(transaction);
        };
        if transaction.as_ref().is_some_and(|t| t.is_active()) {
            return Err(Error::TransactionInProgress);
        }
        let started = ctx.transaction_manager().begin(options.clone())?;
        tracing::debug!("Started transaction {}", started.id());
        *transaction = Some(started);
        Ok(Outcome::default())
    }

    fn apply(&self, transaction: &mut Option<TransactionRef>) -> Result<Outcome> {
        let current = transaction.as_ref().ok_or(Error::TransactionRequired)?;
        let id = current.id();

        match &self.command {
            TransactionCommand::Start(_) => return Err(Error::TransactionInProgress),
            TransactionCommand::Commit => {
                current.commit(false)?;
                *transaction = None;
                tracing::debug!("Committed transaction {}", id);
            }
            TransactionCommand::CommitRetaining => {
                current.commit(true)?;
                tracing::debug!("Committed transaction {} (retaining)", id);
            }
            TransactionCommand::Rollback => {
                current.rollback(false)?;
                *transaction = None;
                tracing::debug!("Rolled back transaction {}", id);
            }
            TransactionCommand::RollbackRetaining => {
                current.rollback(true)?;
                tracing::debug!("Rolled back transaction {} (retaining)", id);
            }
            TransactionCommand::Savepoint(name) => {
                current.start_savepoint(Some(name))?;
            }
            TransactionCommand::ReleaseSavepoint(name) => {
                let savepoint = find(current, name)?;
                current.release_savepoint(savepoint)?;
            }
            TransactionCommand::RollbackToSavepoint(name) => {
                let savepoint = find(current, name)?;
                current.rollback_savepoint(savepoint)?;
                // The savepoint itself survives a rollback to it
                current.start_savepoint(Some(name))?;
            }
        }
        Ok(Outcome::default())
    }
}

fn find(transaction: &TransactionRef, name: &str) -> Result<u64> {
    transaction
        .find_savepoint(name)
        .ok_or_else(|| Error::Execution(format!("Savepoint {} does not exist", name)))
}
