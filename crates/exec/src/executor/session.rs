//! Session management statements

use super::Outcome;
use crate::context::SessionContext;
use crate::error::{Error, Result};
use crate::transaction::TransactionRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// `SET STATEMENT TIMEOUT`, 0 clears it
    SetStatementTimeout(u32),
    SetRole(Option<String>),
    SetAttribute { name: String, value: String },
    /// `ALTER SESSION RESET`
    Reset,
}

#[derive(Debug)]
pub struct SessionExecutor {
    command: SessionCommand,
}

impl SessionExecutor {
    pub(crate) fn new(command: SessionCommand) -> Self {
        Self { command }
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut SessionContext,
        transaction: Option<&TransactionRef>,
    ) -> Result<Outcome> {
        match &self.command {
            SessionCommand::SetStatementTimeout(ms) => ctx.set_statement_timeout(*ms),
            SessionCommand::SetRole(role) => ctx.set_role(role.clone()),
            SessionCommand::SetAttribute { name, value } => {
                ctx.set_attribute(name.clone(), value.clone())
            }
            SessionCommand::Reset => {
                if transaction.is_some_and(|t| t.is_active()) {
                    return Err(Error::StatementNotExecutable(
                        "cannot reset the session while a transaction is active".to_string(),
                    ));
                }
                ctx.reset();
                tracing::debug!("Session reset");
            }
        }
        Ok(Outcome::default())
    }
}
