//! Schema-changing statements

use super::Outcome;
use crate::context::SessionContext;
use crate::error::{Error, Result};
use crate::transaction::TransactionRef;
use std::fmt;
use std::sync::Arc;

/// A prepared DDL action
pub trait DdlNode: Send + Sync + fmt::Debug {
    fn execute(&self, ctx: &SessionContext, transaction: &TransactionRef) -> Result<()>;
}

/// Runs a DDL node as one unit: either all of its changes stay or none do
#[derive(Debug)]
pub struct DdlExecutor {
    node: Arc<dyn DdlNode>,
}

impl DdlExecutor {
    pub(crate) fn new(node: Arc<dyn DdlNode>) -> Self {
        Self { node }
    }

    pub(crate) fn execute(
        &self,
        ctx: &SessionContext,
        transaction: Option<&TransactionRef>,
    ) -> Result<Outcome> {
        let transaction = transaction.ok_or(Error::TransactionRequired)?;

        let savepoint = transaction.start_savepoint(None)?;
        match self.node.execute(ctx, transaction) {
            Ok(()) => {
                transaction.release_savepoint(savepoint)?;
                tracing::debug!("DDL executed: {:?}", self.node);
                Ok(Outcome::default())
            }
            Err(e) => {
                transaction.rollback_savepoint(savepoint)?;
                Err(e)
            }
        }
    }
}
