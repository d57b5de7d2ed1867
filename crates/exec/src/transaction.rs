//! Transaction collaborator traits
//!
//! Executors never own transactions. The caller passes a `TransactionRef`
//! into every execute call and the executor keeps only a weak binding.

use crate::error::Result;
use keel_common::TransactionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Isolation {
    /// Table-level consistency
    Consistency,
    /// Snapshot taken at transaction start
    #[default]
    Concurrency,
    /// Sees committed data; with read consistency each statement reads from
    /// its own snapshot
    ReadCommitted { read_consistency: bool },
}

impl Isolation {
    /// Whether a statement may be transparently restarted after a conflict
    pub fn allows_restart(&self) -> bool {
        matches!(
            self,
            Isolation::ReadCommitted {
                read_consistency: true
            }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub isolation: Isolation,
    pub read_only: bool,
}

impl TransactionOptions {
    pub fn read_committed() -> Self {
        Self {
            isolation: Isolation::ReadCommitted {
                read_consistency: true,
            },
            read_only: false,
        }
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

pub type SavepointId = u64;

/// A transaction as seen by the execution layer
pub trait Transaction: Send + Sync + fmt::Debug {
    fn id(&self) -> TransactionId;

    fn options(&self) -> TransactionOptions;

    fn isolation(&self) -> Isolation {
        self.options().isolation
    }

    /// Restart policy of this transaction
    fn allows_restart(&self) -> bool {
        self.isolation().allows_restart()
    }

    fn is_active(&self) -> bool;

    /// Start a savepoint; named savepoints can be found again by name
    fn start_savepoint(&self, name: Option<&str>) -> Result<SavepointId>;

    /// Keep the work done since the savepoint and forget it
    fn release_savepoint(&self, id: SavepointId) -> Result<()>;

    /// Undo the work done since the savepoint
    fn rollback_savepoint(&self, id: SavepointId) -> Result<()>;

    fn find_savepoint(&self, name: &str) -> Option<SavepointId>;

    /// Take a fresh statement snapshot (read consistency mode)
    fn refresh_snapshot(&self) -> Result<()>;

    fn commit(&self, retaining: bool) -> Result<()>;

    fn rollback(&self, retaining: bool) -> Result<()>;
}

pub type TransactionRef = Arc<dyn Transaction>;

/// Starts transactions on behalf of a session
pub trait TransactionManager: Send + Sync + fmt::Debug {
    fn begin(&self, options: TransactionOptions) -> Result<TransactionRef>;
}
