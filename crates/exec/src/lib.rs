//! Keel Exec - request execution and scrollable cursors
//!
//! Prepared statements are run through per-use executors. DML executors
//! restart a statement transparently after an update conflict while no
//! row has been delivered yet, and can expose their rows through a
//! forward-only or scrollable cursor. The storage engine plugs in through
//! the `Transaction`, `TransactionManager` and `CompiledRequest` traits.

pub mod bridge;
pub mod config;
pub mod context;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod info;
pub mod request;
pub mod statement;
pub mod stats;
pub mod timer;
pub mod transaction;

#[cfg(test)]
mod test_utils;

pub use bridge::{
    Evaluate, Expression, FieldDef, FieldValue, FormatHistory, ItemInfo, OutputItem, Record,
    RecordFormat, validate,
};
pub use config::{ExecConfig, RowCacheConfig};
pub use context::{CursorRegistry, SessionContext};
pub use cursor::{Cursor, CursorFlags, CursorLink, CursorState, FetchDirection, Fetched};
pub use error::{Error, ErrorKind, Result};
pub use executor::ddl::DdlNode;
pub use executor::session::SessionCommand;
pub use executor::transaction::TransactionCommand;
pub use executor::{Executor, ExecutorKind, InMessage, OutMessage, Outcome};
pub use request::{CompiledRequest, RecordKey, RequestFactory, RequestInput, Row};
pub use statement::{CursorRef, DmlBody, Statement, StatementBody, StatementType};
pub use stats::FetchStats;
pub use timer::CancellationToken;
pub use transaction::{
    Isolation, SavepointId, Transaction, TransactionManager, TransactionOptions, TransactionRef,
};
