use keel_common::TransactionId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("Table {0} does not exist")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("Column {column} already exists in table {table}")]
    ColumnExists { table: String, column: String },

    #[error("Column {column} does not exist in table {table}")]
    ColumnNotFound { table: String, column: usize },

    #[error("Record {record} of table {table} does not exist")]
    RecordNotFound { table: String, record: u64 },

    #[error("Record {record} of table {table} was changed by a concurrent transaction")]
    UpdateConflict { table: String, record: u64 },

    #[error("Transaction {0} is not active")]
    TransactionNotActive(TransactionId),

    #[error("Savepoint {0} does not exist")]
    UnknownSavepoint(u64),
}

impl From<Error> for keel_exec::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::UpdateConflict { .. } => keel_exec::Error::UpdateConflict(e.to_string()),
            Error::TransactionNotActive(_) => keel_exec::Error::TransactionRequired,
            other => keel_exec::Error::Execution(other.to_string()),
        }
    }
}
