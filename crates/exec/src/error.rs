//! Error types for request execution

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by callers and the restart loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// API misuse; never retried
    ContractViolation,
    /// Update conflict or deadlock; retried when restart is allowed
    TransientConflict,
    /// Undecodable format or message
    MalformedInput,
    Timeout,
    ValidationFailure,
    /// Failures raised while running the request itself
    Execution,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Contract violations
    #[error("Attempt to open a cursor on a statement that does not return rows")]
    NoCursorAvailable,

    #[error("Statement cannot be executed in this state: {0}")]
    StatementNotExecutable(String),

    #[error("Attempt to reopen an open cursor")]
    CursorAlreadyOpen,

    #[error("Cursor is not open")]
    CursorNotOpen,

    #[error("Cursor name {0} is already in use")]
    CursorNameInUse(String),

    #[error("Cursor {0} not found")]
    CursorNotFound(String),

    #[error("Cursor {0} is not positioned in a valid record")]
    CursorNotPositioned(String),

    #[error("Invalid fetch option {0} for a forward-only cursor")]
    InvalidFetchOption(String),

    #[error("Multiple rows in singleton select")]
    MultipleRowsInSingleton,

    #[error("Statement requires an active transaction")]
    TransactionRequired,

    #[error("A transaction is already active")]
    TransactionInProgress,

    // Transient conflicts
    #[error("Update conflicts with concurrent update: {0}")]
    UpdateConflict(String),

    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    // Malformed input
    #[error(transparent)]
    Malformed(#[from] keel_message::Error),

    // Timeout
    #[error("Operation timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u32 },

    #[error("Operation was cancelled")]
    Cancelled,

    // Validation
    #[error("Validation error for {item}, value \"{value}\"")]
    Validation { item: String, value: String },

    // Execution
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoCursorAvailable
            | Error::StatementNotExecutable(_)
            | Error::CursorAlreadyOpen
            | Error::CursorNotOpen
            | Error::CursorNameInUse(_)
            | Error::CursorNotFound(_)
            | Error::CursorNotPositioned(_)
            | Error::InvalidFetchOption(_)
            | Error::MultipleRowsInSingleton
            | Error::TransactionRequired
            | Error::TransactionInProgress => ErrorKind::ContractViolation,
            Error::UpdateConflict(_) | Error::Deadlock(_) => ErrorKind::TransientConflict,
            Error::Malformed(_) => ErrorKind::MalformedInput,
            Error::Timeout { .. } | Error::Cancelled => ErrorKind::Timeout,
            Error::Validation { .. } => ErrorKind::ValidationFailure,
            Error::Execution(_) | Error::Io(_) | Error::Internal(_) => ErrorKind::Execution,
        }
    }

    /// Whether the error may go away if the statement is run again
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::TransientConflict
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<keel_value::Error> for Error {
    fn from(err: keel_value::Error) -> Self {
        Error::Malformed(keel_message::Error::Conversion(err))
    }
}
