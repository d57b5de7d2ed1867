//! Error types for message formats and buffers

use crate::format::DType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Malformed message format: {0}")]
    MalformedFormat(String),

    #[error("Message buffer too small: need {needed} bytes, have {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("Column {0} is not part of the message format")]
    ColumnOutOfRange(usize),

    #[error("Data type {0:?} cannot be transferred through a message")]
    Unsupported(DType),

    #[error("String truncation: {actual} bytes do not fit in {max}")]
    StringTruncation { max: usize, actual: usize },

    #[error(transparent)]
    Conversion(#[from] keel_value::Error),
}

impl Error {
    pub(crate) fn truncated(what: &str) -> Self {
        Error::MalformedFormat(format!("truncated {}", what))
    }
}
