//! Keel Message - client message formats and buffers
//!
//! Requests exchange rows with clients through flat message buffers whose
//! layout is declared in BLR. This crate decodes those declarations into
//! aligned descriptors and moves `Value`s in and out of the buffers.

pub mod blr;
pub mod error;
pub mod format;
pub mod message;

pub use error::{Error, Result};
pub use format::{
    DType, Descriptor, Format, FormatBuilder, MessageDecl, parse_format, parse_message_format,
    parse_messages,
};
pub use message::{is_null, read_value, set_null, write_value};
