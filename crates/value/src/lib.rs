//! Keel Value - SQL values moved between records and message buffers
//!
//! This crate provides:
//! - The `Value` enum for the column types the engine transports
//! - `DataType`, the logical type attached to record fields
//! - Conversions to and from the scaled/physical shapes used by messages

pub mod convert;
pub mod types;

pub use convert::{Error, Result};
pub use types::{DataType, Value};
