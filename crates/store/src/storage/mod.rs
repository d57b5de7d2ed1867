//! Storage module for the table store
//!
//! Tables keep a chain of versions per record. Readers pick the newest
//! version their view can see.

pub mod mvcc;

pub use mvcc::{CommitLog, ReadView, Table, Version};
