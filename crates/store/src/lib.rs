//! Keel Store - in-memory multi-version storage
//!
//! A small MVCC table store implementing the execution layer's
//! transaction and request contracts. Every write is checked against
//! concurrent writers; a losing writer gets an update conflict the
//! executor can restart from.

pub mod ddl;
pub mod error;
pub mod request;
pub mod storage;
pub mod store;
pub mod transaction;

pub use ddl::{AddColumn, CreateTable, DropTable};
pub use error::{Error, Result};
pub use request::{Delete, Insert, Scan, Update, field_equals};
pub use storage::{CommitLog, ReadView, Table, Version};
pub use store::MemoryStore;
pub use transaction::StoreTransaction;
