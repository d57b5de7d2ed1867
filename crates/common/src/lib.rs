//! Common types shared by the keel crates
//!
//! Only identities that cross crate boundaries live here; everything with
//! behaviour belongs to the crate that owns it.

mod transaction_id;

pub use transaction_id::TransactionId;
