//! Transaction identifier using UUIDv7
//!
//! Identifiers are time-ordered, so sorting a set of transactions by id
//! orders them by start time. Storage layers that need a dense commit
//! sequence keep their own counter; the id is only the identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a transaction bound to an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a new transaction ID using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Big-endian byte form, as used in info buffers and trace output
    pub fn to_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse from the hyphenated string form
    pub fn parse(s: &str) -> Result<Self, String> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid transaction ID: {}", e))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for TransactionId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransactionId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let id = TransactionId::new();
        let parsed = TransactionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let id = TransactionId::new();
        assert_eq!(TransactionId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn test_later_ids_sort_after() {
        let first = TransactionId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = TransactionId::new();
        assert!(first < second);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TransactionId::parse("not-a-uuid").is_err());
    }
}
