//! Transactions over a `MemoryStore`

use crate::store::MemoryStore;
use keel_common::TransactionId;
use keel_exec::{SavepointId, Transaction, TransactionManager, TransactionOptions, TransactionRef};
use std::sync::Arc;

/// Handle to a transaction whose state lives in the store. Dropping an
/// active handle rolls the transaction back.
#[derive(Debug)]
pub struct StoreTransaction {
    id: TransactionId,
    options: TransactionOptions,
    store: MemoryStore,
}

impl StoreTransaction {
    pub(crate) fn new(id: TransactionId, options: TransactionOptions, store: MemoryStore) -> Self {
        Self { id, options, store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Transaction for StoreTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn options(&self) -> TransactionOptions {
        self.options.clone()
    }

    fn is_active(&self) -> bool {
        self.store.is_active(self.id)
    }

    fn start_savepoint(&self, name: Option<&str>) -> keel_exec::Result<SavepointId> {
        Ok(self.store.start_savepoint(self.id, name)?)
    }

    fn release_savepoint(&self, id: SavepointId) -> keel_exec::Result<()> {
        Ok(self.store.release_savepoint(self.id, id)?)
    }

    fn rollback_savepoint(&self, id: SavepointId) -> keel_exec::Result<()> {
        Ok(self.store.rollback_savepoint(self.id, id)?)
    }

    fn find_savepoint(&self, name: &str) -> Option<SavepointId> {
        self.store.find_savepoint(self.id, name)
    }

    fn refresh_snapshot(&self) -> keel_exec::Result<()> {
        Ok(self.store.refresh_snapshot(self.id)?)
    }

    fn commit(&self, retaining: bool) -> keel_exec::Result<()> {
        Ok(self.store.commit(self.id, retaining)?)
    }

    fn rollback(&self, retaining: bool) -> keel_exec::Result<()> {
        Ok(self.store.rollback(self.id, retaining)?)
    }
}

impl Drop for StoreTransaction {
    fn drop(&mut self) {
        if !self.store.is_active(self.id) {
            return;
        }
        tracing::debug!("Rolling back abandoned transaction {}", self.id);
        if let Err(e) = self.store.rollback(self.id, false) {
            tracing::warn!("Rollback of transaction {} failed: {}", self.id, e);
        }
    }
}

impl TransactionManager for MemoryStore {
    fn begin(&self, options: TransactionOptions) -> keel_exec::Result<TransactionRef> {
        Ok(Arc::new(self.begin_transaction(options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_exec::FieldDef;
    use keel_value::{DataType, Value};

    fn store_with_table() -> MemoryStore {
        let store = MemoryStore::new();
        let setup = store.begin_transaction(TransactionOptions::default());
        store
            .create_table(setup.id(), "T", vec![FieldDef::new("id", DataType::Integer)])
            .unwrap();
        setup.commit(false).unwrap();
        store
    }

    #[test]
    fn test_savepoint_rollback_undoes_later_work() {
        let store = store_with_table();
        let txn = store.begin_transaction(TransactionOptions::read_committed());

        store.insert(txn.id(), "T", vec![Value::I32(1)]).unwrap();
        let savepoint = txn.start_savepoint(Some("S1")).unwrap();
        store.insert(txn.id(), "T", vec![Value::I32(2)]).unwrap();
        assert_eq!(store.scan(txn.id(), "T").unwrap().len(), 2);

        txn.rollback_savepoint(savepoint).unwrap();
        assert_eq!(store.scan(txn.id(), "T").unwrap().len(), 1);
        assert_eq!(txn.find_savepoint("S1"), None);
    }

    #[test]
    fn test_concurrent_writer_conflicts() {
        let store = store_with_table();
        let setup = store.begin_transaction(TransactionOptions::default());
        let record = store.insert(setup.id(), "T", vec![Value::I32(1)]).unwrap();
        setup.commit(false).unwrap();

        let first = store.begin_transaction(TransactionOptions::read_committed());
        let second = store.begin_transaction(TransactionOptions::read_committed());
        store.update(first.id(), "T", record, vec![Value::I32(10)]).unwrap();

        let err = store
            .update(second.id(), "T", record, vec![Value::I32(20)])
            .unwrap_err();
        assert!(matches!(err, crate::Error::UpdateConflict { .. }));

        // Still a conflict after the commit until the snapshot moves on
        first.commit(false).unwrap();
        assert!(store.update(second.id(), "T", record, vec![Value::I32(20)]).is_err());
        second.refresh_snapshot().unwrap();
        store.update(second.id(), "T", record, vec![Value::I32(20)]).unwrap();
    }

    #[test]
    fn test_concurrency_snapshot_is_fixed() {
        let store = store_with_table();
        let reader = store.begin_transaction(TransactionOptions::default());

        let writer = store.begin_transaction(TransactionOptions::default());
        store.insert(writer.id(), "T", vec![Value::I32(1)]).unwrap();
        writer.commit(false).unwrap();

        reader.refresh_snapshot().unwrap();
        assert!(store.scan(reader.id(), "T").unwrap().is_empty());
    }

    #[test]
    fn test_dropped_handle_rolls_back() {
        let store = store_with_table();
        {
            let txn = store.begin_transaction(TransactionOptions::default());
            store.insert(txn.id(), "T", vec![Value::I32(1)]).unwrap();
        }
        assert_eq!(store.active_transactions(), 0);
        assert_eq!(store.version_count("T").unwrap(), 0);
    }

    #[test]
    fn test_commit_retaining_keeps_transaction_open() {
        let store = store_with_table();
        let txn = store.begin_transaction(TransactionOptions::default());
        store.insert(txn.id(), "T", vec![Value::I32(1)]).unwrap();

        txn.commit(true).unwrap();
        assert!(txn.is_active());
        txn.rollback(false).unwrap();
        assert!(!txn.is_active());

        let reader = store.begin_transaction(TransactionOptions::default());
        assert_eq!(store.scan(reader.id(), "T").unwrap().len(), 1);
    }
}
