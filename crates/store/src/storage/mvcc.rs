//! Multi-Version Concurrency Control for tables
//!
//! Every write appends a version to the record's chain, newest last. A
//! version becomes visible to other transactions once its creator has
//! committed with a commit number inside their snapshot. Rolling back
//! pops the versions a transaction created, which is only ever the tail
//! of a chain since writers never stack on uncommitted foreign versions.

use keel_common::TransactionId;
use keel_exec::{FieldDef, FormatHistory, Record};
use keel_value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A version of a record
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    /// Field values in the layout of `format`; `None` marks a deletion
    pub values: Option<Vec<Value>>,
    /// Format version the values were written with
    pub format: u16,
    /// Transaction that created this version
    pub created_by: TransactionId,
}

/// Commit numbers of committed transactions
#[derive(Debug, Default)]
pub struct CommitLog {
    committed: HashMap<TransactionId, u64>,
    sequence: u64,
}

impl CommitLog {
    /// Number of the latest commit
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn commit(&mut self, txn: TransactionId) -> u64 {
        self.sequence += 1;
        self.committed.insert(txn, self.sequence);
        self.sequence
    }

    pub fn commit_of(&self, txn: TransactionId) -> Option<u64> {
        self.committed.get(&txn).copied()
    }
}

/// What a reading transaction can see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadView {
    pub txn: TransactionId,
    /// Commits numbered up to here are visible
    pub snapshot: u64,
}

impl ReadView {
    pub fn sees(&self, version: &Version, log: &CommitLog) -> bool {
        version.created_by == self.txn
            || log
                .commit_of(version.created_by)
                .is_some_and(|seq| seq <= self.snapshot)
    }
}

/// A table: its format history and the version chains of its records
#[derive(Debug, Clone)]
pub struct Table {
    pub history: Arc<FormatHistory>,
    records: BTreeMap<u64, Vec<Version>>,
    next_record: u64,
}

impl Table {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self {
            history: Arc::new(FormatHistory::new(fields)),
            records: BTreeMap::new(),
            next_record: 1,
        }
    }

    /// Current format version new records are written with
    pub fn format(&self) -> u16 {
        self.history.current().version
    }

    /// The record as `view` sees it
    pub fn visible(&self, record: u64, view: &ReadView, log: &CommitLog) -> Option<Record> {
        let version = self
            .records
            .get(&record)?
            .iter()
            .rev()
            .find(|v| view.sees(v, log))?;

        version.values.as_ref().map(|values| Record {
            history: Arc::clone(&self.history),
            version: version.format,
            values: values.clone(),
        })
    }

    /// Every record `view` sees, in record order
    pub fn scan(&self, view: &ReadView, log: &CommitLog) -> Vec<(u64, Record)> {
        self.records
            .keys()
            .filter_map(|&id| self.visible(id, view, log).map(|record| (id, record)))
            .collect()
    }

    /// Newest version of a record, whoever wrote it
    pub fn head(&self, record: u64) -> Option<&Version> {
        self.records.get(&record).and_then(|chain| chain.last())
    }

    pub fn allocate(&mut self) -> u64 {
        let id = self.next_record;
        self.next_record += 1;
        id
    }

    pub fn push(&mut self, record: u64, version: Version) {
        self.records.entry(record).or_default().push(version);
    }

    /// Remove the newest version of `record` if `txn` created it
    pub fn pop(&mut self, record: u64, txn: TransactionId) -> bool {
        let Some(chain) = self.records.get_mut(&record) else {
            return false;
        };
        if chain.last().is_none_or(|v| v.created_by != txn) {
            return false;
        }
        chain.pop();
        if chain.is_empty() {
            self.records.remove(&record);
        }
        true
    }

    /// Number of stored versions across all records
    pub fn version_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_value::DataType;

    fn table() -> Table {
        Table::new(vec![FieldDef::new("id", DataType::Integer)])
    }

    fn version(txn: TransactionId, id: i32) -> Version {
        Version {
            values: Some(vec![Value::I32(id)]),
            format: 0,
            created_by: txn,
        }
    }

    #[test]
    fn test_uncommitted_versions_are_private() {
        let mut log = CommitLog::default();
        let mut table = table();
        let writer = TransactionId::new();
        let reader = TransactionId::new();

        let record = table.allocate();
        table.push(record, version(writer, 1));

        let own = ReadView {
            txn: writer,
            snapshot: 0,
        };
        assert!(table.visible(record, &own, &log).is_some());

        let other = ReadView {
            txn: reader,
            snapshot: log.sequence(),
        };
        assert!(table.visible(record, &other, &log).is_none());

        log.commit(writer);
        // Old snapshot still misses the commit
        assert!(table.visible(record, &other, &log).is_none());
        let fresh = ReadView {
            txn: reader,
            snapshot: log.sequence(),
        };
        assert_eq!(table.scan(&fresh, &log).len(), 1);
    }

    #[test]
    fn test_deletion_hides_record() {
        let mut log = CommitLog::default();
        let mut table = table();
        let txn = TransactionId::new();

        let record = table.allocate();
        table.push(record, version(txn, 1));
        table.push(
            record,
            Version {
                values: None,
                format: 0,
                created_by: txn,
            },
        );
        log.commit(txn);

        let view = ReadView {
            txn: TransactionId::new(),
            snapshot: log.sequence(),
        };
        assert!(table.visible(record, &view, &log).is_none());
        assert_eq!(table.version_count(), 2);
    }

    #[test]
    fn test_pop_only_removes_own_tail() {
        let mut table = table();
        let first = TransactionId::new();
        let second = TransactionId::new();

        let record = table.allocate();
        table.push(record, version(first, 1));
        table.push(record, version(second, 2));

        assert!(!table.pop(record, first));
        assert!(table.pop(record, second));
        assert!(table.pop(record, first));
        assert!(table.head(record).is_none());
    }
}
