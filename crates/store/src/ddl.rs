//! Schema changes on store tables

use crate::store::MemoryStore;
use keel_exec::{DdlNode, FieldDef, Result, SessionContext, TransactionRef};

/// `CREATE TABLE`
#[derive(Debug)]
pub struct CreateTable {
    pub store: MemoryStore,
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl DdlNode for CreateTable {
    fn execute(&self, _ctx: &SessionContext, transaction: &TransactionRef) -> Result<()> {
        self.store
            .create_table(transaction.id(), &self.name, self.fields.clone())?;
        tracing::info!("Created table {} with {} fields", self.name, self.fields.len());
        Ok(())
    }
}

/// `ALTER TABLE ... ADD`. Records stored before keep their format and
/// read the new field through its default.
#[derive(Debug)]
pub struct AddColumn {
    pub store: MemoryStore,
    pub table: String,
    pub field: FieldDef,
}

impl DdlNode for AddColumn {
    fn execute(&self, _ctx: &SessionContext, transaction: &TransactionRef) -> Result<()> {
        self.store
            .add_column(transaction.id(), &self.table, self.field.clone())?;
        tracing::info!("Added field {} to table {}", self.field.name, self.table);
        Ok(())
    }
}

/// `DROP TABLE`
#[derive(Debug)]
pub struct DropTable {
    pub store: MemoryStore,
    pub name: String,
}

impl DdlNode for DropTable {
    fn execute(&self, _ctx: &SessionContext, transaction: &TransactionRef) -> Result<()> {
        self.store.drop_table(transaction.id(), &self.name)?;
        tracing::info!("Dropped table {}", self.name);
        Ok(())
    }
}
