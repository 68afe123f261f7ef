use super::catalog::Catalog;
use super::table::{ForeignKeyAction, Table, TableSchema};
use crate::core::{DbError, Result, Row, Value};
use crate::transaction::Change;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Address of a physical row: table name plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRef {
    pub table: String,
    pub id: i64,
}

impl RowRef {
    pub fn new(table: impl Into<String>, id: i64) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.table, self.id)
    }
}

/// Every table plus the catalog describing them.
///
/// All writes take the transaction's undo log so the caller can reverse them.
#[derive(Debug, Default)]
pub struct TableSet {
    catalog: Catalog,
    tables: HashMap<String, Table>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a table set from persisted tables, restoring their indexes.
    pub fn from_tables(tables: HashMap<String, Table>) -> Result<Self> {
        let mut tables = tables;
        for table in tables.values_mut() {
            table.rebuild_indexes()?;
        }
        let catalog = Catalog::from_schemas(tables.values().map(|t| t.schema().clone()));
        Ok(Self { catalog, tables })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        let catalog = self.catalog.clone().with_table(schema.clone())?;
        let table = Table::new(schema)?;
        self.catalog = catalog;
        self.tables.insert(name, table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn tables(&self) -> &HashMap<String, Table> {
        &self.tables
    }

    pub fn insert(&mut self, table: &str, row: Row, log: &mut Vec<Change>) -> Result<i64> {
        self.check_references(table, &row)?;
        let id = self.table_mut(table)?.insert(row)?;
        log.push(Change::InsertRow {
            table: table.to_string(),
            id,
        });
        Ok(id)
    }

    pub fn update(&mut self, table: &str, id: i64, row: Row, log: &mut Vec<Change>) -> Result<()> {
        self.check_references(table, &row)?;
        let old_row = self.table_mut(table)?.update(id, row)?;
        log.push(Change::UpdateRow {
            table: table.to_string(),
            old_row,
        });
        Ok(())
    }

    /// Physically deletes a row and applies every foreign key action that
    /// points at it. Each row removed (the target included) is appended to
    /// `removed`. Returns false when the row does not exist.
    pub fn delete(
        &mut self,
        table: &str,
        id: i64,
        log: &mut Vec<Change>,
        removed: &mut Vec<RowRef>,
    ) -> Result<bool> {
        let mut visiting = HashSet::new();
        self.delete_recursive(RowRef::new(table, id), log, removed, &mut visiting)
    }

    fn delete_recursive(
        &mut self,
        target: RowRef,
        log: &mut Vec<Change>,
        removed: &mut Vec<RowRef>,
        visiting: &mut HashSet<RowRef>,
    ) -> Result<bool> {
        if self.table(&target.table)?.get(target.id).is_none() || !visiting.insert(target.clone()) {
            return Ok(false);
        }

        for relation in self.catalog.reverse_relations(&target.table) {
            let child_ids = self
                .table(&relation.child_table)?
                .find(&[relation.fk_column.as_str()], &[Value::Integer(target.id)])?;

            for child_id in child_ids {
                if relation.child_table == target.table && child_id == target.id {
                    continue;
                }
                match relation.on_delete {
                    ForeignKeyAction::Restrict => {
                        return Err(DbError::ConstraintViolation(format!(
                            "Deleting {} violates foreign key constraint from '{}.{}'",
                            target, relation.child_table, relation.fk_column
                        )));
                    }
                    ForeignKeyAction::SetNull => {
                        let child = self.table(&relation.child_table)?;
                        let position = child.schema().column_index(&relation.fk_column)?;
                        let Some(mut row) = child.get(child_id).cloned() else {
                            continue;
                        };
                        row[position] = Value::Null;
                        let old_row = self.table_mut(&relation.child_table)?.update(child_id, row)?;
                        log.push(Change::UpdateRow {
                            table: relation.child_table.clone(),
                            old_row,
                        });
                    }
                    ForeignKeyAction::Cascade => {
                        self.delete_recursive(
                            RowRef::new(relation.child_table.clone(), child_id),
                            log,
                            removed,
                            visiting,
                        )?;
                    }
                }
            }
        }

        if let Some(old_row) = self.table_mut(&target.table)?.remove(target.id) {
            log.push(Change::DeleteRow {
                table: target.table.clone(),
                old_row,
            });
            removed.push(target);
        }
        Ok(true)
    }

    /// Rejects rows whose foreign keys point at missing rows.
    fn check_references(&self, table: &str, row: &Row) -> Result<()> {
        let schema = self.table(table)?.schema();
        for fk in &schema.foreign_keys {
            let position = schema.column_index(&fk.column)?;
            let Some(target) = row.get(position).and_then(Value::as_i64) else {
                continue;
            };
            let self_reference = fk.references == table && row.first() == Some(&Value::Integer(target));
            if !self_reference && self.table(&fk.references)?.get(target).is_none() {
                return Err(DbError::ConstraintViolation(format!(
                    "'{}.{}' references non-existent key {} in '{}'",
                    table, fk.column, target, fk.references
                )));
            }
        }
        Ok(())
    }
}

/// Shared handle on the table set. Transactions hold the lock exclusively for
/// their whole lifetime, so they are serialized.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<Mutex<TableSet>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table_set(tables: TableSet) -> Self {
        Self {
            tables: Arc::new(Mutex::new(tables)),
        }
    }

    pub async fn create_table(&self, schema: TableSchema) -> Result<()> {
        self.tables.lock().await.create_table(schema)
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        self.tables.lock().await.catalog().table_exists(name)
    }

    pub async fn list_tables(&self) -> Vec<String> {
        self.tables.lock().await.catalog().list_tables()
    }

    pub async fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.tables.lock().await.table(table)?.row_count())
    }

    /// Exclusive access for the lifetime of one transaction.
    pub(crate) async fn lock_owned(&self) -> OwnedMutexGuard<TableSet> {
        self.tables.clone().lock_owned().await
    }

    /// Point-in-time copy of every table (for persistence snapshots).
    pub async fn snapshot(&self) -> HashMap<String, Table> {
        self.tables.lock().await.tables().clone()
    }

    /// Replaces the whole table set.
    pub async fn restore(&self, tables: HashMap<String, Table>) -> Result<()> {
        let restored = TableSet::from_tables(tables)?;
        *self.tables.lock().await = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};
    use crate::storage::table::ForeignKey;

    fn tables() -> TableSet {
        let mut set = TableSet::new();
        set.create_table(TableSchema::new("author", vec![Column::new("name", DataType::Text)]))
            .unwrap();
        set.create_table(
            TableSchema::new("book", vec![Column::new("author_id", DataType::Integer)])
                .with_foreign_key(ForeignKey::new("author_id", "author")),
        )
        .unwrap();
        set.create_table(
            TableSchema::new("note", vec![Column::new("book_id", DataType::Integer)])
                .with_foreign_key(ForeignKey::new("book_id", "book").on_delete(ForeignKeyAction::SetNull)),
        )
        .unwrap();
        set
    }

    #[test]
    fn test_insert_checks_references() {
        let mut set = tables();
        let mut log = Vec::new();
        let err = set
            .insert("book", vec![Value::Null, Value::Integer(9)], &mut log)
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
        assert!(log.is_empty());
    }

    #[test]
    fn test_delete_applies_foreign_key_actions() {
        let mut set = tables();
        let mut log = Vec::new();
        let author = set.insert("author", vec![Value::Null, Value::from("Ann")], &mut log).unwrap();
        let book = set.insert("book", vec![Value::Null, Value::Integer(author)], &mut log).unwrap();
        let note = set.insert("note", vec![Value::Null, Value::Integer(book)], &mut log).unwrap();

        let mut removed = Vec::new();
        assert!(set.delete("author", author, &mut log, &mut removed).unwrap());
        assert_eq!(removed, vec![RowRef::new("book", book), RowRef::new("author", author)]);
        assert_eq!(set.table("note").unwrap().get(note).unwrap()[1], Value::Null);
    }

    #[test]
    fn test_undo_log_restores_rows() {
        let mut set = tables();
        let mut setup = Vec::new();
        let author = set.insert("author", vec![Value::Null, Value::from("Ann")], &mut setup).unwrap();
        set.insert("book", vec![Value::Null, Value::Integer(author)], &mut setup).unwrap();

        let mut log = Vec::new();
        let mut removed = Vec::new();
        set.delete("author", author, &mut log, &mut removed).unwrap();
        for change in log.into_iter().rev() {
            change.undo(&mut set);
        }
        assert_eq!(set.table("author").unwrap().row_count(), 1);
        assert_eq!(set.table("book").unwrap().row_count(), 1);
    }

    #[test]
    fn test_restrict_blocks_delete() {
        let mut set = TableSet::new();
        set.create_table(TableSchema::new("parent", vec![])).unwrap();
        set.create_table(
            TableSchema::new("child", vec![Column::new("parent_id", DataType::Integer)])
                .with_foreign_key(ForeignKey::new("parent_id", "parent").on_delete(ForeignKeyAction::Restrict)),
        )
        .unwrap();
        let mut log = Vec::new();
        let parent = set.insert("parent", vec![Value::Null], &mut log).unwrap();
        set.insert("child", vec![Value::Null, Value::Integer(parent)], &mut log).unwrap();

        let err = set.delete("parent", parent, &mut log, &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("violates foreign key constraint"));
    }
}
