use crate::core::{Column, DataType, DbError, Result, Row, Schema, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Name of the auto-assigned integer primary key, always column 0.
pub const PRIMARY_KEY: &str = "id";

/// Name of the nullable timestamp column carried by soft-deletable tables.
pub const DELETED_AT: &str = "deleted_at";

/// What the store does to referencing rows when a referenced row is physically deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    Cascade,
    SetNull,
    Restrict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references: String,
    pub related_name: Option<String>,
    pub on_delete: ForeignKeyAction,
}

impl ForeignKey {
    pub fn new(column: impl Into<String>, references: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            references: references.into(),
            related_name: None,
            on_delete: ForeignKeyAction::Cascade,
        }
    }

    /// Name under which the referenced table sees this relation.
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        self.related_name = Some(name.into());
        self
    }

    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    schema: Schema,
    pub foreign_keys: Vec<ForeignKey>,
    pub unique_together: Vec<Vec<String>>,
    pub indexes: Vec<Vec<String>>,
}

impl TableSchema {
    /// Builds a schema; the `id` primary key column is prepended when absent.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let mut all = Vec::with_capacity(columns.len() + 1);
        if !columns.iter().any(|c| c.name == PRIMARY_KEY) {
            all.push(Column::new(PRIMARY_KEY, DataType::Integer).not_null().unique());
        }
        all.extend(columns);
        Self {
            name: name.into(),
            schema: Schema::new(all),
            foreign_keys: Vec::new(),
            unique_together: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Adds the nullable `deleted_at` column.
    pub fn soft_deletable(mut self) -> Self {
        if self.schema.find_column_index(DELETED_AT).is_none() {
            let mut columns = self.schema.columns().to_vec();
            columns.push(Column::new(DELETED_AT, DataType::Timestamp));
            self.schema = Schema::new(columns);
        }
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn with_unique_together(mut self, columns: &[&str]) -> Self {
        self.unique_together
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_index(mut self, columns: &[&str]) -> Self {
        self.indexes.push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.schema
            .find_column_index(column)
            .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), self.name.clone()))
    }

    pub fn is_soft_deletable(&self) -> bool {
        self.schema
            .get_column(DELETED_AT)
            .is_some_and(|c| c.data_type == DataType::Timestamp && c.nullable)
    }

    pub fn is_indexed(&self, columns: &[&str]) -> bool {
        self.index_definitions()
            .iter()
            .any(|def| def.iter().map(String::as_str).eq(columns.iter().copied()))
    }

    /// Every column set that gets a lookup index: explicit indexes, unique
    /// column groups, single unique columns and foreign key columns.
    fn index_definitions(&self) -> Vec<Vec<String>> {
        let mut defs: Vec<Vec<String>> = Vec::new();
        let singles = self
            .schema
            .columns()
            .iter()
            .filter(|c| c.unique)
            .map(|c| vec![c.name.clone()]);
        let fks = self.foreign_keys.iter().map(|fk| vec![fk.column.clone()]);
        for def in self
            .indexes
            .iter()
            .cloned()
            .chain(self.unique_together.iter().cloned())
            .chain(singles)
            .chain(fks)
        {
            if !defs.contains(&def) {
                defs.push(def);
            }
        }
        defs
    }

    /// Column groups whose combined value must be unique.
    fn unique_sets(&self) -> Vec<Vec<String>> {
        let mut sets = self.unique_together.clone();
        sets.extend(
            self.schema
                .columns()
                .iter()
                .filter(|c| c.unique)
                .map(|c| vec![c.name.clone()]),
        );
        sets
    }
}

#[derive(Debug, Clone)]
struct TableIndex {
    columns: Vec<String>,
    positions: Vec<usize>,
    entries: BTreeMap<Vec<Value>, BTreeSet<i64>>,
}

impl TableIndex {
    fn key(&self, row: &Row) -> Vec<Value> {
        self.positions.iter().map(|&p| row[p].clone()).collect()
    }

    fn add(&mut self, id: i64, row: &Row) {
        let key = self.key(row);
        self.entries.entry(key).or_default().insert(id);
    }

    fn remove(&mut self, id: i64, row: &Row) {
        let key = self.key(row);
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<i64, Row>,
    next_row_id: i64,
    #[serde(skip)]
    indexes: Vec<TableIndex>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Result<Self> {
        let mut table = Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 1,
            indexes: Vec::new(),
        };
        table.rebuild_indexes()?;
        Ok(table)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Recreates lookup indexes from the row data (indexes are not serialized).
    pub fn rebuild_indexes(&mut self) -> Result<()> {
        let mut indexes = Vec::new();
        for columns in self.schema.index_definitions() {
            let positions = columns
                .iter()
                .map(|c| self.schema.column_index(c))
                .collect::<Result<Vec<_>>>()?;
            let mut index = TableIndex {
                columns,
                positions,
                entries: BTreeMap::new(),
            };
            for (id, row) in &self.rows {
                index.add(*id, row);
            }
            indexes.push(index);
        }
        self.indexes = indexes;
        Ok(())
    }

    /// Inserts a row, assigning the primary key when column 0 is NULL.
    pub fn insert(&mut self, mut row: Row) -> Result<i64> {
        self.check_arity(&row)?;
        let id = match row[0] {
            Value::Null => self.next_row_id,
            Value::Integer(id) => {
                if self.rows.contains_key(&id) {
                    return Err(DbError::ConstraintViolation(format!(
                        "Duplicate primary key {} in table '{}'",
                        id,
                        self.schema.name()
                    )));
                }
                id
            }
            ref other => {
                return Err(DbError::TypeMismatch(format!(
                    "Primary key must be INTEGER, got {}",
                    other.type_name()
                )));
            }
        };
        row[0] = Value::Integer(id);
        self.validate_row(&row)?;
        self.check_uniqueness(&row, None)?;

        self.next_row_id = self.next_row_id.max(id + 1);
        self.index_row(id, &row);
        self.rows.insert(id, row);
        Ok(id)
    }

    /// Replaces a row, returning the previous version.
    pub fn update(&mut self, id: i64, mut row: Row) -> Result<Row> {
        self.check_arity(&row)?;
        row[0] = Value::Integer(id);
        self.validate_row(&row)?;
        self.check_uniqueness(&row, Some(id))?;

        let old = self.rows.remove(&id).ok_or_else(|| {
            DbError::NotFound(format!("Row {} in table '{}'", id, self.schema.name()))
        })?;
        self.unindex_row(id, &old);
        self.index_row(id, &row);
        self.rows.insert(id, row);
        Ok(old)
    }

    pub fn remove(&mut self, id: i64) -> Option<Row> {
        let row = self.rows.remove(&id)?;
        self.unindex_row(id, &row);
        Some(row)
    }

    /// Puts a row back verbatim; used when undoing a transaction.
    pub(crate) fn restore(&mut self, row: Row) {
        if let Some(id) = row.first().and_then(Value::as_i64) {
            if let Some(old) = self.rows.remove(&id) {
                self.unindex_row(id, &old);
            }
            self.index_row(id, &row);
            self.rows.insert(id, row);
        }
    }

    pub fn get(&self, id: i64) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Ids of rows whose `columns` equal `values`, through an index when one matches.
    pub fn find(&self, columns: &[&str], values: &[Value]) -> Result<Vec<i64>> {
        if let Some(index) = self
            .indexes
            .iter()
            .find(|idx| idx.columns.iter().map(String::as_str).eq(columns.iter().copied()))
        {
            return Ok(index
                .entries
                .get(values)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default());
        }

        let positions = columns
            .iter()
            .map(|c| self.schema.column_index(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(self
            .rows
            .iter()
            .filter(|(_, row)| positions.iter().zip(values).all(|(&p, v)| &row[p] == v))
            .map(|(id, _)| *id)
            .collect())
    }

    fn check_arity(&self, row: &Row) -> Result<()> {
        let expected = self.schema.schema().column_count();
        if row.len() != expected {
            return Err(DbError::Storage(format!(
                "Expected {} columns for '{}', got {}",
                expected,
                self.schema.name(),
                row.len()
            )));
        }
        Ok(())
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        for (column, value) in self.schema.schema().columns().iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }

    fn check_uniqueness(&self, row: &Row, ignore_id: Option<i64>) -> Result<()> {
        for set in self.schema.unique_sets() {
            let columns: Vec<&str> = set.iter().map(String::as_str).collect();
            let positions = columns
                .iter()
                .map(|c| self.schema.column_index(c))
                .collect::<Result<Vec<_>>>()?;
            let key: Vec<Value> = positions.iter().map(|&p| row[p].clone()).collect();
            // NULL never collides, as in SQL
            if key.iter().any(Value::is_null) {
                continue;
            }
            let clash = self
                .find(&columns, &key)?
                .into_iter()
                .any(|id| Some(id) != ignore_id);
            if clash {
                return Err(DbError::ConstraintViolation(format!(
                    "Unique constraint violation on '{}' ({}) for values ({})",
                    self.schema.name(),
                    set.join(", "),
                    key.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")
                )));
            }
        }
        Ok(())
    }

    fn index_row(&mut self, id: i64, row: &Row) {
        for index in &mut self.indexes {
            index.add(id, row);
        }
    }

    fn unindex_row(&mut self, id: i64, row: &Row) {
        for index in &mut self.indexes {
            index.remove(id, row);
        }
    }
}
