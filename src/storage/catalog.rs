use std::collections::HashMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::core::{DbError, Result};
use super::table::{ForeignKeyAction, TableSchema};

/// Cardinality of a reverse relation, seen from the referenced (parent) table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
}

/// A relation discovered from a foreign key on `child_table` that points at the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub kind: RelationKind,
    pub child_table: String,
    pub fk_column: String,
    pub fk_nullable: bool,
    pub on_delete: ForeignKeyAction,
}

/// Catalog holds table metadata only.
/// Immutable once built; cloning is cheap (Copy-on-Write behind an `Arc`).
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: Arc<HashMap<String, TableSchema>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a NEW catalog with the table added; `self` stays untouched.
    pub fn with_table(self, schema: TableSchema) -> Result<Self> {
        let name = schema.name().to_string();

        if self.tables.contains_key(&name) {
            return Err(DbError::TableExists(name));
        }
        self.validate_foreign_keys(&schema)?;

        let mut new_tables = (*self.tables).clone();
        new_tables.insert(name, schema);

        Ok(Self {
            tables: Arc::new(new_tables),
        })
    }

    /// Rebuilds a catalog from schemas that were validated when first created.
    pub fn from_schemas(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        let tables = schemas
            .into_iter()
            .map(|schema| (schema.name().to_string(), schema))
            .collect();
        Self {
            tables: Arc::new(tables),
        }
    }

    pub fn get_table(&self, name: &str) -> Result<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every relation other tables (or this one) declare towards `table`,
    /// ordered by child table then foreign key column.
    pub fn reverse_relations(&self, table: &str) -> Vec<RelationDescriptor> {
        let mut relations: Vec<RelationDescriptor> = self
            .tables
            .values()
            .flat_map(|child| {
                child
                    .foreign_keys
                    .iter()
                    .filter(|fk| fk.references == table)
                    .map(move |fk| {
                        let column = child.schema().get_column(&fk.column);
                        let unique = column.is_some_and(|c| c.unique);
                        RelationDescriptor {
                            name: fk
                                .related_name
                                .clone()
                                .unwrap_or_else(|| format!("{}_set", child.name())),
                            kind: if unique {
                                RelationKind::OneToOne
                            } else {
                                RelationKind::OneToMany
                            },
                            child_table: child.name().to_string(),
                            fk_column: fk.column.clone(),
                            fk_nullable: column.is_some_and(|c| c.nullable),
                            on_delete: fk.on_delete,
                        }
                    })
            })
            .collect();
        relations.sort_by(|a, b| {
            (a.child_table.as_str(), a.fk_column.as_str())
                .cmp(&(b.child_table.as_str(), b.fk_column.as_str()))
        });
        relations
    }

    fn validate_foreign_keys(&self, schema: &TableSchema) -> Result<()> {
        for fk in &schema.foreign_keys {
            let column = schema
                .schema()
                .get_column(&fk.column)
                .ok_or_else(|| DbError::ColumnNotFound(fk.column.clone(), schema.name().to_string()))?;
            let self_reference = fk.references == schema.name();
            if !self_reference && !self.tables.contains_key(&fk.references) {
                return Err(DbError::TableNotFound(fk.references.clone()));
            }
            if fk.on_delete == ForeignKeyAction::SetNull && !column.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Foreign key '{}.{}' uses SET NULL on a NOT NULL column",
                    schema.name(),
                    fk.column
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};
    use crate::storage::table::ForeignKey;

    fn catalog() -> Catalog {
        Catalog::new()
            .with_table(TableSchema::new("author", vec![]))
            .unwrap()
            .with_table(
                TableSchema::new("book", vec![Column::new("author_id", DataType::Integer)])
                    .with_foreign_key(ForeignKey::new("author_id", "author").related_name("books")),
            )
            .unwrap()
            .with_table(
                TableSchema::new(
                    "profile",
                    vec![Column::new("author_id", DataType::Integer).unique()],
                )
                .with_foreign_key(ForeignKey::new("author_id", "author")),
            )
            .unwrap()
    }

    #[test]
    fn test_reverse_relations() {
        let relations = catalog().reverse_relations("author");
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0].name, "books");
        assert_eq!(relations[0].kind, RelationKind::OneToMany);
        assert_eq!(relations[1].name, "profile_set");
        assert_eq!(relations[1].kind, RelationKind::OneToOne);
    }

    #[test]
    fn test_foreign_key_target_must_exist() {
        let res = Catalog::new().with_table(
            TableSchema::new("orphan", vec![Column::new("x_id", DataType::Integer)])
                .with_foreign_key(ForeignKey::new("x_id", "missing")),
        );
        assert!(matches!(res, Err(DbError::TableNotFound(_))));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let res = catalog().with_table(TableSchema::new("author", vec![]));
        assert!(matches!(res, Err(DbError::TableExists(_))));
    }
}
