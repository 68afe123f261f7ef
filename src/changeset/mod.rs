//! Bookkeeping that makes a multi-row soft delete undoable as one unit.
//!
//! A [`ChangeSet`] stands for one logical delete rooted at one entity; each
//! entity soft-deleted within it gets a [`SoftDeleteRecord`]. Undeleting the
//! ChangeSet restores all of them and removes the bookkeeping.

mod lifecycle;

use crate::core::{Column, DataType, DbError, EntityRef, Result, Row, Value};
use crate::storage::table::{ForeignKey, ForeignKeyAction, TableSchema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// The entity whose delete opened this ChangeSet
    pub root: EntityRef,
}

impl ChangeSet {
    pub(crate) fn schema(table: &str) -> TableSchema {
        TableSchema::new(
            table,
            vec![
                Column::new("created_at", DataType::Timestamp).not_null(),
                Column::new("root_entity_type", DataType::Text).not_null(),
                Column::new("root_entity_id", DataType::Integer).not_null(),
            ],
        )
        .with_index(&["root_entity_type", "root_entity_id"])
    }

    pub(crate) fn new_row(root: &EntityRef, created_at: DateTime<Utc>) -> Row {
        vec![
            Value::Null,
            Value::Timestamp(created_at),
            Value::from(root.entity_type.as_str()),
            Value::Integer(root.entity_id),
        ]
    }

    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        match row.as_slice() {
            [
                Value::Integer(id),
                Value::Timestamp(created_at),
                Value::Text(entity_type),
                Value::Integer(entity_id),
            ] => Ok(Self {
                id: *id,
                created_at: *created_at,
                root: EntityRef::new(entity_type.clone(), *entity_id),
            }),
            _ => Err(DbError::Storage(format!("Malformed changeset row: {:?}", row))),
        }
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Changeset {}: {}, {}", self.id, self.created_at, self.root)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDeleteRecord {
    pub id: i64,
    pub changeset_id: i64,
    pub created_at: DateTime<Utc>,
    pub entity: EntityRef,
}

impl SoftDeleteRecord {
    /// Records go away with their ChangeSet.
    pub(crate) fn schema(table: &str, changeset_table: &str) -> TableSchema {
        TableSchema::new(
            table,
            vec![
                Column::new("changeset_id", DataType::Integer).not_null(),
                Column::new("created_at", DataType::Timestamp).not_null(),
                Column::new("entity_type", DataType::Text).not_null(),
                Column::new("entity_id", DataType::Integer).not_null(),
            ],
        )
        .with_foreign_key(
            ForeignKey::new("changeset_id", changeset_table)
                .related_name("soft_delete_records")
                .on_delete(ForeignKeyAction::Cascade),
        )
        .with_unique_together(&["changeset_id", "entity_type", "entity_id"])
        .with_index(&["entity_type", "entity_id"])
    }

    pub(crate) fn new_row(changeset_id: i64, entity: &EntityRef, created_at: DateTime<Utc>) -> Row {
        vec![
            Value::Null,
            Value::Integer(changeset_id),
            Value::Timestamp(created_at),
            Value::from(entity.entity_type.as_str()),
            Value::Integer(entity.entity_id),
        ]
    }

    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        match row.as_slice() {
            [
                Value::Integer(id),
                Value::Integer(changeset_id),
                Value::Timestamp(created_at),
                Value::Text(entity_type),
                Value::Integer(entity_id),
            ] => Ok(Self {
                id: *id,
                changeset_id: *changeset_id,
                created_at: *created_at,
                entity: EntityRef::new(entity_type.clone(), *entity_id),
            }),
            _ => Err(DbError::Storage(format!("Malformed soft delete record row: {:?}", row))),
        }
    }
}

impl fmt::Display for SoftDeleteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SoftDeleteRecord: {} in changeset {}, {}",
            self.entity, self.changeset_id, self.created_at
        )
    }
}

/// A ChangeSet with its records, as shown by the admin detail view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSetDetail {
    pub changeset: ChangeSet,
    pub records: Vec<SoftDeleteRecord>,
    /// Current state of the root entity; None once it was physically removed
    pub root: Option<crate::entity::Entity>,
}
