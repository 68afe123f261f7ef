//! Loaded records and the capability surface used to delete them.

use crate::core::{DbError, EntityRef, Result, Row, Value};
use crate::facade::SoftDeleteDb;
use crate::model::DeletionPolicy;
use crate::storage::table::{DELETED_AT, PRIMARY_KEY, TableSchema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of a model's table, addressed by model type tag and primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    model: String,
    id: i64,
    fields: BTreeMap<String, Value>,
}

impl Entity {
    pub(crate) fn from_row(model: &str, schema: &TableSchema, row: &Row) -> Result<Self> {
        let id = row.first().and_then(Value::as_i64).ok_or_else(|| {
            DbError::Storage(format!("Row in '{}' has no integer primary key", schema.name()))
        })?;
        let fields = schema
            .schema()
            .columns()
            .iter()
            .zip(row.iter())
            .skip(1)
            .map(|(column, value)| (column.name.clone(), value.clone()))
            .collect();
        Ok(Self {
            model: model.to_string(),
            id,
            fields,
        })
    }

    /// Lays the fields out in column order; absent fields become NULL.
    pub(crate) fn to_row(&self, schema: &TableSchema) -> Result<Row> {
        for name in self.fields.keys() {
            schema.column_index(name)?;
        }
        Ok(schema
            .schema()
            .columns()
            .iter()
            .map(|column| {
                if column.name == PRIMARY_KEY {
                    Value::Integer(self.id)
                } else {
                    self.fields.get(&column.name).cloned().unwrap_or(Value::Null)
                }
            })
            .collect())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.model.clone(), self.id)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field in memory; persisted by `save`.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.fields.get(DELETED_AT).and_then(Value::as_timestamp)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }

    pub(crate) fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>) {
        self.fields.insert(DELETED_AT.to_string(), at.into());
    }

    /// Administrative toggle of the deleted flag.
    ///
    /// Nothing is written here: a flag that differs from the current state
    /// yields the transition to apply with [`PendingTransition::commit`].
    pub fn set_deleted_flag(&self, deleted: bool) -> Option<PendingTransition> {
        match (deleted, self.is_deleted()) {
            (true, false) => Some(PendingTransition::Delete(self.entity_ref())),
            (false, true) => Some(PendingTransition::Undelete(self.entity_ref())),
            _ => None,
        }
    }

    /// Writes the current fields back. Never deletes or undeletes: a changed
    /// `deleted_at` is rejected with `ConstraintViolation`.
    pub async fn save(&self, db: &SoftDeleteDb) -> Result<()> {
        let mut session = db.begin().await;
        session.save(self)?;
        session.commit()
    }

    /// Reloads the fields from the store, including a changed `deleted_at`.
    pub async fn refresh(&mut self, db: &SoftDeleteDb) -> Result<()> {
        let session = db.begin().await;
        let fresh = session
            .load(&self.entity_ref())?
            .ok_or_else(|| DbError::NotFound(self.entity_ref().to_string()))?;
        session.commit()?;
        *self = fresh;
        Ok(())
    }

    pub async fn delete(&self, db: &SoftDeleteDb) -> Result<DeleteOutcome> {
        db.delete(self, DeleteOptions::default()).await
    }

    /// Undeletes the entity's ChangeSet; returns how many entities were restored.
    pub async fn undelete(&self, db: &SoftDeleteDb) -> Result<usize> {
        db.undelete(self).await
    }
}

/// Optional inputs of a delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Overrides both the class default and every relation override.
    pub policy: Option<DeletionPolicy>,
    /// ChangeSet to record into instead of resolving one.
    pub changeset: Option<i64>,
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_policy(mut self, policy: DeletionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn changeset(mut self, changeset_id: i64) -> Self {
        self.changeset = Some(changeset_id);
        self
    }
}

/// What a delete actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteOutcome {
    /// Flagged deleted and recorded into the ChangeSet.
    SoftDeleted { changeset_id: i64 },
    /// Physically removed, bookkeeping included.
    HardDeleted,
    /// Physically removed although it was flagged deleted with no
    /// ChangeSet or record pointing at it.
    HardDeletedWithoutBookkeeping,
}

/// Deferred effect of [`Entity::set_deleted_flag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingTransition {
    Delete(EntityRef),
    Undelete(EntityRef),
}

impl PendingTransition {
    pub fn entity(&self) -> &EntityRef {
        match self {
            PendingTransition::Delete(entity) | PendingTransition::Undelete(entity) => entity,
        }
    }

    /// Replays the transition through the regular delete/undelete paths.
    pub async fn commit(self, db: &SoftDeleteDb) -> Result<()> {
        let mut session = db.begin().await;
        let entity = session
            .load(self.entity())?
            .ok_or_else(|| DbError::NotFound(self.entity().to_string()))?;
        match self {
            PendingTransition::Delete(_) => {
                session.delete(&entity, DeleteOptions::default()).await?;
            }
            PendingTransition::Undelete(_) => {
                session.undelete(&entity).await?;
            }
        }
        session.commit()
    }
}
