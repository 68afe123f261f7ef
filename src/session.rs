use crate::config::SoftDeleteConfig;
use crate::core::{DbError, EntityRef, Result, Value};
use crate::entity::Entity;
use crate::hooks::{HookPoint, HookRegistry};
use crate::model::ModelRegistry;
use crate::storage::catalog::Catalog;
use crate::storage::memory::RowRef;
use crate::storage::table::{DELETED_AT, PRIMARY_KEY};
use crate::transaction::Transaction;
use std::sync::Arc;
use tracing::debug;

/// One unit of work: a transaction plus the models, hooks and configuration
/// in force when it began.
///
/// Nothing is visible to other sessions until [`Session::commit`]; dropping
/// an uncommitted session rolls it back.
#[derive(Debug)]
pub struct Session {
    pub(crate) tx: Transaction,
    pub(crate) models: Arc<ModelRegistry>,
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) config: Arc<SoftDeleteConfig>,
}

impl Session {
    pub(crate) fn new(
        tx: Transaction,
        models: Arc<ModelRegistry>,
        hooks: Arc<HookRegistry>,
        config: Arc<SoftDeleteConfig>,
    ) -> Self {
        Self {
            tx,
            models,
            hooks,
            config,
        }
    }

    pub fn transaction(&mut self) -> &mut Transaction {
        &mut self.tx
    }

    pub fn catalog(&self) -> &Catalog {
        self.tx.catalog()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn config(&self) -> &SoftDeleteConfig {
        &self.config
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()
    }

    // ========================================================================
    // Load / save
    // ========================================================================

    /// Inserts a new entity; the primary key is assigned by the store.
    pub fn create(&mut self, model: &str, fields: &[(&str, Value)]) -> Result<Entity> {
        let def = self.models.resolve(model, self.tx.catalog())?;
        let schema = self.tx.schema(&def.table)?;
        let mut row = vec![Value::Null; schema.schema().column_count()];
        for (name, value) in fields {
            if *name == PRIMARY_KEY {
                return Err(DbError::ConstraintViolation(
                    "Primary key is assigned by the store".into(),
                ));
            }
            row[schema.column_index(name)?] = value.clone();
        }
        let type_tag = def.type_tag.clone();
        let table = def.table.clone();
        let id = self.tx.insert(&table, row)?;
        self.get(&type_tag, id)
    }

    /// Loads an entity whatever its deleted state.
    pub fn load(&self, entity: &EntityRef) -> Result<Option<Entity>> {
        self.models.load(&self.tx, entity)
    }

    pub fn get(&self, model: &str, id: i64) -> Result<Entity> {
        let reference = EntityRef::new(model, id);
        self.load(&reference)?
            .ok_or_else(|| DbError::NotFound(reference.to_string()))
    }

    /// Writes every field of the entity back to its row.
    ///
    /// `deleted_at` only moves through delete and undelete, so a save that
    /// changes it against the stored row is rejected; use
    /// [`Entity::set_deleted_flag`] for an administrative toggle.
    pub fn save(&mut self, entity: &Entity) -> Result<()> {
        let stored = self
            .load(&entity.entity_ref())?
            .ok_or_else(|| DbError::NotFound(entity.entity_ref().to_string()))?;
        if stored.deleted_at() != entity.deleted_at() {
            return Err(DbError::ConstraintViolation(format!(
                "{} cannot be changed by save on {}; delete or undelete instead",
                DELETED_AT,
                entity.entity_ref()
            )));
        }
        self.write(entity)
    }

    /// Unchecked row write used by the delete and undelete paths.
    pub(crate) fn write(&mut self, entity: &Entity) -> Result<()> {
        let def = self.models.resolve(entity.model(), self.tx.catalog())?;
        let table = def.table.clone();
        let row = entity.to_row(self.tx.schema(&table)?)?;
        self.tx.update(&table, entity.id(), row)
    }

    // ========================================================================
    // Internals shared by the delete and undelete paths
    // ========================================================================

    pub(crate) async fn fire(&mut self, point: HookPoint, entity: &Entity) -> Result<()> {
        let hooks = self.hooks.clone();
        hooks.dispatch(point, entity, &mut self.tx).await
    }

    /// Physically removes the entity with pre/post-delete hooks, then drops
    /// the bookkeeping of every row the store removed.
    pub(crate) async fn hard_delete(&mut self, entity: &Entity) -> Result<Vec<RowRef>> {
        self.fire(HookPoint::PreDelete, entity).await?;
        let table = self
            .models
            .resolve(entity.model(), self.tx.catalog())?
            .table
            .clone();
        let removed = self.tx.delete(&table, entity.id())?;
        debug!(entity = %entity.entity_ref(), rows = removed.len(), "hard delete");
        self.purge_bookkeeping(&removed)?;
        self.fire(HookPoint::PostDelete, entity).await?;
        Ok(removed)
    }
}
