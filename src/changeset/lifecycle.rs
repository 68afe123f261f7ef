use super::{ChangeSet, ChangeSetDetail, SoftDeleteRecord};
use crate::core::{DbError, EntityRef, Result, Value};
use crate::entity::Entity;
use crate::hooks::HookPoint;
use crate::session::Session;
use crate::storage::memory::RowRef;
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

// ============================================================================
// Queries
// ============================================================================

impl Session {
    fn changeset_table(&self) -> String {
        self.config.changeset_table.clone()
    }

    fn record_table(&self) -> String {
        self.config.record_table.clone()
    }

    pub fn find_changeset(&self, id: i64) -> Result<Option<ChangeSet>> {
        self.tx
            .get(&self.config.changeset_table, id)?
            .map(|row| ChangeSet::from_row(&row))
            .transpose()
    }

    pub fn changeset(&self, id: i64) -> Result<ChangeSet> {
        self.find_changeset(id)?
            .ok_or_else(|| DbError::NotFound(format!("Changeset {}", id)))
    }

    /// Every ChangeSet, oldest first.
    pub fn changesets(&self) -> Result<Vec<ChangeSet>> {
        let mut changesets = self
            .tx
            .scan(&self.config.changeset_table)?
            .iter()
            .map(ChangeSet::from_row)
            .collect::<Result<Vec<_>>>()?;
        changesets.sort_by_key(|cs| (cs.created_at, cs.id));
        Ok(changesets)
    }

    /// Records owned by a ChangeSet, oldest first.
    pub fn records(&self, changeset_id: i64) -> Result<Vec<SoftDeleteRecord>> {
        self.load_records(&["changeset_id"], &[Value::Integer(changeset_id)])
    }

    /// Records of one entity across all ChangeSets, oldest first.
    pub fn records_for(&self, entity: &EntityRef) -> Result<Vec<SoftDeleteRecord>> {
        self.load_records(
            &["entity_type", "entity_id"],
            &[Value::from(entity.entity_type.as_str()), Value::Integer(entity.entity_id)],
        )
    }

    fn load_records(&self, columns: &[&str], values: &[Value]) -> Result<Vec<SoftDeleteRecord>> {
        let table = &self.config.record_table;
        let mut records = Vec::new();
        for id in self.tx.find(table, columns, values)? {
            if let Some(row) = self.tx.get(table, id)? {
                records.push(SoftDeleteRecord::from_row(&row)?);
            }
        }
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }

    pub fn count_changesets(&self) -> Result<usize> {
        Ok(self.tx.table(&self.config.changeset_table)?.row_count())
    }

    pub fn count_records(&self) -> Result<usize> {
        Ok(self.tx.table(&self.config.record_table)?.row_count())
    }

    /// The ChangeSet, its records and the current state of its root.
    pub fn changeset_detail(&self, id: i64) -> Result<ChangeSetDetail> {
        let changeset = self.changeset(id)?;
        let records = self.records(id)?;
        let root = self.load(&changeset.root)?;
        Ok(ChangeSetDetail {
            changeset,
            records,
            root,
        })
    }

    /// The ChangeSet an entity's delete belongs to.
    ///
    /// Looks at the entity's most recent record first, then at the most
    /// recent ChangeSet rooted at the entity. With `create` a new ChangeSet
    /// rooted at the entity is opened when neither exists; otherwise the
    /// lookup fails with `NotFound`.
    pub fn resolve_changeset(&mut self, entity: &EntityRef, create: bool) -> Result<ChangeSet> {
        if let Some(record) = self.records_for(entity)?.pop() {
            debug!(entity = %entity, changeset_id = record.changeset_id, "changeset found via latest record");
            return self.changeset(record.changeset_id);
        }

        let rooted = self.tx.find(
            &self.config.changeset_table,
            &["root_entity_type", "root_entity_id"],
            &[Value::from(entity.entity_type.as_str()), Value::Integer(entity.entity_id)],
        )?;
        let mut candidates = Vec::with_capacity(rooted.len());
        for id in rooted {
            candidates.push(self.changeset(id)?);
        }
        if let Some(changeset) = candidates.into_iter().max_by_key(|cs| (cs.created_at, cs.id)) {
            debug!(entity = %entity, changeset_id = changeset.id, "changeset found via root");
            return Ok(changeset);
        }

        if !create {
            return Err(DbError::NotFound(format!("No changeset for {}", entity)));
        }
        let table = self.changeset_table();
        let id = self.tx.insert(&table, ChangeSet::new_row(entity, Utc::now()))?;
        info!(entity = %entity, changeset_id = id, "changeset created");
        self.changeset(id)
    }

    /// Returns the record of `entity` in the ChangeSet, inserting it when absent.
    pub fn get_or_create_record(&mut self, changeset_id: i64, entity: &EntityRef) -> Result<SoftDeleteRecord> {
        let existing = self.load_records(
            &["changeset_id", "entity_type", "entity_id"],
            &[
                Value::Integer(changeset_id),
                Value::from(entity.entity_type.as_str()),
                Value::Integer(entity.entity_id),
            ],
        )?;
        if let Some(record) = existing.into_iter().next() {
            return Ok(record);
        }

        let table = self.record_table();
        let id = self
            .tx
            .insert(&table, SoftDeleteRecord::new_row(changeset_id, entity, Utc::now()))?;
        let row = self
            .tx
            .get(&table, id)?
            .ok_or_else(|| DbError::NotFound(format!("Soft delete record {}", id)))?;
        SoftDeleteRecord::from_row(&row)
    }

    pub(crate) fn delete_record(&mut self, id: i64) -> Result<()> {
        let table = self.record_table();
        self.tx.delete(&table, id)?;
        Ok(())
    }

    /// Removes a ChangeSet together with all of its records.
    pub fn delete_changeset(&mut self, id: i64) -> Result<()> {
        let table = self.changeset_table();
        if self.tx.delete(&table, id)?.is_empty() {
            return Err(DbError::NotFound(format!("Changeset {}", id)));
        }
        debug!(changeset_id = id, "changeset deleted");
        Ok(())
    }

    /// Drops the records of physically removed rows, then every ChangeSet
    /// left without records.
    pub(crate) fn purge_bookkeeping(&mut self, removed: &[RowRef]) -> Result<()> {
        let changeset_table = self.changeset_table();
        let record_table = self.record_table();
        let mut touched = BTreeSet::new();

        for row in removed {
            if row.table == changeset_table || row.table == record_table {
                continue;
            }
            let entity = EntityRef::new(self.models.for_table(&row.table).type_tag.clone(), row.id);
            for record in self.records_for(&entity)? {
                self.delete_record(record.id)?;
                touched.insert(record.changeset_id);
            }
        }

        for changeset_id in touched {
            if self.find_changeset(changeset_id)?.is_some() && self.records(changeset_id)?.is_empty() {
                debug!(changeset_id, "changeset emptied by physical delete");
                self.delete_changeset(changeset_id)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Undelete
// ============================================================================

impl Session {
    /// Undeletes the whole ChangeSet the entity's delete belongs to.
    pub async fn undelete(&mut self, entity: &Entity) -> Result<usize> {
        let changeset = self.resolve_changeset(&entity.entity_ref(), false)?;
        self.undelete_changeset(changeset.id).await
    }

    /// Restores the root and every recorded entity, then removes the
    /// ChangeSet. Returns how many entities were restored.
    pub async fn undelete_changeset(&mut self, id: i64) -> Result<usize> {
        let changeset = self.changeset(id)?;
        debug!(changeset_id = id, root = %changeset.root, "changeset undelete");
        let mut restored = 0;

        match self.load(&changeset.root)? {
            Some(root) => {
                if self.restore(root).await? {
                    restored += 1;
                }
            }
            None => warn!(changeset_id = id, root = %changeset.root, "changeset root no longer exists"),
        }

        for record in self.records(id)? {
            if record.entity == changeset.root {
                continue;
            }
            match self.load(&record.entity)? {
                Some(entity) => {
                    if self.restore(entity).await? {
                        restored += 1;
                    }
                }
                None => warn!(changeset_id = id, entity = %record.entity, "recorded entity no longer exists"),
            }
        }

        self.delete_changeset(id)?;
        info!(changeset_id = id, restored, "changeset undeleted");
        Ok(restored)
    }

    /// Clears `deleted_at` with pre/post-undelete hooks. False when the
    /// entity was not deleted.
    pub(crate) async fn restore(&mut self, mut entity: Entity) -> Result<bool> {
        if !entity.is_deleted() {
            return Ok(false);
        }
        self.fire(HookPoint::PreUndelete, &entity).await?;
        entity.set_deleted_at(None);
        self.write(&entity)?;
        self.fire(HookPoint::PostUndelete, &entity).await?;
        Ok(true)
    }
}
