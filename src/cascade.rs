//! The delete state machine and the relation walk.
//!
//! ```text
//!  active ──delete (soft policy)──> soft-deleted ──delete──> physically removed
//!    ^                                   │
//!    └────────── undelete ───────────────┘
//! ```
//!
//! Plain models, and soft models whose policy is `HardPassthrough`, skip
//! straight to physical removal.

use crate::core::{DbError, Result, Value};
use crate::entity::{DeleteOptions, DeleteOutcome, Entity};
use crate::hooks::HookPoint;
use crate::model::{DeletionPolicy, ModelDef, Relation};
use crate::session::Session;
use async_recursion::async_recursion;
use chrono::Utc;
use tracing::{debug, warn};

impl Session {
    /// Deletes an entity according to its current stored state.
    pub async fn delete(&mut self, entity: &Entity, options: DeleteOptions) -> Result<DeleteOutcome> {
        let current = self
            .load(&entity.entity_ref())?
            .ok_or_else(|| DbError::NotFound(entity.entity_ref().to_string()))?;
        self.delete_entity(current, options.policy, options.changeset).await
    }

    #[async_recursion]
    pub(crate) async fn delete_entity(
        &mut self,
        entity: Entity,
        forced: Option<DeletionPolicy>,
        changeset: Option<i64>,
    ) -> Result<DeleteOutcome> {
        let model = self
            .models
            .resolve(entity.model(), self.tx.catalog())?
            .into_owned();

        if !model.soft_delete {
            self.hard_delete(&entity).await?;
            return Ok(DeleteOutcome::HardDeleted);
        }
        if entity.is_deleted() {
            return self.confirm_delete(&entity, changeset).await;
        }

        let policy = forced.unwrap_or(model.policy);
        if !policy.soft_deletes() {
            self.hard_delete(&entity).await?;
            return Ok(DeleteOutcome::HardDeleted);
        }

        let changeset_id = self.soft_delete(entity.clone(), changeset).await?;
        let forced = if policy == DeletionPolicy::SetNull {
            Some(DeletionPolicy::SetNull)
        } else {
            forced
        };
        if policy.walks_relations() {
            self.cascade(&entity, &model, changeset_id, forced).await?;
            debug!(entity = %entity.entity_ref(), changeset_id, "finished soft deleting related");
        }
        Ok(DeleteOutcome::SoftDeleted { changeset_id })
    }

    /// Flags the entity deleted and records it. Returns the ChangeSet used.
    async fn soft_delete(&mut self, mut entity: Entity, changeset: Option<i64>) -> Result<i64> {
        let reference = entity.entity_ref();
        self.fire(HookPoint::PreDelete, &entity).await?;
        self.fire(HookPoint::PreSoftDelete, &entity).await?;
        debug!(entity = %reference, "soft deleting");

        let changeset_id = match changeset {
            Some(id) => self.changeset(id)?.id,
            None => self.resolve_changeset(&reference, true)?.id,
        };
        self.get_or_create_record(changeset_id, &reference)?;
        entity.set_deleted_at(Some(Utc::now()));
        self.write(&entity)?;

        self.fire(HookPoint::PostDelete, &entity).await?;
        self.fire(HookPoint::PostSoftDelete, &entity).await?;
        Ok(changeset_id)
    }

    /// Second delete of a soft-deleted entity: drop its bookkeeping and
    /// remove it for good.
    async fn confirm_delete(&mut self, entity: &Entity, changeset: Option<i64>) -> Result<DeleteOutcome> {
        let reference = entity.entity_ref();
        let owning = match changeset {
            Some(id) => self.find_changeset(id)?,
            None => match self.resolve_changeset(&reference, false) {
                Ok(cs) => Some(cs),
                Err(err) if err.is_not_found() => None,
                Err(err) => return Err(err),
            },
        };
        let record = match &owning {
            Some(cs) => self
                .records(cs.id)?
                .into_iter()
                .find(|record| record.entity == reference),
            None => None,
        };

        let Some(record) = record else {
            if self.config.strict_bookkeeping {
                return Err(DbError::InconsistentState(format!(
                    "{} is flagged deleted but has no soft delete record",
                    reference
                )));
            }
            warn!(entity = %reference, "flagged deleted without bookkeeping; deleting anyway");
            self.hard_delete(entity).await?;
            return Ok(DeleteOutcome::HardDeletedWithoutBookkeeping);
        };

        if self.records(record.changeset_id)?.len() == 1 {
            self.delete_changeset(record.changeset_id)?;
        } else {
            self.delete_record(record.id)?;
        }
        debug!(entity = %reference, changeset_id = record.changeset_id, "hard deleting");
        self.hard_delete(entity).await?;
        Ok(DeleteOutcome::HardDeleted)
    }

    /// Applies the relation policy to every relation of a soft-deleted parent.
    async fn cascade(
        &mut self,
        parent: &Entity,
        model: &ModelDef,
        changeset_id: i64,
        forced: Option<DeletionPolicy>,
    ) -> Result<()> {
        let models = self.models.clone();
        let relations = models.relations(model, self.tx.catalog());

        for relation in relations {
            let name = relation.descriptor.name.as_str();
            let policy = model.relation_policy(name, forced);
            if policy == DeletionPolicy::HardPassthrough {
                debug!(parent = %parent.entity_ref(), relation = name, "relation left untouched");
                continue;
            }

            let members = self.relation_members(parent, &model.table, &relation)?;
            if members.is_empty() {
                continue;
            }
            debug!(
                parent = %parent.entity_ref(),
                relation = name,
                members = members.len(),
                policy = %policy,
                "cascading"
            );

            if policy == DeletionPolicy::SetNull {
                self.detach(members, &relation.descriptor.fk_column)?;
                continue;
            }
            // one-to-one and one-to-many cascade alike; a one-to-one side
            // simply has a single member
            if relation.child.soft_delete {
                self.delete_batch(members, Some(changeset_id), forced).await?;
            } else {
                for member in members {
                    if self.load(&member.entity_ref())?.is_some() {
                        self.hard_delete(&member).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Related entities a cascade visits: active members for soft-deletable
    /// children, every member for plain ones.
    pub(crate) fn relation_members(
        &self,
        parent: &Entity,
        parent_table: &str,
        relation: &Relation<'_>,
    ) -> Result<Vec<Entity>> {
        let descriptor = &relation.descriptor;
        let schema = self.tx.schema(&descriptor.child_table)?;
        let mut members = Vec::new();
        for id in self.tx.find(
            &descriptor.child_table,
            &[descriptor.fk_column.as_str()],
            &[Value::Integer(parent.id())],
        )? {
            if descriptor.child_table == parent_table && id == parent.id() {
                continue;
            }
            let Some(row) = self.tx.get(&descriptor.child_table, id)? else {
                continue;
            };
            let member = Entity::from_row(&relation.child.type_tag, schema, &row)?;
            if relation.child.soft_delete && member.is_deleted() {
                continue;
            }
            members.push(member);
        }
        Ok(members)
    }

    /// Clears the foreign key on each member, leaving `deleted_at` alone.
    fn detach(&mut self, members: Vec<Entity>, fk_column: &str) -> Result<()> {
        for mut member in members {
            member.set(fk_column, Value::Null);
            self.write(&member)?;
        }
        Ok(())
    }

    /// Deletes every member, recording soft deletes into `changeset` or,
    /// without one, into each member's own resolved ChangeSet.
    pub(crate) async fn delete_batch(
        &mut self,
        members: Vec<Entity>,
        changeset: Option<i64>,
        forced: Option<DeletionPolicy>,
    ) -> Result<Vec<DeleteOutcome>> {
        let mut outcomes = Vec::with_capacity(members.len());
        for member in members {
            let reference = member.entity_ref();
            // an earlier member's cascade may already have touched this one
            let Some(current) = self.load(&reference)? else {
                continue;
            };
            let model = self
                .models
                .resolve(current.model(), self.tx.catalog())?
                .into_owned();

            // soft-deleted by this operation through another path: record it
            // here as well, never confirm
            if model.soft_delete && !member.is_deleted() && current.is_deleted() {
                let changeset_id = match changeset {
                    Some(id) => id,
                    None => self.resolve_changeset(&reference, true)?.id,
                };
                self.get_or_create_record(changeset_id, &reference)?;
                debug!(entity = %reference, changeset_id, "already soft deleted by this operation");
                outcomes.push(DeleteOutcome::SoftDeleted { changeset_id });
                continue;
            }
            let records = model.soft_delete
                && (current.is_deleted() || forced.unwrap_or(model.policy).soft_deletes());

            let outcome = if records {
                let changeset_id = match changeset {
                    Some(id) => id,
                    None => self.resolve_changeset(&reference, true)?.id,
                };
                self.get_or_create_record(changeset_id, &reference)?;
                self.delete_entity(current, forced, Some(changeset_id)).await?
            } else {
                self.delete_entity(current, forced, None).await?
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Undeletes every member's ChangeSet; members already restored by an
    /// earlier member's ChangeSet are skipped. Returns how many entities
    /// were restored.
    pub(crate) async fn undelete_batch(&mut self, members: Vec<Entity>) -> Result<usize> {
        let mut restored = 0;
        for member in members {
            let reference = member.entity_ref();
            let Some(current) = self.load(&reference)? else {
                continue;
            };
            if !current.is_deleted() {
                continue;
            }
            match self.resolve_changeset(&reference, false) {
                Ok(changeset) => restored += self.undelete_changeset(changeset.id).await?,
                Err(err) if err.is_not_found() => {
                    warn!(entity = %reference, "flagged deleted without bookkeeping; restoring directly");
                    if self.restore(current).await? {
                        restored += 1;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(restored)
    }
}
