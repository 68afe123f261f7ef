use crate::changeset::{ChangeSet, ChangeSetDetail, SoftDeleteRecord};
use crate::config::SoftDeleteConfig;
use crate::core::{DbError, Result, Value};
use crate::entity::{DeleteOptions, DeleteOutcome, Entity};
use crate::hooks::{DeletionHook, HookRegistry};
use crate::model::{ModelDef, ModelRegistry};
use crate::query::{Predicate, QuerySet, Selection};
use crate::session::Session;
use crate::storage::persistence::{DatabaseSnapshot, SnapshotManager};
use crate::storage::{InMemoryStorage, TableSchema};
use crate::transaction::TransactionManager;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Entry point: the store, its models and hooks, and the soft delete configuration.
///
/// Cloning is cheap; clones share the same database.
#[derive(Clone)]
pub struct SoftDeleteDb {
    inner: Arc<DbInner>,
}

struct DbInner {
    transactions: TransactionManager,
    /// Copy-on-Write: sessions keep the registry they started with
    models: RwLock<Arc<ModelRegistry>>,
    hooks: RwLock<Arc<HookRegistry>>,
    config: Arc<SoftDeleteConfig>,
}

impl SoftDeleteDb {
    /// Opens an empty database and creates the bookkeeping tables.
    pub async fn open(config: SoftDeleteConfig) -> Result<Self> {
        Self::with_storage(InMemoryStorage::new(), ModelRegistry::new(), config).await
    }

    async fn with_storage(
        storage: InMemoryStorage,
        models: ModelRegistry,
        config: SoftDeleteConfig,
    ) -> Result<Self> {
        config.validate()?;
        if !storage.table_exists(&config.changeset_table).await {
            storage
                .create_table(ChangeSet::schema(&config.changeset_table))
                .await?;
        }
        if !storage.table_exists(&config.record_table).await {
            storage
                .create_table(SoftDeleteRecord::schema(
                    &config.record_table,
                    &config.changeset_table,
                ))
                .await?;
        }

        Ok(Self {
            inner: Arc::new(DbInner {
                transactions: TransactionManager::new(storage),
                models: RwLock::new(Arc::new(models)),
                hooks: RwLock::new(Arc::new(HookRegistry::new())),
                config: Arc::new(config),
            }),
        })
    }

    pub fn config(&self) -> &SoftDeleteConfig {
        &self.inner.config
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    // ========================================================================
    // Schema and models
    // ========================================================================

    pub async fn create_table(&self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        self.inner.transactions.storage().create_table(schema).await?;
        info!(table = %name, "table created");
        Ok(())
    }

    pub async fn list_tables(&self) -> Vec<String> {
        self.inner.transactions.storage().list_tables().await
    }

    pub async fn register_model(&self, model: ModelDef) -> Result<()> {
        let tx = self.inner.transactions.begin().await;
        let mut models = self.inner.models.write().await;
        let mut updated = (**models).clone();
        updated.register(model.clone(), tx.catalog())?;
        *models = Arc::new(updated);
        tx.commit()?;
        info!(model = %model.type_tag, table = %model.table, soft = model.soft_delete, policy = %model.policy, "model registered");
        Ok(())
    }

    pub async fn models(&self) -> Arc<ModelRegistry> {
        self.inner.models.read().await.clone()
    }

    // ========================================================================
    // Hooks
    // ========================================================================

    /// Hooks registered later only affect sessions begun afterwards.
    pub async fn subscribe(&self, hook: Arc<dyn DeletionHook>) {
        let mut hooks = self.inner.hooks.write().await;
        let mut updated = (**hooks).clone();
        updated.subscribe(hook);
        *hooks = Arc::new(updated);
    }

    pub async fn subscribe_model(&self, model: &str, hook: Arc<dyn DeletionHook>) {
        let mut hooks = self.inner.hooks.write().await;
        let mut updated = (**hooks).clone();
        updated.subscribe_model(model, hook);
        *hooks = Arc::new(updated);
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Starts a session, waiting for any running one to finish.
    pub async fn begin(&self) -> Session {
        let models = self.inner.models.read().await.clone();
        let hooks = self.inner.hooks.read().await.clone();
        let tx = self.inner.transactions.begin().await;
        Session::new(tx, models, hooks, self.inner.config.clone())
    }

    pub async fn create(&self, model: &str, fields: &[(&str, Value)]) -> Result<Entity> {
        let mut session = self.begin().await;
        let entity = session.create(model, fields)?;
        session.commit()?;
        Ok(entity)
    }

    /// Loads an entity whatever its deleted state.
    pub async fn get(&self, model: &str, id: i64) -> Result<Entity> {
        let session = self.begin().await;
        let entity = session.get(model, id)?;
        session.commit()?;
        Ok(entity)
    }

    /// The active members of a model; see [`QuerySet`] for other views.
    pub fn objects(&self, model: &str) -> QuerySet {
        QuerySet::new(self.clone(), Selection::new(model))
    }

    /// Members of one of the entity's relations, by relation name.
    pub async fn related(&self, entity: &Entity, relation: &str) -> Result<QuerySet> {
        let session = self.begin().await;
        let model = session.models().resolve(entity.model(), session.catalog())?;
        let descriptor = session
            .catalog()
            .reverse_relations(&model.table)
            .into_iter()
            .find(|r| r.name == relation)
            .ok_or_else(|| {
                DbError::NotFound(format!("Relation '{}' on {}", relation, entity.model()))
            })?;
        let child = session.models().for_table(&descriptor.child_table).type_tag.clone();
        session.commit()?;

        Ok(self
            .objects(&child)
            .filter(Predicate::eq(descriptor.fk_column, entity.id())))
    }

    pub async fn delete(&self, entity: &Entity, options: DeleteOptions) -> Result<DeleteOutcome> {
        let mut session = self.begin().await;
        let outcome = session.delete(entity, options).await?;
        session.commit()?;
        Ok(outcome)
    }

    /// Undeletes the ChangeSet the entity's delete belongs to.
    /// Returns how many entities were restored.
    pub async fn undelete(&self, entity: &Entity) -> Result<usize> {
        let mut session = self.begin().await;
        let restored = session.undelete(entity).await?;
        session.commit()?;
        Ok(restored)
    }

    // ========================================================================
    // ChangeSets
    // ========================================================================

    pub async fn changesets(&self) -> Result<Vec<ChangeSet>> {
        let session = self.begin().await;
        let changesets = session.changesets()?;
        session.commit()?;
        Ok(changesets)
    }

    pub async fn changeset(&self, id: i64) -> Result<ChangeSetDetail> {
        let session = self.begin().await;
        let detail = session.changeset_detail(id)?;
        session.commit()?;
        Ok(detail)
    }

    pub async fn undelete_changeset(&self, id: i64) -> Result<usize> {
        let mut session = self.begin().await;
        let restored = session.undelete_changeset(id).await?;
        session.commit()?;
        Ok(restored)
    }

    pub async fn count_changesets(&self) -> Result<usize> {
        self.inner
            .transactions
            .storage()
            .row_count(&self.inner.config.changeset_table)
            .await
    }

    pub async fn count_records(&self) -> Result<usize> {
        self.inner
            .transactions
            .storage()
            .row_count(&self.inner.config.record_table)
            .await
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Writes every table and the model registry to `path`.
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let models = (*self.models().await).clone();
        let tables = self.inner.transactions.storage().snapshot().await;
        SnapshotManager::new(path).save(&DatabaseSnapshot::new(tables, models))
    }

    /// Opens a database from a snapshot written by [`SoftDeleteDb::save_snapshot`].
    pub async fn open_snapshot(path: impl AsRef<Path>, config: SoftDeleteConfig) -> Result<Self> {
        let manager = SnapshotManager::new(path.as_ref());
        let snapshot = manager.load()?.ok_or_else(|| {
            DbError::NotFound(format!("Snapshot {}", path.as_ref().display()))
        })?;
        let storage = InMemoryStorage::new();
        storage.restore(snapshot.tables).await?;
        info!(
            path = %path.as_ref().display(),
            tables = snapshot.metadata.table_count,
            rows = snapshot.metadata.row_count,
            "snapshot loaded"
        );
        Self::with_storage(storage, snapshot.models, config).await
    }
}

impl std::fmt::Debug for SoftDeleteDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftDeleteDb")
            .field("config", &self.inner.config)
            .finish()
    }
}
