use super::policy::DeletionPolicy;
use crate::core::{DbError, EntityRef, Result};
use crate::entity::Entity;
use crate::storage::catalog::{Catalog, RelationDescriptor};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// How one table takes part in deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDef {
    /// Polymorphic type tag stored in bookkeeping rows.
    pub type_tag: String,
    pub table: String,
    /// Whether the table carries `deleted_at` and is hidden by the default view.
    pub soft_delete: bool,
    /// Class default, applied to the entity and to every relation it has.
    pub policy: DeletionPolicy,
    /// Relation name -> policy, overriding `policy` for that relation only.
    #[serde(default)]
    pub relation_policies: BTreeMap<String, DeletionPolicy>,
}

impl ModelDef {
    /// A soft-deletable model with the `SoftCascade` default.
    pub fn soft(type_tag: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            table: table.into(),
            soft_delete: true,
            policy: DeletionPolicy::default(),
            relation_policies: BTreeMap::new(),
        }
    }

    /// A model without soft-delete capability; always physically deleted.
    pub fn plain(type_tag: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            table: table.into(),
            soft_delete: false,
            policy: DeletionPolicy::HardPassthrough,
            relation_policies: BTreeMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: DeletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_relation_policy(mut self, relation: impl Into<String>, policy: DeletionPolicy) -> Self {
        self.relation_policies.insert(relation.into(), policy);
        self
    }

    /// Policy for one relation: the forced policy, else the override, else the class default.
    pub fn relation_policy(&self, relation: &str, forced: Option<DeletionPolicy>) -> DeletionPolicy {
        forced
            .or_else(|| self.relation_policies.get(relation).copied())
            .unwrap_or(self.policy)
    }
}

/// A relation seen from the parent, paired with the model of its members.
#[derive(Debug, Clone)]
pub struct Relation<'a> {
    pub descriptor: RelationDescriptor,
    pub child: Cow<'a, ModelDef>,
}

/// Type tag -> model, and table -> type tag.
///
/// Tables without a registered model are treated as plain models tagged with
/// their table name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDef>,
    by_table: BTreeMap<String, String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a model against the catalog and adds it.
    pub fn register(&mut self, model: ModelDef, catalog: &Catalog) -> Result<()> {
        let schema = catalog.get_table(&model.table)?;
        if self.models.contains_key(&model.type_tag) {
            return Err(DbError::Config(format!(
                "Model '{}' is already registered",
                model.type_tag
            )));
        }
        if let Some(existing) = self.by_table.get(&model.table) {
            return Err(DbError::Config(format!(
                "Table '{}' is already mapped to model '{}'",
                model.table, existing
            )));
        }
        if model.soft_delete && !schema.is_soft_deletable() {
            return Err(DbError::Config(format!(
                "Model '{}' is soft-deletable but table '{}' has no nullable TIMESTAMP deleted_at column",
                model.type_tag, model.table
            )));
        }
        for relation in model.relation_policies.keys() {
            let known = catalog
                .reverse_relations(&model.table)
                .iter()
                .any(|r| &r.name == relation);
            if !known {
                return Err(DbError::Config(format!(
                    "Model '{}' overrides unknown relation '{}'",
                    model.type_tag, relation
                )));
            }
        }

        self.by_table.insert(model.table.clone(), model.type_tag.clone());
        self.models.insert(model.type_tag.clone(), model);
        Ok(())
    }

    pub fn get(&self, type_tag: &str) -> Result<&ModelDef> {
        self.models
            .get(type_tag)
            .ok_or_else(|| DbError::ModelNotRegistered(type_tag.to_string()))
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.models.contains_key(type_tag)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    /// The model stored in `table`, or a plain stand-in for unregistered tables.
    pub fn for_table(&self, table: &str) -> Cow<'_, ModelDef> {
        match self.by_table.get(table).and_then(|tag| self.models.get(tag)) {
            Some(model) => Cow::Borrowed(model),
            None => Cow::Owned(ModelDef::plain(table, table)),
        }
    }

    /// Resolves a type tag that may also name an unregistered table.
    pub fn resolve(&self, type_tag: &str, catalog: &Catalog) -> Result<Cow<'_, ModelDef>> {
        if let Some(model) = self.models.get(type_tag) {
            return Ok(Cow::Borrowed(model));
        }
        if catalog.table_exists(type_tag) && !self.by_table.contains_key(type_tag) {
            return Ok(Cow::Owned(ModelDef::plain(type_tag, type_tag)));
        }
        Err(DbError::ModelNotRegistered(type_tag.to_string()))
    }

    /// Every one-to-one and one-to-many relation pointing at `model`.
    pub fn relations(&self, model: &ModelDef, catalog: &Catalog) -> Vec<Relation<'_>> {
        catalog
            .reverse_relations(&model.table)
            .into_iter()
            .map(|descriptor| Relation {
                child: self.for_table(&descriptor.child_table),
                descriptor,
            })
            .collect()
    }

    /// Loads the entity behind a polymorphic reference, deleted or not.
    pub fn load(&self, tx: &Transaction, entity: &EntityRef) -> Result<Option<Entity>> {
        let model = self.resolve(&entity.entity_type, tx.catalog())?;
        let schema = tx.schema(&model.table)?;
        tx.get(&model.table, entity.entity_id)?
            .map(|row| Entity::from_row(&model.type_tag, schema, &row))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};
    use crate::storage::table::{ForeignKey, TableSchema};

    fn catalog() -> Catalog {
        Catalog::new()
            .with_table(TableSchema::new("author", vec![]).soft_deletable())
            .unwrap()
            .with_table(
                TableSchema::new("book", vec![Column::new("author_id", DataType::Integer)])
                    .with_foreign_key(ForeignKey::new("author_id", "author").related_name("books")),
            )
            .unwrap()
    }

    #[test]
    fn test_register_validates_deleted_at() {
        let catalog = catalog();
        let mut registry = ModelRegistry::new();
        let err = registry
            .register(ModelDef::soft("Book", "book"), &catalog)
            .unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
        registry.register(ModelDef::soft("Author", "author"), &catalog).unwrap();
        assert!(registry.contains("Author"));
    }

    #[test]
    fn test_register_rejects_unknown_relation_override() {
        let catalog = catalog();
        let mut registry = ModelRegistry::new();
        let model = ModelDef::soft("Author", "author")
            .with_relation_policy("missing", DeletionPolicy::SetNull);
        assert!(registry.register(model, &catalog).is_err());
    }

    #[test]
    fn test_unregistered_tables_are_plain() {
        let catalog = catalog();
        let mut registry = ModelRegistry::new();
        registry.register(ModelDef::soft("Author", "author"), &catalog).unwrap();

        let author = registry.get("Author").unwrap().clone();
        let relations = registry.relations(&author, &catalog);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].descriptor.name, "books");
        assert!(!relations[0].child.soft_delete);
        assert_eq!(relations[0].child.type_tag, "book");
    }

    #[test]
    fn test_relation_policy_precedence() {
        let model = ModelDef::soft("Author", "author")
            .with_relation_policy("books", DeletionPolicy::HardPassthrough);
        assert_eq!(model.relation_policy("books", None), DeletionPolicy::HardPassthrough);
        assert_eq!(model.relation_policy("other", None), DeletionPolicy::SoftCascade);
        assert_eq!(
            model.relation_policy("books", Some(DeletionPolicy::SetNull)),
            DeletionPolicy::SetNull
        );
    }
}
