//! The visibility filter and batch operations over query results.

use crate::core::{DbError, Result, Row, Value};
use crate::entity::{DeleteOutcome, Entity};
use crate::facade::SoftDeleteDb;
use crate::model::DeletionPolicy;
use crate::session::Session;
use crate::storage::table::{DELETED_AT, PRIMARY_KEY};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Which rows of a soft-deletable model a query sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewMode {
    /// `deleted_at` is NULL
    #[default]
    Active,
    /// Everything, deleted or not
    All,
    /// `deleted_at` is set
    DeletedOnly,
}

/// A condition on one column. Comparisons with NULL are false, as in SQL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    IsNull(String),
    NotNull(String),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ne(column.into(), value.into())
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt(column.into(), value.into())
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt(column.into(), value.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Predicate::NotNull(column.into())
    }

    pub fn column(&self) -> &str {
        match self {
            Predicate::Eq(c, _)
            | Predicate::Ne(c, _)
            | Predicate::Lt(c, _)
            | Predicate::Gt(c, _)
            | Predicate::IsNull(c)
            | Predicate::NotNull(c)
            | Predicate::In(c, _)
            | Predicate::NotIn(c, _) => c,
        }
    }

    fn matches(&self, value: &Value) -> bool {
        let compare = |other: &Value| -> Option<Ordering> {
            if value.is_null() || other.is_null() {
                None
            } else {
                Some(value.cmp(other))
            }
        };
        match self {
            Predicate::Eq(_, v) => compare(v) == Some(Ordering::Equal),
            Predicate::Ne(_, v) => matches!(compare(v), Some(Ordering::Less | Ordering::Greater)),
            Predicate::Lt(_, v) => compare(v) == Some(Ordering::Less),
            Predicate::Gt(_, v) => compare(v) == Some(Ordering::Greater),
            Predicate::IsNull(_) => value.is_null(),
            Predicate::NotNull(_) => !value.is_null(),
            Predicate::In(_, values) => !value.is_null() && values.contains(value),
            Predicate::NotIn(_, values) => !value.is_null() && !values.contains(value),
        }
    }
}

/// Model, view and user predicates: everything a query needs except the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub model: String,
    pub view: ViewMode,
    pub predicates: Vec<Predicate>,
}

impl Selection {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            view: ViewMode::Active,
            predicates: Vec::new(),
        }
    }

    /// The view predicate for soft-deletable models; plain models ignore views.
    fn view_predicate(&self, soft_delete: bool) -> Option<Predicate> {
        if !soft_delete {
            return None;
        }
        match self.view {
            ViewMode::Active => Some(Predicate::is_null(DELETED_AT)),
            ViewMode::All => None,
            ViewMode::DeletedOnly => Some(Predicate::not_null(DELETED_AT)),
        }
    }
}

fn row_matches(predicates: &[(usize, &Predicate)], row: &Row) -> bool {
    predicates.iter().all(|(position, p)| p.matches(&row[*position]))
}

impl Session {
    /// Rows of the selection, in primary key order. The view predicate is
    /// applied first and ANDed with the user predicates.
    pub fn select(&self, selection: &Selection) -> Result<Vec<Entity>> {
        let model = self.models.resolve(&selection.model, self.tx.catalog())?;
        let schema = self.tx.schema(&model.table)?;

        let view = selection.view_predicate(model.soft_delete);
        let predicates = view
            .iter()
            .chain(selection.predicates.iter())
            .map(|p| Ok((schema.column_index(p.column())?, p)))
            .collect::<Result<Vec<_>>>()?;

        let candidates = match selection.predicates.first() {
            Some(Predicate::Eq(column, value)) if schema.is_indexed(&[column.as_str()]) => {
                let table = self.tx.table(&model.table)?;
                self.tx
                    .find(&model.table, &[column.as_str()], std::slice::from_ref(value))?
                    .into_iter()
                    .filter_map(|id| table.get(id).cloned())
                    .collect()
            }
            _ => self.tx.scan(&model.table)?,
        };

        candidates
            .iter()
            .filter(|row| row_matches(&predicates, row))
            .map(|row| Entity::from_row(&model.type_tag, schema, row))
            .collect()
    }

    /// Batch soft delete of the selection, sharing `changeset` when given.
    pub async fn delete_selection(
        &mut self,
        selection: &Selection,
        changeset: Option<i64>,
        forced: Option<DeletionPolicy>,
    ) -> Result<Vec<DeleteOutcome>> {
        let members = self.select(selection)?;
        if members.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %selection.model, members = members.len(), "batch delete");
        self.delete_batch(members, changeset, forced).await
    }

    pub async fn undelete_selection(&mut self, selection: &Selection) -> Result<usize> {
        let members = self.select(selection)?;
        debug!(model = %selection.model, members = members.len(), "batch undelete");
        self.undelete_batch(members).await
    }

    /// Writes one field on every member. Never deletes or undeletes.
    pub fn update_selection(&mut self, selection: &Selection, column: &str, value: Value) -> Result<usize> {
        if column == PRIMARY_KEY {
            return Err(DbError::ConstraintViolation("Primary key cannot be updated".into()));
        }
        if column == DELETED_AT {
            return Err(DbError::ConstraintViolation(format!(
                "{} cannot be updated; delete or undelete instead",
                DELETED_AT
            )));
        }
        let members = self.select(selection)?;
        let count = members.len();
        for mut member in members {
            member.set(column, value.clone());
            self.write(&member)?;
        }
        Ok(count)
    }
}

/// A query over one model that stays soft-delete aware through every step.
///
/// Each terminal operation runs in its own transaction.
#[derive(Clone)]
pub struct QuerySet {
    db: SoftDeleteDb,
    selection: Selection,
}

impl QuerySet {
    pub(crate) fn new(db: SoftDeleteDb, selection: Selection) -> Self {
        Self { db, selection }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.selection.predicates.push(predicate);
        self
    }

    pub fn exclude_ids(self, ids: &[i64]) -> Self {
        let ids = ids.iter().copied().map(Value::Integer).collect();
        self.filter(Predicate::NotIn(PRIMARY_KEY.to_string(), ids))
    }

    pub fn view(mut self, view: ViewMode) -> Self {
        self.selection.view = view;
        self
    }

    /// Include soft-deleted rows.
    pub fn all_with_deleted(self) -> Self {
        self.view(ViewMode::All)
    }

    /// Only soft-deleted rows.
    pub fn deleted_only(self) -> Self {
        self.view(ViewMode::DeletedOnly)
    }

    pub async fn all(&self) -> Result<Vec<Entity>> {
        let session = self.db.begin().await;
        let members = session.select(&self.selection)?;
        session.commit()?;
        Ok(members)
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.count().await? > 0)
    }

    pub async fn first(&self) -> Result<Option<Entity>> {
        Ok(self.all().await?.into_iter().next())
    }

    /// The single member with this primary key, within the current view.
    pub async fn get(&self, id: i64) -> Result<Entity> {
        self.clone()
            .filter(Predicate::eq(PRIMARY_KEY, id))
            .first()
            .await?
            .ok_or_else(|| DbError::NotFound(format!("{}#{}", self.selection.model, id)))
    }

    /// Deletes every member; soft deletes go into `changeset` when given,
    /// else each member's own ChangeSet.
    pub async fn delete(&self, changeset: Option<i64>) -> Result<Vec<DeleteOutcome>> {
        let mut session = self.db.begin().await;
        let outcomes = session.delete_selection(&self.selection, changeset, None).await?;
        session.commit()?;
        Ok(outcomes)
    }

    /// Undeletes the ChangeSet of every member. Returns how many entities
    /// were restored, counting those restored alongside the members.
    pub async fn undelete(&self) -> Result<usize> {
        let mut session = self.db.begin().await;
        let restored = session.undelete_selection(&self.selection).await?;
        session.commit()?;
        Ok(restored)
    }

    pub async fn update(&self, column: &str, value: impl Into<Value>) -> Result<usize> {
        let mut session = self.db.begin().await;
        let count = session.update_selection(&self.selection, column, value.into())?;
        session.commit()?;
        Ok(count)
    }
}

impl std::fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySet")
            .field("selection", &self.selection)
            .finish()
    }
}
