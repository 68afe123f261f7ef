//! Administrative surface over ChangeSets: listing, detail and undelete,
//! each gated on the undelete permission.

use crate::auth::{AuthManager, Permission, User};
use crate::changeset::ChangeSetDetail;
use crate::core::{EntityRef, Result};
use crate::facade::SoftDeleteDb;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// One row of the ChangeSet listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetSummary {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub root: EntityRef,
    pub records: usize,
}

#[derive(Debug, Clone)]
pub struct ChangeSetAdmin {
    db: SoftDeleteDb,
    auth: Arc<AuthManager>,
}

impl ChangeSetAdmin {
    pub fn new(db: SoftDeleteDb, auth: Arc<AuthManager>) -> Self {
        Self { db, auth }
    }

    /// Every ChangeSet, oldest first.
    pub async fn list(&self, user: &User) -> Result<Vec<ChangeSetSummary>> {
        self.auth.check(user, Permission::CanUndelete).await?;
        let session = self.db.begin().await;
        let summaries = session
            .changesets()?
            .into_iter()
            .map(|cs| {
                Ok(ChangeSetSummary {
                    records: session.records(cs.id)?.len(),
                    id: cs.id,
                    created_at: cs.created_at,
                    root: cs.root,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        session.commit()?;
        Ok(summaries)
    }

    /// The ChangeSet with its records and the root entity's current content.
    pub async fn view(&self, user: &User, id: i64) -> Result<ChangeSetDetail> {
        self.auth.check(user, Permission::CanUndelete).await?;
        self.db.changeset(id).await
    }

    /// Restores everything the ChangeSet holds.
    pub async fn undelete(&self, user: &User, id: i64) -> Result<usize> {
        self.auth.check(user, Permission::CanUndelete).await?;
        let restored = self.db.undelete_changeset(id).await?;
        info!(changeset_id = id, user = %user.username(), restored, "undeleted from admin");
        Ok(restored)
    }
}
