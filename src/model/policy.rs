use serde::{Deserialize, Serialize};
use std::fmt;

/// What a parent does to related entities when it is deleted.
///
/// Used both as a model's class-wide default and as a per-relation override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// Soft-delete the entity itself; relations are left alone.
    Soft,
    /// Soft-delete the entity and recurse into every relation.
    #[default]
    SoftCascade,
    /// No soft delete: the relation is skipped, or as a class policy the
    /// entity is physically deleted without bookkeeping.
    #[serde(alias = "do_nothing")]
    HardPassthrough,
    /// Detach the related entities by clearing their foreign key.
    SetNull,
}

impl DeletionPolicy {
    /// Policies under which the entity itself is soft-deleted.
    pub fn soft_deletes(&self) -> bool {
        matches!(
            self,
            DeletionPolicy::Soft | DeletionPolicy::SoftCascade | DeletionPolicy::SetNull
        )
    }

    /// Policies under which relations are walked after the entity is deleted.
    pub fn walks_relations(&self) -> bool {
        matches!(self, DeletionPolicy::SoftCascade | DeletionPolicy::SetNull)
    }
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionPolicy::Soft => write!(f, "SOFT"),
            DeletionPolicy::SoftCascade => write!(f, "SOFT_CASCADE"),
            DeletionPolicy::HardPassthrough => write!(f, "HARD_PASSTHROUGH"),
            DeletionPolicy::SetNull => write!(f, "SET_NULL"),
        }
    }
}
