// ============================================================================
// Softdelete Library
// ============================================================================

pub mod core;
pub mod storage;
pub mod transaction;
pub mod model;
pub mod entity;
pub mod hooks;
pub mod changeset;
pub mod session;
pub mod query;
pub mod facade;
pub mod config;
pub mod auth;
pub mod admin;
pub mod prelude;
mod cascade;

// Re-export main types for convenience
pub use core::{DataType, DbError, EntityRef, Result, Value};
pub use facade::SoftDeleteDb;
pub use config::SoftDeleteConfig;
pub use entity::{DeleteOptions, DeleteOutcome, Entity, PendingTransition};
pub use model::{DeletionPolicy, ModelDef, ModelRegistry};
pub use changeset::{ChangeSet, ChangeSetDetail, SoftDeleteRecord};
pub use hooks::{DeletionHook, FnHook, HookPoint, HookRegistry};
pub use query::{Predicate, QuerySet, Selection, ViewMode};
pub use session::Session;

// Re-export the authorization surface
pub use auth::{AuthManager, Grantee, Group, Permission, User};
pub use admin::{ChangeSetAdmin, ChangeSetSummary};
