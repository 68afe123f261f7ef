//! Everything an application needs to declare models and delete through them.
//!
//! ```ignore
//! use softdelete::prelude::*;
//! ```

pub use crate::core::{Column, DataType, DbError, EntityRef, Result, Value};
pub use crate::storage::{DELETED_AT, ForeignKey, ForeignKeyAction, PRIMARY_KEY, TableSchema};
pub use crate::{
    DeleteOptions, DeleteOutcome, DeletionHook, DeletionPolicy, Entity, FnHook, HookPoint,
    ModelDef, Predicate, SoftDeleteConfig, SoftDeleteDb, ViewMode,
};
