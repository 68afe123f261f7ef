pub mod catalog;
pub mod memory;
pub mod persistence;
pub mod table;

pub use catalog::{Catalog, RelationDescriptor, RelationKind};
pub use memory::{InMemoryStorage, RowRef, TableSet};
pub use persistence::{DatabaseSnapshot, SnapshotManager};
pub use table::{DELETED_AT, ForeignKey, ForeignKeyAction, PRIMARY_KEY, Table, TableSchema};
