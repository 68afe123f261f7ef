// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Implements the Command Pattern for reversible row operations.
// Each Change records enough of the previous state to be reversed when the
// owning transaction rolls back; on commit the log is simply discarded.
//
// ============================================================================

use crate::core::{Row, Value};
use crate::storage::TableSet;
use tracing::warn;

/// Represents a single reversible change in a transaction
#[derive(Debug, Clone)]
pub enum Change {
    /// A row was inserted with the given primary key
    InsertRow { table: String, id: i64 },

    /// A row was replaced; `old_row` is the version before the write
    UpdateRow { table: String, old_row: Row },

    /// A row was physically removed
    DeleteRow { table: String, old_row: Row },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    /// Primary key of the affected row
    pub fn row_id(&self) -> Option<i64> {
        match self {
            Change::InsertRow { id, .. } => Some(*id),
            Change::UpdateRow { old_row, .. } | Change::DeleteRow { old_row, .. } => {
                old_row.first().and_then(Value::as_i64)
            }
        }
    }

    /// Reverses this change against the table set.
    pub(crate) fn undo(self, tables: &mut TableSet) {
        let id = self.row_id();
        match self {
            Change::InsertRow { table, id } => match tables.table_mut(&table) {
                Ok(t) => {
                    t.remove(id);
                }
                Err(err) => warn!(table = %table, id, error = %err, "rollback could not remove inserted row"),
            },
            Change::UpdateRow { table, old_row } | Change::DeleteRow { table, old_row } => {
                match tables.table_mut(&table) {
                    Ok(t) => t.restore(old_row),
                    Err(err) => warn!(table = %table, id, error = %err, "rollback could not restore row"),
                }
            }
        }
    }
}
