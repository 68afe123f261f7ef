// ============================================================================
// Transaction State Management
// ============================================================================
//
// Implements the State Pattern for transaction lifecycle management.
// Each transaction moves through defined states: Active -> Committed/Aborted
//
// A transaction holds the table set lock exclusively from begin until commit
// or rollback, so transactions are serialized:
// - Reads see every write the transaction made so far
// - Every write is recorded in an undo log (Command Pattern)
// - Rollback (explicit, or on drop while still active) replays the log backwards
//
// ============================================================================

use super::Change;
use super::manager::TransactionStats;
use crate::core::{DbError, Result, Row, Value};
use crate::storage::catalog::Catalog;
use crate::storage::memory::{RowRef, TableSet};
use crate::storage::table::{Table, TableSchema};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state following the State Pattern
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can execute operations
    Active,

    /// Transaction has been successfully committed
    Committed,

    /// Transaction has been aborted/rolled back
    Aborted,
}

impl TransactionState {
    /// Check if transaction can execute operations
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    /// Check if transaction is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// An exclusive transaction over the whole table set.
///
/// Dropping an active transaction rolls it back.
pub struct Transaction {
    /// Unique transaction identifier
    id: TransactionId,

    /// Current state (Active, Committed, Aborted)
    state: TransactionState,

    /// Exclusive access to the tables for the transaction's lifetime
    tables: OwnedMutexGuard<TableSet>,

    /// Undo log, in the order the writes happened
    changes: Vec<Change>,

    stats: Arc<TransactionStats>,

    /// Start time for diagnostics
    start_time: std::time::Instant,
}

impl Transaction {
    pub(crate) fn new(tables: OwnedMutexGuard<TableSet>, stats: Arc<TransactionStats>) -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            tables,
            changes: Vec::new(),
            stats,
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the transaction ID
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Get the current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Get all changes recorded in this transaction
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Get the number of changes
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Get transaction duration
    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn catalog(&self) -> &Catalog {
        self.tables.catalog()
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables.table(name)
    }

    pub fn schema(&self, table: &str) -> Result<&TableSchema> {
        Ok(self.tables.table(table)?.schema())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, table: &str, id: i64) -> Result<Option<Row>> {
        Ok(self.tables.table(table)?.get(id).cloned())
    }

    /// Ids of the rows whose `columns` equal `values`, in primary key order.
    pub fn find(&self, table: &str, columns: &[&str], values: &[Value]) -> Result<Vec<i64>> {
        let mut ids = self.tables.table(table)?.find(columns, values)?;
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn scan(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.tables.table(table)?.rows().cloned().collect())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn insert(&mut self, table: &str, row: Row) -> Result<i64> {
        self.ensure_active()?;
        self.tables.insert(table, row, &mut self.changes)
    }

    pub fn update(&mut self, table: &str, id: i64, row: Row) -> Result<()> {
        self.ensure_active()?;
        self.tables.update(table, id, row, &mut self.changes)
    }

    /// Physically deletes a row, applying foreign key actions.
    /// Returns every row that was removed, the target included; empty when
    /// the row did not exist.
    pub fn delete(&mut self, table: &str, id: i64) -> Result<Vec<RowRef>> {
        self.ensure_active()?;
        let mut removed = Vec::new();
        self.tables
            .delete(table, id, &mut self.changes, &mut removed)?;
        Ok(removed)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Makes every write permanent and releases the lock.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        debug!(txn = %self.id, changes = self.changes.len(), "commit");
        self.changes.clear();
        self.state = TransactionState::Committed;
        self.stats.record_commit();
        Ok(())
    }

    /// Reverses every write and releases the lock.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        self.undo_all();
        Ok(())
    }

    fn undo_all(&mut self) {
        debug!(txn = %self.id, changes = self.changes.len(), "rollback");
        while let Some(change) = self.changes.pop() {
            change.undo(&mut self.tables);
        }
        self.state = TransactionState::Aborted;
        self.stats.record_abort();
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::Storage(format!(
                "Transaction {} is {}",
                self.id, self.state
            )));
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state.is_active() {
            self.undo_all();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("changes", &self.changes.len())
            .finish()
    }
}
