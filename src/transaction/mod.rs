// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Implements atomic transactions by serializing them over the table set and
// keeping an undo log of every row write.
//
// Design Patterns Used:
// - State Pattern: Transaction state management (Active, Committed, Aborted)
// - Command Pattern: Reversible operations for rollback
// - RAII: dropping an active transaction rolls it back
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::Change;
pub use manager::{TransactionManager, TransactionStats};
pub use state::{Transaction, TransactionId, TransactionState};
