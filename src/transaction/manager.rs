// ============================================================================
// Transaction Manager
// ============================================================================

use super::Transaction;
use crate::storage::memory::InMemoryStorage;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the manager and the transactions it hands out.
#[derive(Debug, Default)]
pub struct TransactionStats {
    committed: AtomicU64,
    aborted: AtomicU64,
}

impl TransactionStats {
    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hands out exclusive transactions over one storage.
#[derive(Clone)]
pub struct TransactionManager {
    storage: InMemoryStorage,
    stats: Arc<TransactionStats>,
}

impl TransactionManager {
    pub fn new(storage: InMemoryStorage) -> Self {
        Self {
            storage,
            stats: Arc::new(TransactionStats::default()),
        }
    }

    pub fn storage(&self) -> &InMemoryStorage {
        &self.storage
    }

    /// Waits for any running transaction to finish, then starts a new one.
    pub async fn begin(&self) -> Transaction {
        let tables = self.storage.lock_owned().await;
        Transaction::new(tables, self.stats.clone())
    }

    pub fn committed_count(&self) -> u64 {
        self.stats.committed.load(Ordering::Relaxed)
    }

    pub fn aborted_count(&self) -> u64 {
        self.stats.aborted.load(Ordering::Relaxed)
    }
}
