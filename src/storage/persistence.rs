//! Snapshot persistence: every table plus the model registry in one MessagePack file.

use crate::core::{DbError, Result};
use crate::model::ModelRegistry;
use crate::storage::table::Table;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// Database Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: u32,
    pub tables: HashMap<String, Table>,
    pub models: ModelRegistry,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub row_count: usize,
    pub table_count: usize,
}

impl DatabaseSnapshot {
    pub fn new(tables: HashMap<String, Table>, models: ModelRegistry) -> Self {
        let row_count = tables.values().map(|t| t.row_count()).sum();
        let table_count = tables.len();

        Self {
            version: SNAPSHOT_VERSION,
            tables,
            models,
            metadata: SnapshotMetadata {
                created_at: Utc::now(),
                row_count,
                table_count,
            },
        }
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }

    /// Writes to a temporary file in the target directory, then renames it
    /// over the snapshot, so readers never see a partial file.
    pub fn save(&self, snapshot: &DatabaseSnapshot) -> Result<()> {
        let dir = match self.snapshot_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .map_err(|e| DbError::Storage(format!("Failed to create snapshot directory: {}", e)))?;

        let serialized = rmp_serde::to_vec_named(snapshot)
            .map_err(|e| DbError::Storage(format!("Failed to serialize snapshot: {}", e)))?;

        let temp = NamedTempFile::new_in(&dir)
            .map_err(|e| DbError::Storage(format!("Failed to create temp file: {}", e)))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            writer
                .write_all(&serialized)
                .map_err(|e| DbError::Storage(format!("Failed to write snapshot: {}", e)))?;
            writer
                .flush()
                .map_err(|e| DbError::Storage(format!("Failed to flush snapshot: {}", e)))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| DbError::Storage(format!("Failed to sync snapshot: {}", e)))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| DbError::Storage(format!("Failed to move snapshot into place: {}", e)))?;

        info!(
            path = %self.snapshot_path.display(),
            tables = snapshot.metadata.table_count,
            rows = snapshot.metadata.row_count,
            "snapshot saved"
        );
        Ok(())
    }

    /// Reads the snapshot; None when the file does not exist yet.
    pub fn load(&self) -> Result<Option<DatabaseSnapshot>> {
        if !self.exists() {
            return Ok(None);
        }
        let file = File::open(&self.snapshot_path)
            .map_err(|e| DbError::Storage(format!("Failed to open snapshot: {}", e)))?;
        let snapshot: DatabaseSnapshot = rmp_serde::from_read(BufReader::new(file))
            .map_err(|e| DbError::Storage(format!("Failed to deserialize snapshot: {}", e)))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DbError::Storage(format!(
                "Unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }
}
