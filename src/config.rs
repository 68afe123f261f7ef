use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Soft delete configuration, fixed when the database is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftDeleteConfig {
    /// Create the shared undelete group on `AuthManager::create_group`
    pub use_softdelete_group: bool,

    /// Name of the shared undelete group
    pub group_name: String,

    /// Fail a confirming delete of an entity that has no bookkeeping
    /// instead of deleting it anyway
    pub strict_bookkeeping: bool,

    /// Table holding ChangeSets
    pub changeset_table: String,

    /// Table holding SoftDeleteRecords
    pub record_table: String,
}

impl SoftDeleteConfig {
    pub fn new() -> Self {
        Self {
            use_softdelete_group: false,
            group_name: "Softdelete User".to_string(),
            strict_bookkeeping: false,
            changeset_table: "softdelete_changeset".to_string(),
            record_table: "softdelete_record".to_string(),
        }
    }

    /// Enable or disable the shared undelete group
    pub fn use_softdelete_group(mut self, enabled: bool) -> Self {
        self.use_softdelete_group = enabled;
        self
    }

    /// Set the shared group name
    pub fn group_name(mut self, name: &str) -> Self {
        self.group_name = name.to_string();
        self
    }

    /// Turn the missing-bookkeeping fallback into an error
    pub fn strict_bookkeeping(mut self, strict: bool) -> Self {
        self.strict_bookkeeping = strict;
        self
    }

    /// Set both bookkeeping table names
    pub fn tables(mut self, changeset_table: &str, record_table: &str) -> Self {
        self.changeset_table = changeset_table.to_string();
        self.record_table = record_table.to_string();
        self
    }

    /// Parse from JSON; absent keys keep their defaults.
    ///
    /// ```ignore
    /// let config = SoftDeleteConfig::from_json(r#"{"strict_bookkeeping": true}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.changeset_table.is_empty() || self.record_table.is_empty() {
            return Err(DbError::Config("Bookkeeping table names cannot be empty".into()));
        }
        if self.changeset_table == self.record_table {
            return Err(DbError::Config(
                "ChangeSet and record tables must be distinct".into(),
            ));
        }
        if self.use_softdelete_group && self.group_name.is_empty() {
            return Err(DbError::Config("Group name cannot be empty".into()));
        }
        Ok(())
    }
}

impl Default for SoftDeleteConfig {
    fn default() -> Self {
        Self::new()
    }
}
