use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine configuration, persisted as `config/db_config.json` under the
/// database root. Written with defaults when a database is first created,
/// read back on reopen. Unknown fields are ignored.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DbConfig {
    /// Page size in bytes. Fixed at creation time.
    pub page_size: usize,
    /// Resident pages per table.
    pub pool_size: usize,
    /// Live B-trees kept in memory across all tables.
    pub btree_cache: usize,
    /// Filesystem block size used to compute B-tree order.
    pub block_size: usize,
    /// Maximum FK action recursion before `CascadeCycle` is reported.
    pub cascade_depth_limit: usize,
    /// Maximum size of a rows.db file, in pages. Zero means unlimited.
    pub max_file_pages: u32,
    /// Whether data-changing statements are logged to db.wal.
    pub wal_enabled: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            page_size: crate::page::PAGE_SIZE,
            pool_size: crate::pool::POOL_SIZE,
            btree_cache: crate::btree::BTREE_LIFETIME_THRESHOLD,
            block_size: 4096,
            cascade_depth_limit: 32,
            max_file_pages: 0,
            wal_enabled: true,
        }
    }
}

/// Log level filter, persisted as `config/logging_config.json`.
/// The engine itself only emits through the `log` facade; this file lets a
/// host process configure the level without environment variables.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl DbConfig {
    /// Load from `config/db_config.json`, or write defaults if absent.
    pub fn load_or_create(config_dir: &Path) -> Result<DbConfig> {
        let path = config_dir.join("db_config.json");
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let cfg = serde_json::from_str(&text)
                .map_err(|e| crate::error::DbError::Corruption(format!("db_config.json: {e}")))?;
            Ok(cfg)
        } else {
            let cfg = DbConfig::default();
            std::fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap())?;
            Ok(cfg)
        }
    }
}

impl LoggingConfig {
    /// Load from `config/logging_config.json`, or write defaults if absent.
    pub fn load_or_create(config_dir: &Path) -> Result<LoggingConfig> {
        let path = config_dir.join("logging_config.json");
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&text).unwrap_or_default())
        } else {
            let cfg = LoggingConfig::default();
            std::fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap())?;
            Ok(cfg)
        }
    }
}
