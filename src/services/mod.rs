pub mod broadcaster;
pub mod config_store;
pub mod file_monitor;
pub mod freshness;
pub mod snapshot;
pub mod usage_service;

use anyhow::Result;
use std::future::Future;
use std::path::PathBuf;

/// Subdirectory of a base directory that holds session logs
pub const LOG_SUBDIR: &str = "projects";

/// Extension of session log files
pub const LOG_EXTENSION: &str = "jsonl";

/// Capability for discovering and loading accounting blocks.
///
/// Both operations are best-effort: callers treat the base directories as
/// candidates and any loader error as "data unavailable".
pub trait UsageLoader: Send + Sync + 'static {
    /// Candidate base directories; they need not exist
    fn base_dirs(&self) -> Vec<PathBuf>;

    /// Load the accounting blocks found under the given base directories
    fn load_blocks(
        &self,
        base_dirs: &[PathBuf],
    ) -> impl Future<Output = Result<serde_json::Value>> + Send;
}

/// Target of the freshness controller's refresh triggers
pub trait Refresh: Send + Sync + 'static {
    fn refresh(&self) -> impl Future<Output = ()> + Send;
}
