use super::config_store::ConfigStore;
use super::{UsageLoader, LOG_SUBDIR};
use crate::models::block::{blocks_from_loader_output, select_active_block};
use crate::models::*;
use std::path::PathBuf;
use std::sync::Arc;

/// Reduces the on-disk log state to a single [`UsageSnapshot`]
pub struct SnapshotComputer<L: UsageLoader> {
    loader: Arc<L>,
    config: ConfigStore,
}

impl<L: UsageLoader> SnapshotComputer<L> {
    pub fn new(loader: Arc<L>, config: ConfigStore) -> Self {
        Self { loader, config }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Base directories that currently exist on disk
    pub fn existing_base_dirs(&self) -> Vec<PathBuf> {
        self.loader
            .base_dirs()
            .into_iter()
            .filter(|dir| dir.is_dir())
            .collect()
    }

    /// Existing base directories that contain a log subdirectory
    pub fn log_base_dirs(&self) -> Vec<PathBuf> {
        self.existing_base_dirs()
            .into_iter()
            .filter(|dir| dir.join(LOG_SUBDIR).is_dir())
            .collect()
    }

    /// Log subdirectories to watch for changes
    pub fn log_dirs(&self) -> Vec<PathBuf> {
        self.log_base_dirs()
            .into_iter()
            .map(|dir| dir.join(LOG_SUBDIR))
            .collect()
    }

    /// Compute a fresh snapshot. Failures degrade to `missing`/`unavailable`.
    pub async fn compute(&self) -> UsageSnapshot {
        let config = self.config.load();
        let plan = config.plan;
        let limit = config.limit();

        let existing = self.existing_base_dirs();
        if existing.is_empty() {
            log::debug!("No Claude base directory exists");
            return UsageSnapshot::missing(plan, limit);
        }

        let with_logs: Vec<PathBuf> = existing
            .into_iter()
            .filter(|dir| dir.join(LOG_SUBDIR).is_dir())
            .collect();
        if with_logs.is_empty() {
            log::debug!("No '{}' directory under any Claude base directory", LOG_SUBDIR);
            return UsageSnapshot::unavailable(plan, limit);
        }

        let output = match self.loader.load_blocks(&with_logs).await {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Failed to load usage blocks: {e:#}");
                return UsageSnapshot::unavailable(plan, limit);
            }
        };

        let Some(blocks) = blocks_from_loader_output(output) else {
            log::warn!("Usage loader returned something other than a block list");
            return UsageSnapshot::unavailable(plan, limit);
        };

        let Some(active) = select_active_block(&blocks) else {
            return UsageSnapshot::idle(plan, limit);
        };

        UsageSnapshot {
            status: UsageStatus::Ok,
            total_tokens: active.total_tokens(),
            window_ms: WINDOW_MS,
            oldest_timestamp_ms: active.start_ms(),
            reset_at_ms: active.reset_at_ms(),
            plan,
            limit,
        }
    }
}
