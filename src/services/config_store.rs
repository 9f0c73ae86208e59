use crate::models::*;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = "claude-usage-monitor";
const CONFIG_FILE_NAME: &str = "usage-monitor.json";

/// JSON-file backed store for the plan selection and base limit.
///
/// There is no in-memory cache: every query reads the file, every write
/// replaces it wholesale.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at `<config_dir>/claude-usage-monitor/usage-monitor.json`
    pub fn at_default_location() -> Self {
        Self::new(Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the sanitized config. Never fails.
    ///
    /// A missing file is created with defaults. An unreadable or corrupt file
    /// yields defaults without being overwritten.
    pub fn load(&self) -> UsageMonitorConfig {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = UsageMonitorConfig::default();
                if let Err(e) = self.save(&config) {
                    log::warn!("Failed to write default usage config: {e:#}");
                }
                return config;
            }
            Err(e) => {
                log::warn!("Failed to read usage config {:?}: {}", self.path, e);
                return UsageMonitorConfig::default();
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(raw) => sanitize(&raw),
            Err(e) => {
                log::warn!("Usage config {:?} is not valid JSON: {}", self.path, e);
                UsageMonitorConfig::default()
            }
        }
    }

    pub fn save(&self, config: &UsageMonitorConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config dir {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(config).context("serializing usage config")?;
        fs::write(&self.path, content)
            .with_context(|| format!("writing usage config {}", self.path.display()))?;
        Ok(())
    }

    pub fn set_plan(&self, plan: &str) -> Result<UsageMonitorConfig> {
        let mut config = self.load();
        config.plan = PlanType::parse_lenient(plan);
        self.save(&config)?;
        log::info!("Plan set to {}", config.plan);
        Ok(config)
    }

    pub fn set_pro_limit(&self, limit: f64) -> Result<UsageMonitorConfig> {
        let mut config = self.load();
        config.limits.pro = coerce_pro_limit(limit);
        self.save(&config)?;
        log::info!("Pro limit set to {}", config.limits.pro);
        Ok(config)
    }

    pub fn derived_limits(&self) -> DerivedLimits {
        self.load().derived_limits()
    }
}

/// Build a complete config from untrusted JSON.
///
/// An unknown or missing plan becomes `pro`; a `limits.pro` that is not a
/// positive number becomes [`DEFAULT_PRO_LIMIT`].
pub fn sanitize(raw: &Value) -> UsageMonitorConfig {
    let plan = raw
        .get("plan")
        .and_then(Value::as_str)
        .map(PlanType::parse_lenient)
        .unwrap_or_default();

    let pro = raw
        .get("limits")
        .and_then(|limits| limits.get("pro"))
        .and_then(Value::as_f64)
        .map(coerce_pro_limit)
        .unwrap_or(DEFAULT_PRO_LIMIT);

    UsageMonitorConfig {
        plan,
        limits: PlanLimits { pro },
    }
}

/// Floor a positive finite limit; anything else falls back to the default.
pub fn coerce_pro_limit(limit: f64) -> u64 {
    if !limit.is_finite() || limit <= 0.0 {
        return DEFAULT_PRO_LIMIT;
    }
    let floored = limit.floor();
    if floored < 1.0 {
        DEFAULT_PRO_LIMIT
    } else {
        floored as u64
    }
}
