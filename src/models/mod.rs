pub mod block;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use block::AccountingBlock;

/// Length of one accounting window (5 hours) in milliseconds
pub const WINDOW_MS: i64 = 5 * 60 * 60 * 1000;

/// Base pro-tier token ceiling used when nothing valid is stored
pub const DEFAULT_PRO_LIMIT: u64 = 5_500_000;

/// Claude plan tiers. Each scales the pro limit by a fixed multiplier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    #[default]
    Pro,
    Max5,
    Max20,
}

impl PlanType {
    pub fn multiplier(self) -> u64 {
        match self {
            PlanType::Pro => 1,
            PlanType::Max5 => 5,
            PlanType::Max20 => 20,
        }
    }

    /// Lenient parse: anything other than exactly `max5` or `max20` is `Pro`.
    pub fn parse_lenient(value: &str) -> Self {
        match value {
            "max5" => PlanType::Max5,
            "max20" => PlanType::Max20,
            _ => PlanType::Pro,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanType::Pro => "pro",
            PlanType::Max5 => "max5",
            PlanType::Max20 => "max20",
        }
    }

    pub fn limit_for(self, pro_limit: u64) -> u64 {
        pro_limit.saturating_mul(self.multiplier())
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored limits; only the base tier is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub pro: u64,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            pro: DEFAULT_PRO_LIMIT,
        }
    }
}

/// Persisted user configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMonitorConfig {
    pub plan: PlanType,
    pub limits: PlanLimits,
}

impl UsageMonitorConfig {
    /// Absolute token ceiling for the selected plan
    pub fn limit(&self) -> u64 {
        self.plan.limit_for(self.limits.pro)
    }

    pub fn derived_limits(&self) -> DerivedLimits {
        DerivedLimits::from_pro(self.limits.pro)
    }
}

/// Per-tier ceilings computed from the stored pro limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedLimits {
    pub pro: u64,
    pub max5: u64,
    pub max20: u64,
}

impl DerivedLimits {
    pub fn from_pro(pro: u64) -> Self {
        Self {
            pro: PlanType::Pro.limit_for(pro),
            max5: PlanType::Max5.limit_for(pro),
            max20: PlanType::Max20.limit_for(pro),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    /// No base directory exists at all
    Missing,
    /// Directories exist but the logs could not be read
    Unavailable,
    Ok,
}

/// Point-in-time usage summary pushed to presentation surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub status: UsageStatus,
    pub total_tokens: u64,
    pub window_ms: i64,
    pub oldest_timestamp_ms: Option<i64>,
    pub reset_at_ms: Option<i64>,
    pub plan: PlanType,
    pub limit: u64,
}

impl UsageSnapshot {
    pub fn missing(plan: PlanType, limit: u64) -> Self {
        Self::empty(UsageStatus::Missing, plan, limit)
    }

    pub fn unavailable(plan: PlanType, limit: u64) -> Self {
        Self::empty(UsageStatus::Unavailable, plan, limit)
    }

    /// Valid "no activity yet" state
    pub fn idle(plan: PlanType, limit: u64) -> Self {
        Self::empty(UsageStatus::Ok, plan, limit)
    }

    fn empty(status: UsageStatus, plan: PlanType, limit: u64) -> Self {
        Self {
            status,
            total_tokens: 0,
            window_ms: WINDOW_MS,
            oldest_timestamp_ms: None,
            reset_at_ms: None,
            plan,
            limit,
        }
    }

    pub fn percent_used(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.total_tokens as f64 / self.limit as f64 * 100.0
    }

    /// Time left until the quota resets, saturating at zero
    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset_at = self.reset_at_ms?;
        let remaining = reset_at.saturating_sub(now.timestamp_millis()).max(0);
        Some(Duration::from_millis(remaining as u64))
    }
}

/// Runtime knobs for the monitor service
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub enabled: bool,
    pub debounce: Duration,
    pub poll_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce: Duration::from_millis(200),
            poll_interval: Duration::from_secs(30),
        }
    }
}
