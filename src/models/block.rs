//! Defensive access to accounting blocks produced by the usage loader.
//!
//! Blocks arrive as loosely typed JSON whose field names differ between loader
//! versions. Every logical value is read through an ordered list of candidate
//! names and shapes; the first candidate that yields a usable value wins.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

const START_FIELDS: [&str; 3] = ["startTime", "start_time", "start"];
const END_FIELDS: [&str; 3] = ["endTime", "end_time", "end"];
const RESET_FIELDS: [&str; 3] = ["usageLimitResetTime", "resetTime", "reset_time"];
const TOTAL_FIELDS: [&str; 2] = ["totalTokens", "total_tokens"];
const BREAKDOWN_FIELDS: [&str; 2] = ["tokenCounts", "token_counts"];
const ACTIVE_FIELDS: [&str; 2] = ["isActive", "is_active"];
const GAP_FIELDS: [&str; 2] = ["isGap", "is_gap"];

/// Wrapper fields a loader may nest its block list under
pub const WRAPPER_FIELDS: [&str; 2] = ["blocks", "data"];

/// Field names for one token-count naming convention
struct TokenNaming {
    input: &'static [&'static str],
    output: &'static [&'static str],
    cache_write: &'static [&'static str],
    cache_read: &'static [&'static str],
}

const TOKEN_NAMINGS: [TokenNaming; 2] = [
    TokenNaming {
        input: &["inputTokens"],
        output: &["outputTokens"],
        cache_write: &["cacheCreationInputTokens", "cacheCreationTokens"],
        cache_read: &["cacheReadInputTokens", "cacheReadTokens"],
    },
    TokenNaming {
        input: &["input_tokens"],
        output: &["output_tokens"],
        cache_write: &["cache_creation_input_tokens", "cache_creation_tokens"],
        cache_read: &["cache_read_input_tokens", "cache_read_tokens"],
    },
];

/// One accounting window as reported by the loader
#[derive(Debug, Clone, PartialEq)]
pub struct AccountingBlock(Value);

impl AccountingBlock {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    pub fn is_active(&self) -> bool {
        first_flag(&self.0, &ACTIVE_FIELDS)
    }

    pub fn is_gap(&self) -> bool {
        first_flag(&self.0, &GAP_FIELDS)
    }

    /// Tokens accrued in this block, falling back through every known shape
    pub fn total_tokens(&self) -> u64 {
        self.explicit_total()
            .or_else(|| self.breakdown_total())
            .or_else(|| self.flat_total())
            .or_else(|| self.entries_total())
            .unwrap_or(0)
    }

    pub fn explicit_total(&self) -> Option<u64> {
        TOTAL_FIELDS
            .iter()
            .find_map(|name| self.0.get(*name).and_then(token_count))
    }

    /// Sum of a nested `tokenCounts` / `token_counts` object
    pub fn breakdown_total(&self) -> Option<u64> {
        BREAKDOWN_FIELDS
            .iter()
            .filter_map(|name| self.0.get(*name))
            .find_map(usage_sum)
    }

    /// Sum of token fields stored directly on the block
    pub fn flat_total(&self) -> Option<u64> {
        usage_sum(&self.0)
    }

    /// Sum over per-entry usage records
    pub fn entries_total(&self) -> Option<u64> {
        let entries = self.0.get("entries")?.as_array()?;
        Some(
            entries
                .iter()
                .map(|entry| {
                    entry
                        .get("usage")
                        .and_then(usage_sum)
                        .or_else(|| usage_sum(entry))
                        .unwrap_or(0)
                })
                .fold(0u64, u64::saturating_add),
        )
    }

    pub fn start_ms(&self) -> Option<i64> {
        first_timestamp(&self.0, &START_FIELDS)
    }

    pub fn end_ms(&self) -> Option<i64> {
        first_timestamp(&self.0, &END_FIELDS)
    }

    pub fn explicit_reset_ms(&self) -> Option<i64> {
        first_timestamp(&self.0, &RESET_FIELDS)
    }

    /// When the block's quota resets: explicit reset time, else block end
    pub fn reset_at_ms(&self) -> Option<i64> {
        self.explicit_reset_ms().or_else(|| self.end_ms())
    }
}

/// Accepts a bare list or a list nested under one of [`WRAPPER_FIELDS`].
/// Anything else is not a block list.
pub fn blocks_from_loader_output(output: Value) -> Option<Vec<AccountingBlock>> {
    let list = match output {
        Value::Array(items) => items,
        Value::Object(mut map) => WRAPPER_FIELDS
            .iter()
            .find_map(|name| match map.remove(*name) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })?,
        _ => return None,
    };
    Some(list.into_iter().map(AccountingBlock::new).collect())
}

/// First active non-gap block, else first non-gap block, else the last block.
pub fn select_active_block(blocks: &[AccountingBlock]) -> Option<&AccountingBlock> {
    blocks
        .iter()
        .find(|b| b.is_active() && !b.is_gap())
        .or_else(|| blocks.iter().find(|b| !b.is_gap()))
        .or_else(|| blocks.last())
}

/// Sum input, output, cache-write and cache-read counts of a usage object.
///
/// Tries each naming convention in turn; a convention applies when at least
/// one of its four fields holds a number. Missing components count as zero.
pub fn usage_sum(usage: &Value) -> Option<u64> {
    if !usage.is_object() {
        return None;
    }
    TOKEN_NAMINGS.iter().find_map(|naming| {
        let parts = [
            naming.input,
            naming.output,
            naming.cache_write,
            naming.cache_read,
        ]
        .map(|names| names.iter().find_map(|n| usage.get(*n).and_then(token_count)));
        if parts.iter().all(Option::is_none) {
            return None;
        }
        Some(
            parts
                .iter()
                .flatten()
                .fold(0u64, |acc, n| acc.saturating_add(*n)),
        )
    })
}

/// Non-negative token count; fractional values are floored.
pub fn token_count(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let n = value.as_f64()?;
    (n.is_finite() && n >= 0.0).then(|| n.floor() as u64)
}

/// Parse a timestamp into epoch milliseconds.
///
/// Numbers are epoch milliseconds. Strings may be RFC 3339, a naive ISO-8601
/// date-time (taken as UTC), a plain date, or epoch milliseconds as digits.
pub fn parse_timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().ok();
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

fn first_timestamp(block: &Value, names: &[&str]) -> Option<i64> {
    names
        .iter()
        .find_map(|name| block.get(*name).and_then(parse_timestamp_ms))
}

fn first_flag(block: &Value, names: &[&str]) -> bool {
    names
        .iter()
        .find_map(|name| block.get(*name).and_then(Value::as_bool))
        .unwrap_or(false)
}
