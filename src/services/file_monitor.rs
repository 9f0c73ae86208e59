use super::{UsageLoader, LOG_EXTENSION, LOG_SUBDIR};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// Length of one accounting block
pub fn block_duration() -> Duration {
    Duration::hours(5)
}

/// Claude usage entry from JSONL files
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub usage: TokenUsage,
    pub model: Option<String>,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_input_tokens)
            .saturating_add(self.cache_read_input_tokens)
    }

    fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_creation_input_tokens = self
            .cache_creation_input_tokens
            .saturating_add(other.cache_creation_input_tokens);
        self.cache_read_input_tokens = self
            .cache_read_input_tokens
            .saturating_add(other.cache_read_input_tokens);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEntry {
    pub timestamp: DateTime<Utc>,
    pub usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A 5-hour accounting window, or a gap between two of them
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBlock {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_gap: bool,
    pub entries: Vec<BlockEntry>,
    pub token_counts: TokenUsage,
    pub models: Vec<String>,
}

/// Reads Claude Code session logs and groups them into accounting blocks
#[derive(Debug, Clone, Default)]
pub struct JsonlBlockLoader {
    base_dirs: Option<Vec<PathBuf>>,
}

impl JsonlBlockLoader {
    /// Loader that discovers base directories from the environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader pinned to explicit base directories
    pub fn with_base_dirs(base_dirs: Vec<PathBuf>) -> Self {
        Self {
            base_dirs: Some(base_dirs),
        }
    }

    /// Candidate Claude base directories.
    ///
    /// `CLAUDE_CONFIG_DIR` (comma separated) wins; otherwise the standard
    /// `~/.config/claude` and `~/.claude` locations.
    pub fn discover_base_dirs() -> Vec<PathBuf> {
        if let Ok(env_dirs) = std::env::var("CLAUDE_CONFIG_DIR") {
            let dirs: Vec<PathBuf> = env_dirs
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
            if !dirs.is_empty() {
                return dirs;
            }
        }

        match dirs::home_dir() {
            Some(home) => vec![home.join(".config").join("claude"), home.join(".claude")],
            None => {
                log::warn!("Could not find home directory");
                Vec::new()
            }
        }
    }

    /// Scan every `projects/**/*.jsonl` under the base directories
    pub async fn scan_usage_files(&self, base_dirs: &[PathBuf]) -> Result<Vec<UsageEntry>> {
        let mut all_entries = Vec::new();

        for base in base_dirs {
            let data_path = base.join(LOG_SUBDIR);
            let meta = fs::metadata(&data_path)
                .await
                .with_context(|| format!("reading {}", data_path.display()))?;
            if !meta.is_dir() {
                return Err(anyhow!("{} is not a directory", data_path.display()));
            }
            log::debug!("Scanning directory: {:?}", data_path);

            let files: Vec<PathBuf> = WalkDir::new(&data_path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| match e {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        log::warn!("Skipping unreadable path under {:?}: {}", data_path, e);
                        None
                    }
                })
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.path().extension().map_or(false, |ext| ext == LOG_EXTENSION))
                .map(|e| e.into_path())
                .collect();

            for file_path in &files {
                match self.parse_jsonl_file(file_path).await {
                    Ok(mut entries) => all_entries.append(&mut entries),
                    Err(e) => log::warn!("Failed to parse JSONL file {:?}: {}", file_path, e),
                }
            }
        }

        let mut seen = HashSet::new();
        all_entries.retain(|entry| match (&entry.message_id, &entry.request_id) {
            (Some(message), Some(request)) => seen.insert((message.clone(), request.clone())),
            _ => true,
        });
        all_entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        log::debug!("Loaded {} usage entries from JSONL files", all_entries.len());
        Ok(all_entries)
    }

    /// Parse a single JSONL file for usage entries
    async fn parse_jsonl_file(&self, file_path: &Path) -> Result<Vec<UsageEntry>> {
        let content = fs::read_to_string(file_path).await?;
        let mut entries = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(json) => {
                    if let Some(entry) = parse_usage_entry(&json) {
                        entries.push(entry);
                    }
                }
                Err(e) => {
                    log::debug!(
                        "Skipping invalid JSON line {} in {:?}: {}",
                        line_num + 1,
                        file_path,
                        e
                    );
                }
            }
        }

        Ok(entries)
    }
}

impl UsageLoader for JsonlBlockLoader {
    fn base_dirs(&self) -> Vec<PathBuf> {
        match &self.base_dirs {
            Some(dirs) => dirs.clone(),
            None => Self::discover_base_dirs(),
        }
    }

    fn load_blocks(&self, base_dirs: &[PathBuf]) -> impl Future<Output = Result<Value>> + Send {
        async move {
            let entries = self.scan_usage_files(base_dirs).await?;
            let blocks = group_into_blocks(&entries, Utc::now());
            serde_json::to_value(blocks).context("serializing session blocks")
        }
    }
}

/// Parse one log line into a usage entry; lines without usage are skipped
pub fn parse_usage_entry(json: &Value) -> Option<UsageEntry> {
    let timestamp = json
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())?
        .with_timezone(&Utc);

    let message = json.get("message");
    let usage_obj = message
        .and_then(|m| m.get("usage"))
        .or_else(|| json.get("usage"))
        .filter(|u| u.is_object())?;

    let count = |name: &str| usage_obj.get(name).and_then(Value::as_u64).unwrap_or(0);
    let usage = TokenUsage {
        input_tokens: count("input_tokens"),
        output_tokens: count("output_tokens"),
        cache_creation_input_tokens: count("cache_creation_input_tokens"),
        cache_read_input_tokens: count("cache_read_input_tokens"),
    };

    let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);
    Some(UsageEntry {
        timestamp,
        usage,
        model: text(message.and_then(|m| m.get("model"))).or_else(|| text(json.get("model"))),
        message_id: text(message.and_then(|m| m.get("id")))
            .or_else(|| text(json.get("message_id"))),
        request_id: text(json.get("requestId")).or_else(|| text(json.get("request_id"))),
    })
}

/// Group time-sorted entries into 5-hour blocks.
///
/// A block starts at its first entry floored to the hour. A new block begins
/// once an entry lies more than one block length after the block start or
/// after the previous entry; in the latter case a gap block covers the idle
/// stretch.
pub fn group_into_blocks(entries: &[UsageEntry], now: DateTime<Utc>) -> Vec<SessionBlock> {
    let mut blocks = Vec::new();
    let mut current: Vec<&UsageEntry> = Vec::new();
    let mut current_start: Option<DateTime<Utc>> = None;

    for entry in entries {
        if let (Some(start), Some(last)) = (current_start, current.last()) {
            let since_start = entry.timestamp - start;
            let since_last = entry.timestamp - last.timestamp;
            if since_start > block_duration() || since_last > block_duration() {
                blocks.push(build_block(start, &current, now));
                if since_last > block_duration() {
                    blocks.push(gap_block(last.timestamp, entry.timestamp));
                }
                current.clear();
                current_start = None;
            }
        }
        if current_start.is_none() {
            current_start = Some(floor_to_hour(entry.timestamp));
        }
        current.push(entry);
    }

    if let Some(start) = current_start {
        blocks.push(build_block(start, &current, now));
    }
    blocks
}

fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::hours(1)).unwrap_or(ts)
}

fn build_block(start: DateTime<Utc>, entries: &[&UsageEntry], now: DateTime<Utc>) -> SessionBlock {
    let end = start + block_duration();
    let actual_end = entries.last().map(|e| e.timestamp);
    let mut token_counts = TokenUsage::default();
    let mut models = BTreeSet::new();

    for entry in entries {
        token_counts.add(&entry.usage);
        if let Some(model) = &entry.model {
            models.insert(model.clone());
        }
    }

    let is_active = actual_end.map_or(false, |last| now - last < block_duration()) && now < end;

    SessionBlock {
        id: start.to_rfc3339(),
        start_time: start,
        end_time: end,
        actual_end_time: actual_end,
        is_active,
        is_gap: false,
        entries: entries
            .iter()
            .map(|e| BlockEntry {
                timestamp: e.timestamp,
                usage: e.usage,
                model: e.model.clone(),
            })
            .collect(),
        token_counts,
        models: models.into_iter().collect(),
    }
}

fn gap_block(last_activity: DateTime<Utc>, next_activity: DateTime<Utc>) -> SessionBlock {
    let start = last_activity + block_duration();
    SessionBlock {
        id: format!("gap-{}", start.to_rfc3339()),
        start_time: start,
        end_time: next_activity,
        actual_end_time: None,
        is_active: false,
        is_gap: true,
        entries: Vec::new(),
        token_counts: TokenUsage::default(),
        models: Vec::new(),
    }
}

/// Display detailed explanation of how the tool works
pub fn explain_how_this_works() {
    println!("{}", "🧠 Claude Usage Monitor - How It Works".bright_cyan().bold());
    println!();
    println!("{}", "📋 Overview:".bright_yellow().bold());
    println!("This tool estimates how much of your Claude plan's rolling 5-hour quota you have");
    println!("used, by reading the local session logs Claude Code writes. No API calls!");
    println!();

    println!("{}", "📁 What Files It Monitors:".bright_yellow().bold());
    println!("• ~/.config/claude/projects/**/*.jsonl");
    println!("• ~/.claude/projects/**/*.jsonl");
    println!("• Custom base directories from CLAUDE_CONFIG_DIR (comma separated)");
    println!();

    println!("{}", "📊 How It Calculates Usage:".bright_yellow().bold());
    println!("• Entries are grouped into 5-hour blocks starting on the hour");
    println!("• The active block is the one still accruing usage");
    println!("• Used = input + output + cache-write + cache-read tokens in that block");
    println!("• Limit = pro limit x 1 (pro), x 5 (max5) or x 20 (max20)");
    println!();

    println!("{}", "⚡ Real-time Updates:".bright_yellow().bold());
    println!("• Watches the projects directories and refreshes 200ms after writes settle");
    println!("• Falls back to polling every 30 seconds if watching is not possible");
    println!("• Only prints an update when the numbers actually change");
    println!();

    println!("{}", "🔒 Privacy & Security:".bright_yellow().bold());
    println!("• No network connections and no credentials");
    println!("• Reads token counts and timestamps only, never conversation content");
    println!();

    println!("{}", "🚀 Getting Started:".bright_green().bold());
    println!("1. claude-usage-monitor config --plan max5");
    println!("2. claude-usage-monitor status");
    println!("3. claude-usage-monitor monitor");
    println!();
}

use colored::Colorize;
