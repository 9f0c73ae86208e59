use crate::models::*;
use crate::services::broadcaster::{ConfigChange, UsageEvent};
use chrono::{DateTime, Local, TimeZone, Utc};
use colored::*;
use std::time::Duration;

const BAR_WIDTH: usize = 30;

/// Text progress bar, clamped to `[0, 100]` percent
pub fn progress_bar(percent: f64, width: usize) -> String {
    let ratio = if percent.is_finite() {
        (percent / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (ratio * width as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

/// Countdown rounded down to whole minutes, e.g. `2h 5m`
pub fn format_countdown(remaining: Duration) -> String {
    let minutes = remaining.as_secs() / 60;
    if minutes == 0 {
        return "<1m".to_string();
    }
    humantime::format_duration(Duration::from_secs(minutes * 60)).to_string()
}

/// One-line rendering of a snapshot; `None` when there is nothing to show
pub fn render_snapshot(snapshot: &UsageSnapshot, now: DateTime<Utc>) -> Option<String> {
    match snapshot.status {
        UsageStatus::Missing => None,
        UsageStatus::Unavailable => Some(format!("[{}] usage data unavailable", snapshot.plan)),
        UsageStatus::Ok => {
            let percent = snapshot.percent_used();
            let mut line = format!(
                "[{}] {} {:>5.1}%  {} / {} tokens",
                snapshot.plan,
                progress_bar(percent, BAR_WIDTH),
                percent,
                snapshot.total_tokens,
                snapshot.limit
            );
            if let Some(remaining) = snapshot.time_until_reset(now) {
                line.push_str(&format!("  resets in {}", format_countdown(remaining)));
            }
            Some(line)
        }
    }
}

fn colorize(line: String, percent: f64) -> ColoredString {
    if percent >= 90.0 {
        line.bright_red()
    } else if percent >= 70.0 {
        line.bright_yellow()
    } else {
        line.bright_green()
    }
}

/// Line-oriented presentation surface fed by the broadcast channel
#[derive(Debug, Default)]
pub struct TerminalSurface {
    limit: Option<u64>,
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event(&mut self, event: &UsageEvent) {
        match event {
            UsageEvent::Snapshot(snapshot) => self.show_snapshot(snapshot),
            UsageEvent::ConfigChanged(change) => self.show_config(change),
        }
    }

    pub fn show_snapshot(&mut self, snapshot: &UsageSnapshot) {
        self.limit = Some(snapshot.limit);
        let Some(line) = render_snapshot(snapshot, Utc::now()) else {
            return;
        };
        let stamp = Local::now().format("%H:%M:%S");
        match snapshot.status {
            UsageStatus::Ok => println!("{} {}", stamp, colorize(line, snapshot.percent_used())),
            _ => println!("{} {}", stamp, line.dimmed()),
        }
    }

    fn show_config(&mut self, change: &ConfigChange) {
        if self.limit != Some(change.limit) {
            println!(
                "{} plan {} now allows {} tokens per window",
                "⚙".bright_blue(),
                change.plan,
                change.limit
            );
        }
        self.limit = Some(change.limit);
    }
}

/// Print a full status block for a single snapshot
pub fn print_status(snapshot: &UsageSnapshot) {
    println!("📊 Claude Usage Status:");
    println!("  Plan: {} ({} tokens per window)", snapshot.plan, snapshot.limit);
    match snapshot.status {
        UsageStatus::Missing => {
            println!("  {}", "No Claude data directory found".dimmed());
        }
        UsageStatus::Unavailable => {
            println!("  {}", "Usage data unavailable".yellow());
        }
        UsageStatus::Ok => {
            let percent = snapshot.percent_used();
            println!(
                "  Used: {} / {} ({:.1}%)",
                snapshot.total_tokens, snapshot.limit, percent
            );
            println!("  {}", colorize(progress_bar(percent, BAR_WIDTH), percent));
            if let Some(start) = snapshot.oldest_timestamp_ms.and_then(local_time) {
                println!("  Window started: {}", start.format("%Y-%m-%d %H:%M"));
            }
            if let Some(reset) = snapshot.reset_at_ms.and_then(local_time) {
                let countdown = snapshot
                    .time_until_reset(Utc::now())
                    .map(format_countdown)
                    .unwrap_or_default();
                println!("  Resets: {} (in {})", reset.format("%Y-%m-%d %H:%M"), countdown);
            }
        }
    }
}

fn local_time(ms: i64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(ms).single()
}
