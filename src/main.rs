use anyhow::Result;
use clap::{Parser, Subcommand};
use claude_usage_monitor::{
    models::*,
    services::{
        config_store::ConfigStore,
        file_monitor::{explain_how_this_works, JsonlBlockLoader},
        usage_service::UsageMonitorService,
    },
    ui::{print_status, TerminalSurface},
};
use log::debug;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "claude-usage-monitor")]
#[command(about = "Live Claude plan usage from local session logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (debug log written to debug.log)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet period after a log write before recomputing, in milliseconds
    #[arg(long, default_value = "200")]
    debounce_ms: u64,

    /// Polling interval when file watching is unavailable, in seconds
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    poll_secs: u64,

    /// Start with the monitor disabled
    #[arg(long)]
    disabled: bool,

    /// Explain in detail how this tool works and what it monitors
    #[arg(long)]
    explain_how_this_works: bool,

    /// Show about information including version and build
    #[arg(long)]
    about: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch usage and print every change (default)
    Monitor,
    /// Show current usage once
    Status,
    /// Configure plan and limits
    Config {
        /// Plan tier: pro, max5 or max20
        #[arg(long)]
        plan: Option<String>,
        /// Base pro-tier token limit
        #[arg(long)]
        pro_limit: Option<f64>,
    },
    /// Show the token limit of every plan tier
    Limits,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.about {
        show_about();
        return Ok(());
    }

    if cli.explain_how_this_works {
        explain_how_this_works();
        return Ok(());
    }

    init_logging(cli.verbose)?;

    let store = match &cli.config {
        Some(path) => ConfigStore::new(path.clone()),
        None => ConfigStore::at_default_location(),
    };
    debug!("Using config file {:?}", store.path());

    let settings = MonitorSettings {
        enabled: !cli.disabled,
        debounce: Duration::from_millis(cli.debounce_ms),
        poll_interval: Duration::from_secs(cli.poll_secs),
    };
    let service = UsageMonitorService::new(JsonlBlockLoader::new(), store, settings);

    match cli.command {
        Some(Commands::Status) => {
            print_status(&service.current_snapshot().await);
        }
        Some(Commands::Config { plan, pro_limit }) => {
            configure(&service, plan, pro_limit)?;
        }
        Some(Commands::Limits) => {
            show_limits(&service);
        }
        Some(Commands::Monitor) | None => {
            run_monitor(&service).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    if verbose {
        use std::fs::OpenOptions;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open("debug.log")?;

        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .init();
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .init();
    }
    Ok(())
}

async fn run_monitor(service: &UsageMonitorService<JsonlBlockLoader>) -> Result<()> {
    if !service.is_enabled() {
        println!("Usage monitor is disabled.");
        return Ok(());
    }

    let mut events = service.subscribe();
    let mut surface = TerminalSurface::new();

    println!("🧠 Claude Usage Monitor - press Ctrl-C to exit");
    service.start().await;
    debug!("Freshness mode: {:?}", service.freshness_mode());

    if let Some(snapshot) = service.last_broadcast() {
        if snapshot.status == UsageStatus::Missing {
            println!("📁 No Claude data directory found yet; waiting for one to appear.");
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => surface.handle_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!("Display lagged by {skipped} updates"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => break,
        }
    }

    service.stop();
    Ok(())
}

fn configure(
    service: &UsageMonitorService<JsonlBlockLoader>,
    plan: Option<String>,
    pro_limit: Option<f64>,
) -> Result<()> {
    if let Some(plan) = plan {
        let config = service.set_plan(&plan)?;
        println!("✅ Set plan to: {}", config.plan);
    }

    if let Some(limit) = pro_limit {
        let config = service.set_pro_limit(limit)?;
        println!("✅ Set pro limit to: {} tokens", config.limits.pro);
    }

    let config = service.config();
    println!("Plan: {} ({} tokens per window)", config.plan, config.limit());
    Ok(())
}

fn show_limits(service: &UsageMonitorService<JsonlBlockLoader>) {
    let config = service.config();
    let limits = service.derived_limits();
    for (plan, limit) in [
        (PlanType::Pro, limits.pro),
        (PlanType::Max5, limits.max5),
        (PlanType::Max20, limits.max20),
    ] {
        let marker = if plan == config.plan { "*" } else { " " };
        println!("{} {:<6} {:>12} tokens", marker, plan.as_str(), limit);
    }
}

/// Display about information including version and build
fn show_about() {
    use colored::Colorize;

    println!("{}", "📱 Claude Usage Monitor".bright_cyan().bold());
    println!();
    println!("{}", "📋 Version Information:".bright_yellow().bold());
    println!("  Version: {}", env!("CARGO_PKG_VERSION").bright_green());
    println!("  Built: {}", env!("CLAUDE_USAGE_MONITOR_BUILD_TIME"));
    println!("  Build ID: {}", env!("CLAUDE_USAGE_MONITOR_BUILD_ID"));
    if let Some(hash) = option_env!("CLAUDE_USAGE_MONITOR_GIT_HASH") {
        println!("  Commit: {}", hash);
    }
    println!();

    println!("{}", "👨‍💻 Author:".bright_yellow().bold());
    println!("  Chris Phillips, Email: {}", "tools-claude-token-monitor@adiuco.com".bright_blue());
    println!();

    println!("{}", "💡 Usage:".bright_green().bold());
    println!("  claude-usage-monitor --help");
    println!("  claude-usage-monitor --explain-how-this-works");
    println!("  claude-usage-monitor config --plan max5");
}
