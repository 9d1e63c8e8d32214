//! Kumo-Harvest main entry point
//!
//! This is the command-line interface for the Kumo-Harvest crawl engine.

use chrono::Utc;
use clap::Parser;
use kumo_harvest::config::{load_config_with_hash, Config};
use kumo_harvest::output::{load_statistics, print_statistics, print_task_summary};
use kumo_harvest::storage::{open_storage, Storage};
use kumo_harvest::{CrawlTask, Engine, TaskStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Kumo-Harvest: a selector-driven crawl engine
///
/// Kumo-Harvest crawls the sites listed in a TOML configuration under
/// per-site rules and stores one structured item per fetched page.
#[derive(Parser, Debug)]
#[command(name = "kumo-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A selector-driven crawl engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Only crawl the site with this name
    #[arg(long, value_name = "NAME")]
    site: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show item statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, cli.site.as_deref())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_crawl(&config, cli.site.as_deref()).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("kumo_harvest=info,warn"),
            1 => EnvFilter::new("kumo_harvest=debug,info"),
            2 => EnvFilter::new("kumo_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Builds one task per enabled site, optionally restricted to `only`
fn build_tasks(config: &Config, only: Option<&str>) -> anyhow::Result<Vec<CrawlTask>> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let tasks: Vec<CrawlTask> = config
        .sites
        .iter()
        .filter(|site| match only {
            Some(name) => site.name == name,
            None => site.enabled,
        })
        .map(|site| {
            CrawlTask::from_site(format!("{}-{}", site.name, stamp), site, &config.spider)
        })
        .collect();

    if let Some(name) = only {
        if tasks.is_empty() {
            anyhow::bail!("no site named '{}' in configuration", name);
        }
    }
    Ok(tasks)
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, only: Option<&str>) -> anyhow::Result<()> {
    let spider = &config.spider;
    println!("=== Kumo-Harvest Dry Run ===\n");

    println!("Spider Defaults:");
    println!("  Concurrency: {}", spider.concurrency);
    println!("  Delay: {}ms", spider.delay_ms);
    println!("  Timeout: {}s", spider.timeout_secs);
    println!(
        "  Retries: {} (backoff {}ms)",
        spider.retries, spider.retry_backoff_ms
    );
    println!("  User agent: {}", spider.user_agent);
    if let Some(proxy) = &spider.proxy_url {
        println!("  Proxy: {}", proxy);
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Batch size: {}", config.output.batch_size);

    let tasks = build_tasks(config, only)?;
    println!("\nTasks ({}):", tasks.len());
    for task in &tasks {
        task.validate()?;
        let rules = &task.rules;
        println!("  - {} ({} start URLs)", task.name, task.start_urls.len());
        println!(
            "    depth {}, pages {}, concurrency {}, delay {}ms",
            rules.max_depth,
            rules.max_pages,
            rules.effective_concurrency(spider),
            rules.effective_delay(spider).as_millis()
        );
        for seed in &task.start_urls {
            println!("    * {}", seed);
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows item statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation: runs each task in turn
async fn handle_crawl(config: &Config, only: Option<&str>) -> anyhow::Result<()> {
    let tasks = build_tasks(config, only)?;
    if tasks.is_empty() {
        tracing::warn!("No enabled sites in configuration");
        return Ok(());
    }

    let storage = Arc::new(open_storage(Path::new(&config.output.database_path))?);
    let engine = Engine::new(config.spider.clone(), storage.clone())
        .with_batch_size(config.output.batch_size);

    for task in tasks {
        tracing::info!(task = %task.id, seeds = task.start_urls.len(), "Starting task");

        let handle = match engine.start(task) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Task rejected: {}", e);
                continue;
            }
        };

        let stopper = handle.stop_handle();
        let interrupt = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::warn!("Interrupt received, stopping crawl");
                    stopper.stop();
                }
                Err(e) => tracing::error!("Unable to listen for shutdown signal: {}", e),
            }
        });

        let finished = handle.wait().await?;
        interrupt.abort();
        print_task_summary(&finished);

        if finished.status == TaskStatus::Stopped {
            tracing::info!("Skipping remaining tasks after stop");
            break;
        }
    }

    storage.close()?;
    Ok(())
}
