use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

use sleeprs::logging::init_logging;
use sleeprs::store::SessionQuery;
use sleeprs::{
    AppConfig, FixtureProvider, LogLevel, MetricStatus, PhysiologicalMetric, SleepSession,
    SleepStore, SqliteStore, SyncCoordinator, SyncOutcome, SyncRequest,
};

/// sleeprs - Sleep Session Reconciliation CLI
///
/// Pulls sleep-stage and physiological samples from a provider, reconciles
/// them into one session per night, and scores sleep quality and recovery
/// against a personal baseline.
#[derive(Parser)]
#[command(name = "sleeprs")]
#[command(version = "0.1.0")]
#[command(about = "Sleep session reconciliation CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the database path from the config
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync samples from a JSON fixture into the database
    Sync {
        /// Fixture file with stage and metric samples
        #[arg(short, long)]
        fixture: PathBuf,

        /// Re-read the whole history window instead of resuming
        #[arg(long, conflicts_with_all = ["from", "to"])]
        full: bool,

        /// Date range start (YYYY-MM-DD)
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Date range end (YYYY-MM-DD)
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Treat the run as user-initiated
        #[arg(short, long)]
        user: bool,

        /// Records per provider page
        #[arg(long, default_value = "500")]
        page_size: usize,

        /// Write run diagnostics as JSON
        #[arg(long, value_name = "FILE")]
        diagnostics: Option<PathBuf>,
    },

    /// List recent sleep sessions
    Sessions {
        /// Number of sessions to show
        #[arg(short, long, default_value = "14")]
        limit: usize,
    },

    /// Show recovery metrics for one day
    Recovery {
        /// Ownership day (YYYY-MM-DD)
        day: NaiveDate,
    },

    /// Configure application settings
    Config {
        /// Write a default config file
        #[arg(long)]
        init: bool,

        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Day")]
    day: String,
    #[tabled(rename = "Bed")]
    in_bed: String,
    #[tabled(rename = "Asleep")]
    asleep: String,
    #[tabled(rename = "Deep")]
    deep: String,
    #[tabled(rename = "REM")]
    rem: String,
    #[tabled(rename = "Wake-ups")]
    wake_ups: u32,
    #[tabled(rename = "Score")]
    score: String,
}

#[derive(Tabled)]
struct RecoveryRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Tonight")]
    current: String,
    #[tabled(rename = "Baseline")]
    baseline: String,
    #[tabled(rename = "Std Dev")]
    std_dev: String,
    #[tabled(rename = "Z")]
    z_score: String,
    #[tabled(rename = "Status")]
    status: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load_or_default(),
    };
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if cli.verbose > 0 {
        config.logging.level = LogLevel::from_verbosity(cli.verbose);
    }
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Sync {
            fixture,
            full,
            from,
            to,
            user,
            page_size,
            diagnostics,
        } => {
            let request = match (from, to) {
                (Some(from), Some(to)) => {
                    if from > to {
                        bail!("--from {} is after --to {}", from, to);
                    }
                    SyncRequest::range(from, to)
                }
                _ if full => SyncRequest::full(),
                _ => SyncRequest::incremental(),
            };
            let request = if user { request.by_user() } else { request };
            run_sync(config, fixture, page_size, request, diagnostics).await?;
        }

        Commands::Sessions { limit } => {
            let store = open_store(&config)?;
            let sessions = store.fetch_sessions(&SessionQuery::latest(limit))?;
            if sessions.is_empty() {
                println!("{}", "No sleep sessions yet. Run `sleeprs sync` first.".yellow());
                return Ok(());
            }

            let rows: Vec<SessionRow> = sessions.iter().map(session_row).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }

        Commands::Recovery { day } => {
            let store = open_store(&config)?;
            let Some(session) = store.fetch_sessions(&SessionQuery::day(day))?.into_iter().next() else {
                println!("{}", format!("No session for {}", day).yellow());
                return Ok(());
            };
            print_recovery(&session);
        }

        Commands::Config { init, show } => {
            if init {
                let path = cli.config.unwrap_or_else(AppConfig::default_config_path);
                config.save_to_file(&path)?;
                println!("{} {}", "✓ Wrote config to".green(), path.display());
            }
            if show || !init {
                let rendered = toml::to_string_pretty(&config)
                    .context("Failed to render configuration")?;
                println!("{}", rendered);
            }
        }
    }

    Ok(())
}

fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path).with_context(|| {
        format!("Failed to open database: {}", config.database_path.display())
    })
}

async fn run_sync(
    config: AppConfig,
    fixture: PathBuf,
    page_size: usize,
    request: SyncRequest,
    diagnostics: Option<PathBuf>,
) -> Result<()> {
    let store = Arc::new(open_store(&config)?);
    let provider = Arc::new(FixtureProvider::from_json_file(&fixture, page_size)?);
    let coordinator = SyncCoordinator::new(store, provider, config);

    println!("{}", "Syncing sleep data...".blue().bold());
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );

    let mut progress = coordinator.subscribe_progress();
    let watcher_bar = bar.clone();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = progress.borrow_and_update().clone();
            watcher_bar.set_position((current.fraction * 100.0).round() as u64);
            watcher_bar.set_message(current.status);
            if !current.is_syncing {
                break;
            }
        }
    });

    let outcome = coordinator.sync(request).await;
    let _ = watcher.await;
    bar.finish_and_clear();

    match outcome {
        SyncOutcome::Completed(report) => {
            for stream in &report.streams {
                println!(
                    "  {:<24} {} added, {} deleted, {} page(s)",
                    stream.data_type.to_string(),
                    stream.added,
                    stream.deleted,
                    stream.pages
                );
            }
            if !report.finalized_sessions.is_empty() {
                println!("  Finalized {} session(s)", report.finalized_sessions.len());
            }
            for warning in &report.diagnostics.warnings {
                println!("  {} {}", "!".yellow(), warning);
            }

            if let Some(path) = diagnostics {
                report.diagnostics.save_to_file(&path)?;
            }

            if report.success() {
                println!("{}", format!("✓ {}", report.status()).green());
            } else {
                for step in report.diagnostics.failed_steps() {
                    if let Some(error) = &step.error {
                        println!("  {} {}: {}", "✗".red(), step.step, error);
                    }
                }
                println!("{}", report.status().red());
            }
        }
        SyncOutcome::AlreadyRunning => {
            println!("{}", "A sync with the same scope is already running".yellow());
        }
        SyncOutcome::RateLimited { retry_after_seconds } => {
            println!(
                "{}",
                format!("Synced recently, try again in {}s or pass --user", retry_after_seconds).yellow()
            );
        }
    }

    Ok(())
}

fn session_row(session: &SleepSession) -> SessionRow {
    SessionRow {
        day: session.day.to_string(),
        in_bed: format_duration(session.time_in_bed_seconds),
        asleep: format_duration(session.total_sleep_seconds),
        deep: format_duration(session.deep_seconds),
        rem: format_duration(session.rem_seconds),
        wake_ups: session.wake_up_count,
        score: session
            .score()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "pending".to_string()),
    }
}

fn print_recovery(session: &SleepSession) {
    let Some(baselines) = session.recovery() else {
        println!(
            "{}",
            format!("Session {} is not finalized yet", session.day).yellow()
        );
        return;
    };

    println!(
        "{} {}  score {}",
        "Recovery for".bold(),
        session.day,
        session.sleep_score.to_string().bold()
    );

    let rows: Vec<RecoveryRow> = PhysiologicalMetric::ALL
        .iter()
        .map(|metric| {
            let baseline = baselines.get(*metric);
            let current = session.averages.get(*metric);
            let status = baseline.status();
            let status_text = match status {
                MetricStatus::Optimal => status.to_string().green().to_string(),
                MetricStatus::Elevated => status.to_string().yellow().to_string(),
                MetricStatus::Depressed => status.to_string().red().to_string(),
                MetricStatus::Unknown => status.to_string().dimmed().to_string(),
            };
            RecoveryRow {
                metric: metric.to_string(),
                current: if current > 0.0 {
                    format!("{:.1} {}", current, metric.unit())
                } else {
                    "-".to_string()
                },
                baseline: if baseline.has_baseline() {
                    format!("{:.1}", baseline.baseline)
                } else {
                    "-".to_string()
                },
                std_dev: if baseline.has_baseline() {
                    format!("{:.2}", baseline.std_dev)
                } else {
                    "-".to_string()
                },
                z_score: if baseline.has_z_score() {
                    format!("{:+.2}", baseline.z_score)
                } else {
                    "-".to_string()
                },
                status: status_text,
            }
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn format_duration(seconds: i64) -> String {
    format!("{}h {:02}m", seconds / 3600, (seconds % 3600) / 60)
}
