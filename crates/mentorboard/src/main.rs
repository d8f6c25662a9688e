//! mentorboard - Dashboard cache service for the coaching platform

mod cli;
mod seed;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use mentorboard_core::{
    parse_key, resolve_data_dir, DashboardService, RefreshConfig, SqliteSources,
    SOURCES_DB_FILE_NAME,
};
use mentorboard_types::{RefreshReason, SubjectType};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mentorboard",
    version,
    about = "Dashboard cache service for the mentorboard coaching platform",
    long_about = "Precomputes student, director and sponsor dashboards into a SQLite cache.\n\
                  \n\
                  Mutations enqueue the affected subjects; a periodic tick drains the queue\n\
                  and sweeps rows older than the staleness threshold. Reads never compute.\n\
                  \n\
                  Examples:\n\
                    mentorboard init-sources --demo          # Create a demo sources database\n\
                    mentorboard serve --port 8080            # API + background scheduler\n\
                    mentorboard tick                         # Run one scheduler tick and exit\n\
                    mentorboard refresh director director_7  # Recompute one dashboard now\n\
                    mentorboard show student student_42      # Print a cached dashboard\n\
                  \n\
                  Environment Variables:\n\
                    MENTORBOARD_DATA_DIR                     # Cache directory\n\
                    MENTORBOARD_SOURCES_DB                   # Sources database path\n\
                    MENTORBOARD_OPERATOR_TOKEN               # Bearer token for operator endpoints\n\
                    RUST_LOG                                 # Log filter (default: info)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the dashboard cache and config (default: local data dir)
    #[arg(long, env = "MENTORBOARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Sources database (default: <data-dir>/sources.db)
    #[arg(long, env = "MENTORBOARD_SOURCES_DB")]
    sources_db: Option<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct ConfigArgs {
    /// Config file (default: <data-dir>/mentorboard.toml if present)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Override the scheduler tick interval
    #[arg(long)]
    tick_interval_secs: Option<u64>,

    /// Override the staleness threshold
    #[arg(long)]
    staleness_secs: Option<u64>,

    /// Bearer token for operator endpoints
    #[arg(long, env = "MENTORBOARD_OPERATOR_TOKEN", hide_env_values = true)]
    operator_token: Option<String>,
}

impl ConfigArgs {
    /// File (or defaults) first, then command-line overrides
    fn load(&self, data_dir: &Path) -> Result<RefreshConfig> {
        let mut config = match &self.config {
            Some(path) => RefreshConfig::load(path)?,
            None => RefreshConfig::load_or_default(data_dir)?,
        };

        if let Some(secs) = self.tick_interval_secs {
            config.tick_interval_secs = secs;
        }
        if let Some(secs) = self.staleness_secs {
            config.staleness_threshold_secs = secs;
        }
        if self.operator_token.is_some() {
            config.operator_token = self.operator_token.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the web API with the background scheduler
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: IpAddr,
        /// Port for web server
        #[arg(long, default_value = "3333")]
        port: u16,
        /// Serve reads only; another process runs the scheduler
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Run one scheduler tick and exit
    Tick {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recompute one dashboard now
    Refresh {
        /// student | director | sponsor
        subject_type: String,
        subject_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recompute every dashboard of one subject type
    RefreshAll {
        /// student | director | sponsor
        subject_type: SubjectType,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue a subject for the next tick
    Enqueue {
        subject_type: String,
        subject_id: String,
        /// Recorded reason
        #[arg(long, default_value = "manual")]
        reason: RefreshReason,
    },
    /// Print a cached dashboard
    Show {
        subject_type: String,
        subject_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List pending queue entries
    Queue {
        /// Max entries
        #[arg(long, short = 'n', default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print cache statistics and exit
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every cached dashboard
    ClearCache,
    /// Create the sources schema
    InitSources {
        /// Also insert demo subjects
        #[arg(long)]
        demo: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        command,
        data_dir,
        sources_db,
        config,
    } = Cli::parse();

    let data_dir = resolve_data_dir(data_dir)?;
    let sources_db = sources_db.unwrap_or_else(|| data_dir.join(SOURCES_DB_FILE_NAME));

    let open = || -> Result<Arc<DashboardService>> {
        let config = config.load(&data_dir)?;
        let service = DashboardService::open(&data_dir, &sources_db, config)
            .context("Failed to open dashboard service")?;
        Ok(Arc::new(service))
    };

    match command {
        Command::Serve {
            bind,
            port,
            no_scheduler,
        } => run_serve(open()?, SocketAddr::new(bind, port), no_scheduler).await?,
        Command::Tick { json } => run_tick(&*open()?, json).await?,
        Command::Refresh {
            subject_type,
            subject_id,
            json,
        } => run_refresh(&*open()?, &subject_type, &subject_id, json).await?,
        Command::RefreshAll { subject_type, json } => {
            run_refresh_all(&*open()?, subject_type, json).await?
        }
        Command::Enqueue {
            subject_type,
            subject_id,
            reason,
        } => run_enqueue(&*open()?, &subject_type, &subject_id, reason)?,
        Command::Show {
            subject_type,
            subject_id,
            json,
        } => run_show(&*open()?, &subject_type, &subject_id, json).await?,
        Command::Queue { limit, json } => run_queue(&*open()?, limit, json)?,
        Command::Stats { json } => run_stats(&*open()?, json)?,
        Command::ClearCache => run_clear_cache(&*open()?)?,
        Command::InitSources { demo } => run_init_sources(&sources_db, demo)?,
    }

    Ok(())
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .context("Invalid spinner template")?,
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message(message.to_string());
    Ok(spinner)
}

async fn run_serve(service: Arc<DashboardService>, addr: SocketAddr, no_scheduler: bool) -> Result<()> {
    let handle = if no_scheduler {
        None
    } else {
        Some(service.scheduler().clone().start())
    };

    println!("Dashboard API: http://{}/api/*", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };
    let served = mentorboard_web::run(service, addr, shutdown).await;

    if let Some(handle) = handle {
        handle.shutdown().await;
    }
    served
}

async fn run_tick(service: &DashboardService, json: bool) -> Result<()> {
    let spinner = spinner("Running scheduler tick...")?;
    let summary = service.scheduler().tick().await;
    spinner.finish_and_clear();

    let summary = summary?;
    println!("{}", cli::format_tick(&summary, json));
    Ok(())
}

async fn run_refresh(
    service: &DashboardService,
    subject_type: &str,
    subject_id: &str,
    json: bool,
) -> Result<()> {
    let key = parse_key(subject_type, subject_id)?;
    let start = Instant::now();
    let refreshed = service.refresh_now(&key).await?;

    if !json {
        println!(
            "{} {:?} in {:.2}s",
            key,
            refreshed.outcome,
            start.elapsed().as_secs_f64()
        );
    }
    println!("{}", cli::format_record(&refreshed.record, Utc::now(), json));
    Ok(())
}

async fn run_refresh_all(service: &DashboardService, subject_type: SubjectType, json: bool) -> Result<()> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {pos} {msg}")
            .context("Invalid progress template")?,
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(80));

    let summary = service
        .refresh_all_with_progress(subject_type, |key, _| {
            bar.inc(1);
            bar.set_message(key.to_string());
        })
        .await;
    bar.finish_and_clear();

    let summary = summary?;
    println!("{}", cli::format_refresh_all(&summary, json));
    Ok(())
}

fn run_enqueue(
    service: &DashboardService,
    subject_type: &str,
    subject_id: &str,
    reason: RefreshReason,
) -> Result<()> {
    let key = parse_key(subject_type, subject_id)?;
    if service.enqueue(&key, reason)? {
        println!("Queued {} ({})", key, reason);
    } else {
        println!("{} was already queued; reason updated to {}", key, reason);
    }
    Ok(())
}

async fn run_show(service: &DashboardService, subject_type: &str, subject_id: &str, json: bool) -> Result<()> {
    let key = parse_key(subject_type, subject_id)?;
    let record = service.get_cache_record(&key).await?;
    println!("{}", cli::format_record(&record, Utc::now(), json));
    Ok(())
}

fn run_queue(service: &DashboardService, limit: usize, json: bool) -> Result<()> {
    let queue = service.queue();
    let pending = queue.pending_count()?;
    let entries = queue.list(limit)?;
    println!("{}", cli::format_queue(&entries, pending, json));
    Ok(())
}

fn run_stats(service: &DashboardService, json: bool) -> Result<()> {
    let stats = service.stats()?;
    println!("{}", cli::format_stats(&stats, json));
    Ok(())
}

fn run_clear_cache(service: &DashboardService) -> Result<()> {
    let removed = service.clear_cache()?;
    println!("Cleared {} cached dashboards", removed);
    Ok(())
}

fn run_init_sources(sources_db: &Path, demo: bool) -> Result<()> {
    let sources = SqliteSources::open(sources_db)?;
    println!("Sources schema ready at {}", sources_db.display());

    if demo {
        let report = seed::seed_demo(&sources, Utc::now())?;
        println!(
            "Seeded {} students, {} directors, {} sponsors, {} cohorts",
            report.students, report.directors, report.sponsors, report.cohorts
        );
    }
    Ok(())
}
