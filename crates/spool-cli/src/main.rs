use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use spool_core::app::{App, AppBuilder, QueueStatus, WorkerSettings};
use spool_core::domain::{JobId, JobSpec, JobState, QueueError};
use spool_core::impls::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "spool")]
#[command(version)]
#[command(about = "Durable shell-job queue with retries and a dead letter queue")]
#[command(propagate_version = true)]
struct Args {
    /// SQLite database shared by every worker process
    #[arg(long, global = true, env = "SPOOL_DB", default_value = "spool.db")]
    db: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(flatten)]
    tuning: TuningArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct TuningArgs {
    /// Idle sleep between claim attempts
    #[arg(long, global = true, default_value = "1000")]
    poll_interval_ms: u64,

    /// Heartbeat period (must be shorter than the poll interval)
    #[arg(long, global = true, default_value = "500")]
    heartbeat_interval_ms: u64,

    /// Hard timeout for one command execution
    #[arg(long, global = true, default_value = "60")]
    timeout_secs: u64,

    /// Lease age after which a processing job may be reclaimed
    #[arg(long, global = true, default_value = "300")]
    stale_lease_secs: u64,
}

impl TuningArgs {
    fn settings(&self) -> WorkerSettings {
        WorkerSettings::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_heartbeat_interval(Duration::from_millis(self.heartbeat_interval_ms))
            .with_execution_timeout(Duration::from_secs(self.timeout_secs))
            .with_stale_lease_threshold(Duration::from_secs(self.stale_lease_secs))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a job to the queue
    Enqueue {
        /// Shell command to run
        #[arg(long, short = 'c')]
        command: String,

        /// Job id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Attempts before the job is moved to the DLQ (config default when omitted)
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Show one job
    Show { id: String },

    /// List jobs, newest first
    List {
        /// pending | processing | completed | failed | dead
        #[arg(long)]
        state: Option<JobState>,
    },

    /// Job counts and live workers
    Status,

    /// Give up the lease on a job (returns it to pending)
    Release { id: String },

    /// Dead letter queue
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Worker management
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Queue configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum DlqCommands {
    /// List dead jobs
    List,

    /// Move a dead job back to pending with a fresh attempt budget
    Retry { id: String },
}

#[derive(Subcommand, Debug)]
enum WorkerCommands {
    /// Run workers in the foreground until Ctrl-C / SIGTERM
    Start {
        #[arg(long, default_value = "1")]
        count: usize,
    },

    /// List live workers
    List {
        /// Include stopped and silent workers
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if args.json_logs {
        spool_core::observability::init_json();
    } else {
        spool_core::observability::init();
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open(&args.db)?);
    let app = AppBuilder::new()
        .with_store(store)
        .with_settings(args.tuning.settings())
        .build()?;

    match args.command {
        Commands::Enqueue {
            command,
            id,
            max_retries,
        } => {
            let mut spec = JobSpec::new(command);
            spec.id = id;
            spec.max_retries = max_retries;
            print_json(&app.queue().enqueue(spec).await?)?;
        }
        Commands::Show { id } => {
            let id = JobId::new(id);
            let job = app
                .queue()
                .get_job(&id)
                .await?
                .ok_or_else(|| QueueError::job_not_found(&id))?;
            print_json(&job)?;
        }
        Commands::List { state } => print_json(&app.queue().list_jobs(state).await?)?,
        Commands::Status => print_json(&QueueStatus::collect(&app).await?)?,
        Commands::Release { id } => print_json(&app.queue().release(&JobId::new(id)).await?)?,
        Commands::Dlq { command } => match command {
            DlqCommands::List => print_json(&app.queue().list_dlq().await?)?,
            DlqCommands::Retry { id } => {
                print_json(&app.queue().retry_dlq_job(&JobId::new(id)).await?)?
            }
        },
        Commands::Worker { command } => match command {
            WorkerCommands::Start { count } => run_workers(&app, count).await?,
            WorkerCommands::List { all } => {
                let fleet = app.fleet();
                let workers = if all {
                    fleet.list_all_workers().await?
                } else {
                    fleet.list_active_workers().await?
                };
                print_json(&workers)?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => print_json(&app.queue().get_config(&key).await?)?,
            ConfigCommands::Set { key, value } => {
                app.queue().set_config(&key, &value).await?;
                print_json(&BTreeMap::from([(key, value)]))?;
            }
            ConfigCommands::List => print_json(&app.queue().list_config().await?)?,
        },
    }
    Ok(())
}

async fn run_workers(app: &App, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let fleet = app.fleet();
    let started = fleet.start_workers(count).await;
    if let Err(e) = started {
        fleet.stop_all_workers().await;
        return Err(e.into());
    }

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown requested, waiting for in-flight jobs");
    fleet.stop_all_workers().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM; Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
