//! # Main: CLI Entry Point
//!
//! `serve` runs the HTTP API with the background expiry sweep. The remaining
//! subcommands are operator tools that talk to PostgreSQL directly.
//!
//! ## Global Options
//!
//! - `--config` / `TASKMARKET_CONFIG`: TOML configuration file.
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection URL.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "taskmarket",
    version,
    about = "Task marketplace coordination engine"
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "TASKMARKET_CONFIG")]
    config: Option<PathBuf>,

    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the expiry sweep loop
    Serve {
        /// Listen port (overrides config and PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Keep all state in memory instead of PostgreSQL
        #[arg(long)]
        in_memory: bool,
        /// Directory of static frontend files to serve at /
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },
    /// Apply database migrations
    Migrate,
    /// Manage the task catalog
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Close expired tasks and abandon their open claims
    Sweep,
    /// Inspect and settle withdrawals
    Withdrawals {
        #[command(subcommand)]
        action: WithdrawalAction,
    },
    /// Check a user's balances against their transaction history
    Reconcile {
        /// User id
        #[arg(long)]
        user: Uuid,
    },
    /// Validate a quiz question bank file
    CheckQuestions {
        /// Path to the TOML question bank
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Publish a new task
    Create {
        #[arg(long)]
        title: String,
        /// survey, video, app_test, review or other
        #[arg(long, default_value = "other")]
        kind: String,
        /// Payout per completed slot, e.g. 2.50
        #[arg(long)]
        payout: String,
        /// Number of slots
        #[arg(long)]
        slots: i32,
        #[arg(long)]
        description: Option<String>,
        /// Expire the task this many hours from now
        #[arg(long)]
        expires_in_hours: Option<i64>,
    },
    /// List tasks
    List {
        /// Filter by status (active, paused, closed)
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Change a task's status
    Status {
        id: Uuid,
        /// active, paused or closed
        status: String,
    },
}

#[derive(Subcommand)]
enum WithdrawalAction {
    /// List pending withdrawals, oldest first
    Pending {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Report a settlement outcome
    Settle {
        id: Uuid,
        /// Mark the payout as failed and refund the balance
        #[arg(long)]
        failed: Option<String>,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shipping, human-readable otherwise
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    if let Commands::CheckQuestions { file } = &cli.command {
        return cli::run_check_questions(file);
    }

    let mut config = taskmarket::config::Config::load(cli.config.as_deref())?;
    if let Some(url) = &cli.database_url {
        config.database.url = Some(url.clone());
    }

    let rt = tokio::runtime::Runtime::new()?;
    match &cli.command {
        Commands::Serve {
            port,
            in_memory,
            static_dir,
        } => {
            if let Some(port) = port {
                config.server.port = *port;
            }
            if static_dir.is_some() {
                config.server.static_dir = static_dir.clone();
            }
            rt.block_on(cli::run_serve(config, *in_memory))
        }
        Commands::Migrate => rt.block_on(cli::run_migrate(&config)),
        Commands::Task { action } => match action {
            TaskAction::Create {
                title,
                kind,
                payout,
                slots,
                description,
                expires_in_hours,
            } => rt.block_on(cli::run_task_create(
                &config,
                cli::TaskSpec {
                    title,
                    kind,
                    payout,
                    slots: *slots,
                    description: description.as_deref(),
                    expires_in_hours: *expires_in_hours,
                },
            )),
            TaskAction::List { status, limit } => {
                rt.block_on(cli::run_task_list(&config, status.as_deref(), *limit))
            }
            TaskAction::Status { id, status } => {
                rt.block_on(cli::run_task_status(&config, *id, status))
            }
        },
        Commands::Sweep => rt.block_on(cli::run_sweep(&config)),
        Commands::Withdrawals { action } => match action {
            WithdrawalAction::Pending { limit } => {
                rt.block_on(cli::run_withdrawals_pending(&config, *limit))
            }
            WithdrawalAction::Settle { id, failed } => {
                rt.block_on(cli::run_withdrawal_settle(&config, *id, failed.clone()))
            }
        },
        Commands::Reconcile { user } => rt.block_on(cli::run_reconcile(&config, *user)),
        Commands::CheckQuestions { .. } => Ok(()),
    }
}
