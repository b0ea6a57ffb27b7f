//! # CLI: Subcommand Execution
//!
//! `run_serve` wires the store, marketplace and router together and runs the
//! background expiry sweep. The operator commands open a PostgreSQL-backed
//! [`Marketplace`] and print a short table to stderr.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use taskmarket::api::{self, AppState};
use taskmarket::config::{Config, MarketConfig};
use taskmarket::db::Database;
use taskmarket::model::{Money, NewTask, TaskKind, TaskStatus};
use taskmarket::quiz::QuestionBank;
use taskmarket::store::memory::MemoryStore;
use taskmarket::store::MarketStore;
use taskmarket::withdrawals::Settlement;
use taskmarket::Marketplace;
use tracing::{info, warn};
use uuid::Uuid;

pub struct TaskSpec<'a> {
    pub title: &'a str,
    pub kind: &'a str,
    pub payout: &'a str,
    pub slots: i32,
    pub description: Option<&'a str>,
    pub expires_in_hours: Option<i64>,
}

async fn connect(config: &Config) -> Result<Database> {
    let url = config.database.url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("DATABASE_URL is required (set via --database-url, env or config)")
    })?;
    Database::connect(url, config.database.max_connections).await
}

fn load_questions(market: &MarketConfig) -> Result<QuestionBank> {
    match &market.question_bank {
        Some(path) => QuestionBank::load(path),
        None => Ok(QuestionBank::builtin()),
    }
}

async fn open_market(config: &Config) -> Result<Marketplace> {
    let database = connect(config).await?;
    Ok(Marketplace::new(
        Arc::new(database),
        config.market.clone(),
        load_questions(&config.market)?,
    ))
}

// ── Server ──────────────────────────────────────────────────────

pub async fn run_serve(config: Config, in_memory: bool) -> Result<()> {
    let store: Arc<dyn MarketStore> = if in_memory {
        warn!("using in-memory store; state is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        let database = connect(&config).await?;
        database.migrate().await.context("applying migrations")?;
        Arc::new(database)
    };
    let questions = load_questions(&config.market)?;
    info!(questions = questions.len(), policy = ?config.market.approval_policy, "marketplace configured");
    if config.auth.jwt_secret.is_none() {
        warn!("no JWT secret configured; bearer tokens are decoded without verification");
    }

    let market = Marketplace::new(store, config.market.clone(), questions);
    let state = AppState::new(market, config.auth.clone());
    spawn_sweep_loop(Arc::clone(&state), config.market.sweep_interval_secs);

    let app = api::build_router(Arc::clone(&state), &config.server);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(port = config.server.port, "taskmarket running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("taskmarket shut down gracefully");
    Ok(())
}

/// Expiry sweep plus gauge refresh on a fixed interval. A zero interval
/// leaves sweeping to `POST /api/admin/sweep` and `taskmarket sweep`.
fn spawn_sweep_loop(state: Arc<AppState>, interval_secs: u64) {
    if interval_secs == 0 {
        info!("background sweep disabled");
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = state.market.sweep(Utc::now()).await {
                warn!(error = %e, "sweep: failed");
            }
            if let Err(e) = state.market.refresh_gauges().await {
                warn!(error = %e, "sweep: gauge refresh failed");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}

// ── Operator commands ───────────────────────────────────────────

pub async fn run_migrate(config: &Config) -> Result<()> {
    let database = connect(config).await?;
    database.migrate().await?;
    eprintln!("Migrations applied");
    Ok(())
}

pub async fn run_task_create(config: &Config, args: TaskSpec<'_>) -> Result<()> {
    let kind: TaskKind = args.kind.parse()?;
    let payout: Money = args.payout.parse()?;
    let new_task = NewTask {
        title: args.title.to_string(),
        description: args.description.map(str::to_string),
        kind,
        payout,
        total_slots: args.slots,
        expires_at: args
            .expires_in_hours
            .map(|h| Utc::now() + chrono::Duration::hours(h)),
        content_url: None,
        affiliate_link: None,
        client_name: None,
    };
    let market = open_market(config).await?;
    let task = market.create_task(new_task, Some("cli".into())).await?;
    eprintln!("Task '{}' created (id={})", task.title, task.id);
    eprintln!("  Kind:    {}", task.kind);
    eprintln!("  Payout:  {}", task.payout);
    eprintln!("  Slots:   {}", task.total_slots);
    if let Some(expires_at) = task.expires_at {
        eprintln!("  Expires: {}", expires_at.to_rfc3339());
    }
    Ok(())
}

pub async fn run_task_list(config: &Config, status: Option<&str>, limit: i64) -> Result<()> {
    let status = status.map(str::parse::<TaskStatus>).transpose()?;
    let market = open_market(config).await?;
    let tasks = market.list_tasks(status, limit).await?;
    if tasks.is_empty() {
        eprintln!("No tasks found");
        return Ok(());
    }
    eprintln!(
        "{:<36}  {:<8} {:<10} {:>9} {:>11}  {}",
        "ID", "STATUS", "KIND", "PAYOUT", "SLOTS", "TITLE"
    );
    eprintln!("{}", "-".repeat(100));
    for task in &tasks {
        let slots = format!(
            "{}+{}/{}",
            task.completed_slots, task.reserved_slots, task.total_slots
        );
        eprintln!(
            "{:<36}  {:<8} {:<10} {:>9} {:>11}  {}",
            task.id, task.status, task.kind, task.payout, slots, task.title
        );
    }
    Ok(())
}

pub async fn run_task_status(config: &Config, id: Uuid, status: &str) -> Result<()> {
    let status: TaskStatus = status.parse()?;
    let market = open_market(config).await?;
    let task = market.set_task_status(id, status).await?;
    eprintln!("Task {} is now {}", task.id, task.status);
    Ok(())
}

pub async fn run_sweep(config: &Config) -> Result<()> {
    let market = open_market(config).await?;
    let report = market.sweep(Utc::now()).await?;
    eprintln!(
        "Sweep closed {} task(s), abandoned {} claim(s)",
        report.tasks_closed.len(),
        report.claims_abandoned.len()
    );
    Ok(())
}

pub async fn run_withdrawals_pending(config: &Config, limit: i64) -> Result<()> {
    let market = open_market(config).await?;
    let pending = market.pending_withdrawals(limit).await?;
    if pending.is_empty() {
        eprintln!("No pending withdrawals");
        return Ok(());
    }
    eprintln!(
        "{:<36}  {:<36}  {:>10}  {}",
        "ID", "USER", "AMOUNT", "REQUESTED"
    );
    eprintln!("{}", "-".repeat(110));
    for tx in &pending {
        eprintln!(
            "{:<36}  {:<36}  {:>10}  {}",
            tx.id,
            tx.user_id,
            tx.amount,
            tx.created_at.to_rfc3339()
        );
    }
    Ok(())
}

pub async fn run_withdrawal_settle(config: &Config, id: Uuid, failed: Option<String>) -> Result<()> {
    let settlement = match failed {
        Some(reason) => Settlement::Failed { reason },
        None => Settlement::Completed,
    };
    let market = open_market(config).await?;
    let tx = market.settle_withdrawal(id, &settlement).await?;
    eprintln!("Withdrawal {} marked {}", tx.id, tx.status);
    Ok(())
}

pub async fn run_reconcile(config: &Config, user_id: Uuid) -> Result<()> {
    let market = open_market(config).await?;
    let report = market.reconcile(user_id).await?;
    eprintln!("Reconciliation for {}", report.user_id);
    eprintln!(
        "  Available:  {} (expected {})",
        report.available_balance, report.expected_available
    );
    eprintln!(
        "  Earnings:   {} (expected {})",
        report.total_earnings, report.expected_total_earnings
    );
    eprintln!("  Transactions: {}", report.transaction_count);
    if !report.balanced {
        anyhow::bail!("account {} does not reconcile", user_id);
    }
    eprintln!("  Balanced");
    Ok(())
}

pub fn run_check_questions(file: &Path) -> Result<()> {
    let bank = QuestionBank::load(file)?;
    eprintln!("{}: {} question(s) OK", file.display(), bank.len());
    Ok(())
}
