//! Blipscan - Solana escrow program indexer.
//!
//! # Usage
//!
//! ```bash
//! # Start with default config
//! blipscan
//!
//! # Start with environment overrides
//! DATABASE_URL=postgres://localhost/blipscan SOLANA_RPC_URL=https://api.devnet.solana.com blipscan
//! ```

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};

use blipscan_core::error::IndexerError;
use blipscan_core::metrics::init_metrics;
use blipscan_core::models::{Address, TransitionGuard};
use blipscan_core::services::{IndexerConfig, IndexerService};
use blipscan_solana::{CommitmentLevel, SolanaClientConfig, SolanaRpcClient};
use blipscan_storage::{Database, DatabaseConfig, PgRepositories};

/// Blipscan CLI - escrow program indexer.
#[derive(Parser, Debug)]
#[command(name = "blipscan")]
#[command(about = "Blipscan - Solana escrow program indexer")]
#[command(version)]
struct Cli {
    /// Solana JSON-RPC URL.
    #[arg(
        long,
        env = "SOLANA_RPC_URL",
        default_value = "https://api.devnet.solana.com"
    )]
    rpc_url: String,

    /// PostgreSQL database URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost/blipscan"
    )]
    database_url: String,

    /// Escrow program to index (base58).
    #[arg(
        long,
        env = "PROGRAM_ID",
        default_value = "HZ9ZSXtebTKYGRR7ZNsetroAT7Kh8ymKExcf5FF9dLNq",
        value_parser = parse_address
    )]
    program_id: Address,

    /// Commitment used for chain reads: confirmed or finalized.
    #[arg(long, env = "SOLANA_COMMITMENT", default_value = "confirmed", value_parser = parse_commitment)]
    commitment: CommitmentLevel,

    /// Time between two poll cycles, in milliseconds.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "5000")]
    poll_interval_ms: u64,

    /// Signatures requested per listing call and projected per chunk (1-1000).
    #[arg(long, env = "PAGE_SIZE", default_value = "50")]
    page_size: usize,

    /// Listing calls on the first run, before any cursor exists.
    #[arg(long, env = "MAX_PAGES", default_value = "20")]
    max_pages: usize,

    /// Timeout of every chain request, in seconds.
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value = "30")]
    rpc_timeout_secs: u64,

    /// Account probes in flight per transaction.
    #[arg(long, env = "PROBE_CONCURRENCY", default_value = "4")]
    probe_concurrency: usize,

    /// Account keys probed per transaction.
    #[arg(long, env = "MAX_ACCOUNT_PROBES", default_value = "32")]
    max_account_probes: usize,

    /// Transactions fetched and decoded concurrently within a batch.
    #[arg(long, env = "FETCH_CONCURRENCY", default_value = "4")]
    fetch_concurrency: usize,

    /// Transition policy for existing deals: strict or permissive.
    #[arg(long, env = "TRANSITION_GUARD", default_value = "strict")]
    transition_guard: TransitionGuard,

    /// Failed poll cycles in a row before giving up (0 = never).
    #[arg(long, env = "MAX_CONSECUTIVE_FAILURES", default_value = "20")]
    max_consecutive_failures: u32,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Run database migrations and exit.
    #[arg(long)]
    migrate_only: bool,

    /// Purge all indexed data from the database and exit.
    ///
    /// This will delete all deals and events and reset the indexer cursor.
    /// Schema/migrations are preserved.
    #[arg(long)]
    purge: bool,

    /// Skip confirmation prompt for destructive operations (like --purge).
    #[arg(long, short = 'y')]
    yes: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            program_id: self.program_id,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            page_size: self.page_size,
            max_pages: self.max_pages,
            fetch_concurrency: self.fetch_concurrency,
            probe_concurrency: self.probe_concurrency,
            max_account_probes: self.max_account_probes,
            rpc_timeout: Duration::from_secs(self.rpc_timeout_secs),
            transition_guard: self.transition_guard,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse::<Address>().map_err(|e| e.to_string())
}

/// Parse commitment level from string.
fn parse_commitment(s: &str) -> Result<CommitmentLevel, String> {
    match s.to_lowercase().as_str() {
        "confirmed" => Ok(CommitmentLevel::Confirmed),
        "finalized" => Ok(CommitmentLevel::Finalized),
        _ => Err(format!(
            "Invalid commitment '{}'. Use 'confirmed' or 'finalized'.",
            s
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Static settings are checked before any connection is made.
    let indexer_config = cli.indexer_config();
    indexer_config
        .validate()
        .context("Invalid indexer configuration")?;

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
        Ok(metrics_addr) => {
            match PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                Ok(()) => {
                    init_metrics();
                    true
                }
                Err(e) => {
                    warn!("⚠️  Failed to start metrics exporter: {}. Continuing without metrics.", e);
                    false
                }
            }
        }
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Blipscan Indexer");
    debug!(rpc_url = %mask_password(&cli.rpc_url), "Solana endpoint");
    debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");
    info!(
        program = %cli.program_id,
        guard = ?cli.transition_guard,
        poll_ms = cli.poll_interval_ms,
        "⚙️  Configuration loaded"
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ DATABASE
    // ─────────────────────────────────────────────────────────────────────────
    info!("🗄️  Connecting to database...");
    let db = Database::connect(&DatabaseConfig::for_indexer(&cli.database_url))
        .await
        .context("Failed to connect to database")?;

    db.migrate().await.context("Failed to run migrations")?;
    if !db.is_healthy().await {
        bail!("Database health check failed after migrations");
    }
    info!("🗄️  Database ready (migrations applied)");

    if cli.migrate_only {
        info!("🛑 --migrate-only flag set, exiting");
        return Ok(());
    }

    if cli.purge {
        return handle_purge(&db, cli.yes).await;
    }

    let db = Arc::new(db);
    let repositories = Arc::new(PgRepositories::new(db.clone()));

    // ─────────────────────────────────────────────────────────────────────────
    // 📡 SOLANA CONNECTION
    // ─────────────────────────────────────────────────────────────────────────
    info!("📡 Connecting to Solana RPC...");
    let solana_client = SolanaRpcClient::connect(SolanaClientConfig {
        rpc_url: cli.rpc_url.clone(),
        timeout: Duration::from_secs(cli.rpc_timeout_secs),
        commitment: cli.commitment,
    })
    .context("Failed to create Solana RPC client")?;
    let solana_client = Arc::new(solana_client);

    let indexer = IndexerService::new(indexer_config, solana_client, repositories);

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ SERVICES START
    // ─────────────────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut fatal_rx = shutdown_tx.subscribe();

    let indexer_shutdown_tx = shutdown_tx.clone();
    let mut indexer_handle = tokio::spawn(
        async move {
            let result = indexer.run(shutdown_rx).await;
            match &result {
                Err(IndexerError::ShutdownRequested) | Ok(()) => {}
                Err(e) => {
                    error!(error = %e, "❌ Indexer stopped");
                    // Unrecoverable - take the whole process down
                    let _ = indexer_shutdown_tx.send(true);
                }
            }
            result
        }
        .instrument(info_span!("indexer")),
    );

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!("✅ Blipscan ready");
    if metrics_enabled {
        info!(
            "   📊 Metrics:  http://localhost:{}/metrics",
            cli.metrics_port
        );
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = fatal_rx.wait_for(|stop| *stop) => {}
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);

    let outcome = match tokio::time::timeout(Duration::from_secs(30), &mut indexer_handle).await {
        Ok(Ok(result)) => {
            debug!("Indexer stopped");
            result
        }
        Ok(Err(e)) => {
            error!(error = %e, "❌ Indexer task panicked");
            Ok(())
        }
        Err(_) => {
            warn!("⚠️  Indexer shutdown timed out");
            indexer_handle.abort();
            Ok(())
        }
    };

    if matches!(&outcome, Err(e) if !matches!(e, IndexerError::ShutdownRequested)) {
        // Tells a store outage apart from an RPC one.
        warn!(database_healthy = db.is_healthy().await, "⚠️  Indexer failed");
    }

    db.close().await;
    info!("🛑 Shutdown complete");

    match outcome {
        Ok(()) | Err(IndexerError::ShutdownRequested) => Ok(()),
        Err(e) => bail!("indexer failed: {e}"),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in a connection URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "❌ Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "❌ Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Handle the --purge command.
async fn handle_purge(db: &Database, skip_confirmation: bool) -> Result<()> {
    warn!("⚠️  PURGE MODE: This will delete ALL indexed data!");
    warn!("   - All deals and their events");
    warn!("   - The indexer cursor will be reset");
    warn!("   - Schema and migrations will be preserved");

    if !skip_confirmation {
        print!("\n🔴 Are you sure you want to purge all data? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            info!("❌ Purge cancelled");
            return Ok(());
        }
    }

    info!("🗑️  Purging database...");
    let stats = db.purge().await.context("Failed to purge database")?;

    info!("✅ Database purged successfully");
    info!("   📦 Deals removed: {}", stats.deals_removed);
    info!("   📣 Events removed: {}", stats.events_removed);
    info!("   The indexer will start from the newest transactions on next run");

    Ok(())
}
