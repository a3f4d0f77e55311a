//! # Herald — Event Notification Scheduler
//!
//! Schedules chat-bot notifications to groups of registered participants
//! and tracks delivery per recipient.
//!
//! Usage:
//!   herald                          # Start dispatcher + gateway (port 3000)
//!   herald --port 8080              # Custom gateway port
//!   herald --once                   # Run a single sweep and exit
//!   herald --db ~/custom/herald.db  # Custom database path

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use herald_channels::{TelegramChannel, WebhookChannel};
use herald_core::{DeliveryChannel, HeraldConfig};
use herald_engine::{spawn_dispatcher, DispatchEngine};
use herald_gateway::AppState;
use herald_store::HeraldDb;

#[derive(Parser)]
#[command(
    name = "herald",
    version,
    about = "📣 Herald — event notification scheduler with delivery tracking"
)]
struct Cli {
    /// Config file path (default: ~/.herald/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// Gateway port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Run a single dispatch sweep and exit
    #[arg(long)]
    once: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

/// Pick the delivery channel from config: Telegram when configured and
/// enabled, else webhook, else a no-op logger channel.
fn build_channel(config: &HeraldConfig) -> Arc<dyn DeliveryChannel> {
    if let Some(tg) = &config.channel.telegram {
        if tg.enabled && !tg.bot_token.is_empty() {
            tracing::info!("✅ Delivery channel: telegram");
            return Arc::new(TelegramChannel::new(tg.clone()));
        }
    }
    if let Some(wh) = &config.channel.webhook {
        if wh.enabled && !wh.url.is_empty() {
            tracing::info!("✅ Delivery channel: webhook → {}", wh.url);
            return Arc::new(WebhookChannel::new(wh.clone()));
        }
    }
    tracing::warn!("⚠️ No delivery channel configured — sends will be logged and dropped");
    Arc::new(LogChannel)
}

/// Fallback channel for unconfigured installs: logs instead of sending.
struct LogChannel;

#[async_trait::async_trait]
impl DeliveryChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, handle: &str, text: &str) -> herald_core::Result<()> {
        tracing::info!("📣 [dry-run] to {}: {}", handle, text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "herald=debug,tower_http=debug"
    } else {
        "herald=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => HeraldConfig::load_from(std::path::Path::new(&expand_path(path)))
            .map_err(|e| anyhow::anyhow!("{e}"))?,
        None => HeraldConfig::load().unwrap_or_default(),
    };
    if let Some(db) = &cli.db {
        config.storage.db_path = db.clone();
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let db_path = expand_path(&config.storage.db_path);
    let db = Arc::new(HeraldDb::open(std::path::Path::new(&db_path))?);
    tracing::info!("💾 Database: {}", db_path);

    let channel = build_channel(&config);
    let engine = Arc::new(DispatchEngine::new(db.clone(), channel, &config.dispatch));

    if cli.once {
        let processed = engine.sweep().await?;
        tracing::info!("✅ Sweep complete: {} notification(s) dispatched", processed);
        return Ok(());
    }

    spawn_dispatcher(engine.clone(), config.dispatch.sweep_interval_secs);

    let state = AppState {
        db,
        engine,
        start_time: std::time::Instant::now(),
    };
    herald_gateway::start(&config.gateway, state).await
}
