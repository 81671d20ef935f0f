use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use beta_bot::beta::store::spawn_eviction_task;
use beta_bot::beta::{ApplicationStore, FlowController, InMemoryApplicationStore};
use beta_bot::bot::BetaBot;
use beta_bot::channels::{ChannelManager, CliChannel, TelegramChannel};
use beta_bot::config::BotConfig;
use beta_bot::error::Result;
use beta_bot::store::{ApplicationSink, Database, LibSqlBackend};

/// Install the tracing subscriber. Logs go to stderr (stdout belongs to the
/// CLI channel) and, when `log_dir` is set, to a daily-rolling file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "beta-bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("🤖 Beta Bot v{}", env!("CARGO_PKG_VERSION"));

    run(config).await.context("Beta bot stopped")?;
    Ok(())
}

async fn run(mut config: BotConfig) -> Result<()> {
    // ── Database ─────────────────────────────────────────────────────────
    let backend = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    let db: Arc<dyn Database> = backend.clone();
    let sink: Arc<dyn ApplicationSink> = backend;
    eprintln!("   Database: {}", config.db_path.display());

    // ── Sign-up flow ─────────────────────────────────────────────────────
    let store: Arc<dyn ApplicationStore> =
        Arc::new(InMemoryApplicationStore::with_shards(config.store_shards));
    match config.idle_evict {
        Some(max_idle) => {
            let _eviction_handle = spawn_eviction_task(Arc::clone(&store), max_idle);
            eprintln!("   Idle eviction: after {}s", max_idle.as_secs());
        }
        None => eprintln!("   Idle eviction: disabled"),
    }
    let flow = FlowController::new(store, sink);

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();

    if let Some(token) = config.telegram_token.take() {
        eprintln!(
            "   Telegram: enabled (allowed: {})",
            if config.allows_everyone() {
                "everyone".to_string()
            } else {
                config.allowed_users.join(", ")
            }
        );
        channels.add(Box::new(TelegramChannel::new(
            token,
            config.allowed_users.clone(),
        )));
    }

    if config.cli_enabled {
        eprintln!("   CLI: enabled (type /beta to start, !value to tap a button)");
        channels.add(Box::new(CliChannel::new()));
    }

    eprintln!("   Channels: {}\n", channels.names().join(", "));

    for (name, e) in channels.health_check_all().await {
        tracing::warn!(channel = %name, error = %e, "Health check failed; starting anyway");
    }

    BetaBot::new(flow, db, channels, config.lane_idle).run().await
}
