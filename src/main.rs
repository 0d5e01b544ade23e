mod config;
mod dispatch;
mod error;
mod platform;
mod remind;
mod scheduler;
mod server;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dispatch::{DispatchSettings, Dispatcher};
use crate::platform::wechat::WechatClient;
use crate::remind::parser::RuleParser;
use crate::scheduler::Scheduler;
use crate::server::AppState;
use crate::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,remindbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  App id: {}", config.wechat.app_id);
    info!("  Database: {}", config.store.database_path.display());
    info!("  UTC offset: {:+} hours", config.general.utc_offset_hours);
    info!("  Site URL: {}", config.server.site_url);

    let store = SqliteStore::open(&config.store.database_path)?;
    let parser = RuleParser::new(config.timezone()).context("Failed to build reminder parser")?;
    let client = Arc::new(WechatClient::new(config.wechat.clone()));

    let dispatcher = Dispatcher::new(
        Arc::new(store.clone()),
        Arc::new(parser),
        client.clone(),
        client,
        DispatchSettings::from_config(&config),
    );

    // Background jobs
    let scheduler = Scheduler::new().await?;
    scheduler::tasks::register_builtin_tasks(&scheduler, store).await?;
    scheduler.start().await?;

    info!("Bot is starting...");
    let state = AppState::new(Arc::new(dispatcher), &config.wechat.token);
    server::run(&config.server, state).await?;

    Ok(())
}
