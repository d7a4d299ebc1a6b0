mod config;
mod llm;
mod platform;
mod responder;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::responder::Responder;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Explicit path from the command line, else `config.toml` if it exists.
fn config_path() -> Option<PathBuf> {
    match std::env::args().nth(1) {
        Some(arg) => Some(PathBuf::from(arg)),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            default.exists().then_some(default)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Existing environment variables take precedence over .env
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to read .env file: {}", e),
    }

    let config_path = config_path();
    match &config_path {
        Some(path) => info!("Loading configuration from: {}", path.display()),
        None => info!("Loading configuration from environment"),
    }
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!(
        "  AI provider: {} (model: {})",
        config.llm.provider.display_name(),
        config.llm.model
    );
    if config.telegram.allowed_user_ids.is_empty() {
        info!("  Allowed users: everyone");
    } else {
        info!(
            "  Allowed users: {}",
            config.telegram.allowed_user_ids.len()
        );
    }

    let bot = platform::telegram::build_bot(&config.telegram)?;
    let responder = Arc::new(Responder::new(llm::build_provider(&config.llm)));

    info!("Bot is starting...");
    platform::telegram::run(bot, responder, config.telegram.allowed_user_ids).await?;

    Ok(())
}
