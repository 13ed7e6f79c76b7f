//! Signal Runner - single-symbol futures trading bot
//!
//! Wiring only:
//! 1. Loads config and credentials
//! 2. Builds the exchange session, state store, journal and operator bot
//! 3. Runs the decision loop next to the Telegram command loop

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use signal_runner::telegram::StatusInfo;
use signal_runner::{BotConfig, BotRunner, BybitClient, StateStore, TelegramChannel, TradeJournal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let config = BotConfig::load(&config_path)?;
    info!(
        "Starting signal runner: symbol={} interval={}m testnet={}",
        config.symbol, config.interval, config.testnet
    );

    let api_key = std::env::var("BYBIT_API_KEY")
        .map_err(|_| anyhow::anyhow!("BYBIT_API_KEY environment variable required"))?;
    let api_secret = std::env::var("BYBIT_API_SECRET")
        .map_err(|_| anyhow::anyhow!("BYBIT_API_SECRET environment variable required"))?;

    let exchange = BybitClient::new(config.testnet, api_key, api_secret)?;
    exchange.set_leverage(&config.symbol, config.leverage).await;

    let store = StateStore::load(&config.state_file)?;
    let journal = Arc::new(TradeJournal::new(&config.journal_file));

    let telegram = TelegramChannel::from_env()?;
    let status = StatusInfo {
        symbol: config.symbol.clone(),
        interval: config.interval.clone(),
        testnet: config.testnet,
    };
    let command_loop = telegram.clone().run_command_loop(journal.clone(), status);

    let runner = BotRunner::new(exchange, telegram, store, journal, config);

    tokio::select! {
        result = runner.run() => result,
        _ = command_loop => Ok(()),
    }
}
