#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use courier_bot::bot::Router;
use courier_bot::channels::{Channel, TelegramChannel};
use courier_bot::config::Config;
use courier_bot::logging::init_logging;
use courier_bot::provider::OpenAIProvider;
use courier_bot::session::{ChatManager, TokenCounter};

/// courier-bot — Telegram relay for OpenAI chat models.
#[derive(Parser, Debug)]
#[command(name = "courier-bot")]
#[command(version = "0.1.0")]
#[command(about = "Telegram relay for OpenAI chat models with per-user sessions and cost accounting.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the bot
    Run {
        /// Config file path (default: ~/.courier/config.toml)
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Print the model catalog with pricing
    Models {
        /// Config file path (default: ~/.courier/config.toml)
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config.as_deref()).await,
        Commands::Models { config } => models(config.as_deref()),
    }
}

async fn run(config_path: Option<&str>) -> Result<()> {
    let config = Config::load(config_path).context("loading configuration")?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );
    tracing::info!("courier-bot v{}", env!("CARGO_PKG_VERSION"));

    let counter = TokenCounter::new().context("building tokenizers")?;
    let provider = Arc::new(OpenAIProvider::with_base_url(
        config.openai.api_key.clone(),
        config.openai.base_url.clone(),
    ));
    let manager = Arc::new(ChatManager::new(
        provider,
        config.catalog(),
        counter,
        config.chat_options(),
    )?);

    let (callback_tx, mut callback_rx) = mpsc::channel(32);
    let channel = Arc::new(
        TelegramChannel::new(
            config.telegram.bot_token.clone(),
            config.telegram.allowed_users.clone(),
        )
        .with_callback_sender(callback_tx),
    );

    if !channel.health_check().await {
        bail!("Telegram getMe failed — check telegram.bot_token");
    }

    let router = Arc::new(Router::new(
        channel.clone(),
        manager,
        config.currency.symbol.clone(),
    ));

    let (msg_tx, mut msg_rx) = mpsc::channel(100);
    let listener = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.listen(msg_tx).await })
    };

    // Button clicks arrive on their own stream; handle them off-loop so
    // a slow edit never blocks message dispatch.
    let callback_router = router.clone();
    tokio::spawn(async move {
        while let Some(query) = callback_rx.recv().await {
            let router = callback_router.clone();
            tokio::spawn(async move { router.handle_callback(query).await });
        }
    });

    tracing::info!("Bot is up");

    loop {
        tokio::select! {
            maybe_msg = msg_rx.recv() => {
                let Some(msg) = maybe_msg else { break };
                // Each message gets its own task; the manager's
                // per-user lock serializes same-user traffic.
                let router = router.clone();
                tokio::spawn(async move { router.handle_message(msg).await });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    listener.abort();
    Ok(())
}

fn models(config_path: Option<&str>) -> Result<()> {
    // The catalog needs no secrets.
    let config = Config::load_unvalidated(config_path)?;

    println!("Available models (USD per 1M tokens):");
    for model in config.catalog().entries() {
        let marker = if model.key == config.chat.default_model {
            " (default)"
        } else {
            ""
        };
        println!(
            "  {:<14} in ${:<6.2} out ${:<6.2}{marker}",
            model.key, model.input_price, model.output_price
        );
    }
    Ok(())
}
