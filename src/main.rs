mod config;
mod mirror;
mod platform;

use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::types::ChatId;
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::mirror::topics::TopicMap;
use crate::mirror::MirrorEngine;
use crate::platform::telegram::{self, TelegramChat};
use crate::platform::ChatService;

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostic log mirrored to stdout and an append-only file
    let file_appender = tracing_appender::rolling::never(".", "mirror-bot.log");
    let (log_file, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mirror_bot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .init();

    let config = Config::load().context("Failed to load configuration")?;
    let topics = TopicMap::new(config::TOPIC_TABLE).context("Invalid topic table")?;

    info!("Starting mirror bot");
    info!("  Mapped topics: {}", topics.len());
    info!("  Sweep interval: {}s", config.pacing.sweep_interval_secs);

    let source_chat = ChatId(config.source_chat);
    let target_chat = ChatId(config.target_chat);

    let bot = Bot::new(&config.bot_token);
    let chat = Arc::new(TelegramChat::new(bot.clone(), source_chat, target_chat));

    let source_title = chat
        .chat_title(source_chat)
        .await
        .context("Failed to resolve source chat")?;
    let target_title = chat
        .chat_title(target_chat)
        .await
        .context("Failed to resolve target chat")?;
    info!("  Source chat: {source_title}");
    info!("  Target chat: {target_title}");

    let service: Arc<dyn ChatService> = chat.clone();
    let engine = Arc::new(MirrorEngine::new(service, topics, config.pacing.clone()));

    engine.init_cursors().await;

    {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_sweeps().await });
    }

    telegram::run_dispatcher(bot, source_chat, chat, engine).await;

    info!("Shutting down");
    Ok(())
}
