//! Lighter Whale Tracker bot
//!
//! Watches one Lighter account and posts sell alerts plus periodic volume
//! reports to a Telegram channel, with per-subscriber Pushover alerts.

mod commands;
mod config;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tracker_lighter::{
    BackoffConfig, LighterHttpClient, LighterHttpClientConfig, LighterWebSocket,
    LighterWebSocketConfig,
};
use tracker_notify::{
    BroadcastChannel, PushSender, PushoverClient, PushoverClientConfig, TelegramClient,
};
use tracker_services::{
    DispatcherConfig, IngestConfig, MonitorConfig, NotificationDispatcher, ReporterConfig,
    SubscriberStore, TradeFetcher, TradeIngestor, TradeMonitor, TradeReporter, TradeWindowStore,
    WatermarkStore, WatermarkTracker,
};

use crate::commands::CommandHandler;
use crate::config::{BotConfig, SourceMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tracker_bot=debug")),
        )
        .init();

    info!("Starting Lighter Whale Tracker");

    let config = BotConfig::from_env()?;
    let account_key = config.account_id.to_string();

    // Durable state
    info!("Initializing state stores under data/");
    let watermark_store = Arc::new(WatermarkStore::new(&config.state_db_path)?);
    let watermark = Arc::new(WatermarkTracker::new(
        Arc::clone(&watermark_store),
        account_key.clone(),
    )?);
    let window = Arc::new(TradeWindowStore::new(&config.window_db_path)?);
    let subscribers = Arc::new(SubscriberStore::new(&config.subscribers_db_path)?);

    // Notification collaborators
    let telegram = Arc::new(TelegramClient::new(
        config.telegram_bot_token.clone(),
        config.telegram_channel_id.clone(),
    ));
    let mut pushover_config = PushoverClientConfig::new(config.pushover_app_token.clone());
    pushover_config.request_timeout = config.request_timeout;
    pushover_config.max_retries = config.max_retries;
    let pushover = Arc::new(PushoverClient::new(pushover_config));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&telegram) as Arc<dyn BroadcastChannel>,
        pushover as Arc<dyn PushSender>,
        Arc::clone(&subscribers),
        DispatcherConfig {
            cooldown: config.cooldown,
            account_id: account_key.clone(),
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // Telegram command polling
    let command_handler = Arc::new(CommandHandler::new(
        Arc::clone(&telegram),
        Arc::clone(&subscribers),
        account_key.clone(),
        config.report_interval,
        config.cooldown,
    ));
    handles.push(tokio::spawn(command_handler.start(shutdown_rx.clone())));

    // Trade source + engine
    let mut stream_socket = None;
    match config.source_mode {
        SourceMode::Stream => {
            info!("Trade source: WebSocket stream");

            let ws_config = LighterWebSocketConfig {
                ws_url: config.ws_url.clone(),
                account_id: config.account_id,
                auth_token: config.auth_token.clone(),
                backoff: BackoffConfig {
                    floor: config.backoff_floor,
                    ceiling: config.backoff_ceiling,
                    factor: config.backoff_factor,
                },
                max_connection_lifetime: config.max_connection_lifetime,
            };
            let (socket, update_rx) = LighterWebSocket::new(ws_config);
            handles.push(socket.start());

            let ingestor = Arc::new(TradeIngestor::new(
                Arc::clone(&watermark),
                Arc::clone(&window),
                Arc::clone(&dispatcher),
                IngestConfig {
                    account_id: account_key.clone(),
                    retention: config.retention,
                },
            ));
            handles.push(tokio::spawn(ingestor.start(update_rx, shutdown_rx.clone())));

            // Reports come from the rolling window, independent of ingestion
            let reporter = Arc::new(TradeReporter::new(
                Arc::clone(&window),
                Arc::clone(&telegram) as Arc<dyn BroadcastChannel>,
                ReporterConfig {
                    interval: config.report_interval,
                    account_id: account_key.clone(),
                },
            ));
            handles.push(tokio::spawn(reporter.start(shutdown_rx.clone())));

            stream_socket = Some(socket);
        }
        SourceMode::Poll => {
            info!("Trade source: HTTP poll");

            let client = Arc::new(LighterHttpClient::new(LighterHttpClientConfig {
                base_url: config.api_base_url.clone(),
                account_id: config.account_id,
                poll_limit: config.poll_limit,
                request_timeout: config.request_timeout,
                max_retries: config.max_retries,
            }));

            let monitor = Arc::new(TradeMonitor::new(
                client as Arc<dyn TradeFetcher>,
                Arc::clone(&watermark),
                Arc::clone(&dispatcher),
                Arc::clone(&telegram) as Arc<dyn BroadcastChannel>,
                MonitorConfig {
                    account_id: account_key.clone(),
                    poll_interval: config.poll_interval,
                    poll_window: config.poll_interval,
                },
            ));
            handles.push(tokio::spawn(monitor.start(shutdown_rx.clone())));
        }
    }

    info!("All services started. Waiting for updates ...");

    shutdown_signal().await;
    info!("Shutdown signal received");

    // Close the stream proactively and stop accepting ticks, then wait for
    // in-flight cycles bounded by the grace period
    if let Some(socket) = &stream_socket {
        socket.stop();
    }
    let _ = shutdown_tx.send(true);

    let drain = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
        warn!(
            "Grace period ({:?}) elapsed before all tasks stopped",
            config.shutdown_grace
        );
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
