//! Lighter WebSocket client for the tracked account's trade stream
//!
//! Holds one long-lived connection to the Lighter stream, answers
//! application-level pings in kind, and recycles the connection shortly
//! before the server's own maximum connection lifetime so the cutoff never
//! races us. Connection errors reconnect with exponential backoff; any clean
//! cycle resets the backoff to its floor.

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use tracker_core::NormalizedTrade;

use crate::types::{StreamCommand, StreamMessage};

/// Default Lighter stream URL
pub const LIGHTER_WS_URL: &str = "wss://mainnet.zklighter.elliot.ai/stream";

/// The server silently drops every connection after this long
const DEFAULT_MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// Recycle the connection at this fraction of the maximum lifetime
const RECYCLE_FRACTION: f64 = 0.98;

/// Reconnect backoff parameters
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub floor: Duration,
    pub ceiling: Duration,
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(2),
            ceiling: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl BackoffConfig {
    fn next(&self, current: Duration) -> Duration {
        current.mul_f64(self.factor).min(self.ceiling)
    }
}

/// Configuration for LighterWebSocket
#[derive(Clone)]
pub struct LighterWebSocketConfig {
    pub ws_url: String,
    /// The tracked account
    pub account_id: i64,
    pub auth_token: String,
    pub backoff: BackoffConfig,
    pub max_connection_lifetime: Duration,
}

impl LighterWebSocketConfig {
    pub fn new(account_id: i64, auth_token: String) -> Self {
        Self {
            ws_url: LIGHTER_WS_URL.to_string(),
            account_id,
            auth_token,
            backoff: BackoffConfig::default(),
            max_connection_lifetime: DEFAULT_MAX_CONNECTION_LIFETIME,
        }
    }
}

impl std::fmt::Debug for LighterWebSocketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LighterWebSocketConfig")
            .field("ws_url", &self.ws_url)
            .field("account_id", &self.account_id)
            .field("auth_token", &"[REDACTED]")
            .field("backoff", &self.backoff)
            .field("max_connection_lifetime", &self.max_connection_lifetime)
            .finish()
    }
}

/// Update from the Lighter stream
#[derive(Debug, Clone)]
pub enum LighterUpdate {
    /// A batch of normalized trades for the tracked account
    TradeBatch { trades: Vec<NormalizedTrade> },
    /// Connection state change
    ConnectionState {
        connected: bool,
        error: Option<String>,
    },
}

/// Errors from the stream connection
#[derive(Debug, thiserror::Error)]
pub enum LighterWsError {
    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

/// How a single connection cycle ended
enum ConnectionEnd {
    /// Proactive recycle before the server-side lifetime cutoff
    Recycle,
    /// Server closed the connection or the stream ended
    ServerClosed,
    /// Shutdown was requested
    Shutdown,
}

/// Lighter WebSocket client
pub struct LighterWebSocket {
    config: LighterWebSocketConfig,
    /// Channel to send updates to the ingestor
    update_tx: broadcast::Sender<LighterUpdate>,
    shutdown_tx: watch::Sender<bool>,
}

impl LighterWebSocket {
    /// Create a new Lighter WebSocket client
    pub fn new(config: LighterWebSocketConfig) -> (Self, broadcast::Receiver<LighterUpdate>) {
        let (update_tx, update_rx) = broadcast::channel(1024);
        let (shutdown_tx, _) = watch::channel(false);

        (
            Self {
                config,
                update_tx,
                shutdown_tx,
            },
            update_rx,
        )
    }

    /// Start the background connection task
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let config = self.config.clone();
        let update_tx = self.update_tx.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            Self::connection_loop(config, update_tx, shutdown_rx).await;
        })
    }

    /// Request a graceful stop; the outstanding receive is cancelled and the
    /// connection closed proactively
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get an additional update receiver
    pub fn subscribe_updates(&self) -> broadcast::Receiver<LighterUpdate> {
        self.update_tx.subscribe()
    }

    /// Main connection loop with reconnection logic
    async fn connection_loop(
        config: LighterWebSocketConfig,
        update_tx: broadcast::Sender<LighterUpdate>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut backoff = config.backoff.floor;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match Self::run_connection(&config, &update_tx, &mut shutdown_rx).await {
                Ok(ConnectionEnd::Shutdown) => {
                    let _ = update_tx.send(LighterUpdate::ConnectionState {
                        connected: false,
                        error: None,
                    });
                    break;
                }
                Ok(ConnectionEnd::Recycle) | Ok(ConnectionEnd::ServerClosed) => {
                    let _ = update_tx.send(LighterUpdate::ConnectionState {
                        connected: false,
                        error: None,
                    });
                    // Clean cycle: reconnect immediately, backoff back to floor
                    backoff = config.backoff.floor;
                }
                Err(e) => {
                    let _ = update_tx.send(LighterUpdate::ConnectionState {
                        connected: false,
                        error: Some(e.to_string()),
                    });
                    warn!(
                        "[Lighter WS] Connection error: {} - reconnecting in {:?}",
                        e, backoff
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                    backoff = config.backoff.next(backoff);
                }
            }
        }

        info!("[Lighter WS] Connection loop stopped");
    }

    /// Run a single connection until it ends
    async fn run_connection(
        config: &LighterWebSocketConfig,
        update_tx: &broadcast::Sender<LighterUpdate>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<ConnectionEnd, LighterWsError> {
        info!("[Lighter WS] Connecting to {}", config.ws_url);

        let (ws_stream, _) = connect_async(config.ws_url.as_str())
            .await
            .map_err(|e| LighterWsError::Connect(e.to_string()))?;

        info!(
            "[Lighter WS] Connected. Subscribing to account_all_trades/{}",
            config.account_id
        );
        let _ = update_tx.send(LighterUpdate::ConnectionState {
            connected: true,
            error: None,
        });

        let (mut write, mut read) = ws_stream.split();

        let subscribe = StreamCommand::Subscribe {
            channel: format!("account_all_trades/{}", config.account_id),
            auth: config.auth_token.clone(),
        };
        let json = serde_json::to_string(&subscribe)
            .map_err(|e| LighterWsError::Stream(e.to_string()))?;
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| LighterWsError::Stream(e.to_string()))?;

        // Recycle before the server-enforced maximum lifetime elapses
        let recycle_at = tokio::time::Instant::now()
            + config.max_connection_lifetime.mul_f64(RECYCLE_FRACTION);
        let recycle = tokio::time::sleep_until(recycle_at);
        tokio::pin!(recycle);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = Self::handle_message(&text, config, update_tx) {
                                write
                                    .send(reply)
                                    .await
                                    .map_err(|e| LighterWsError::Stream(e.to_string()))?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write
                                .send(Message::Pong(data))
                                .await
                                .map_err(|e| LighterWsError::Stream(e.to_string()))?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("[Lighter WS] Connection closed by server");
                            return Ok(ConnectionEnd::ServerClosed);
                        }
                        Some(Err(e)) => {
                            return Err(LighterWsError::Stream(e.to_string()));
                        }
                        None => {
                            info!("[Lighter WS] Stream ended");
                            return Ok(ConnectionEnd::ServerClosed);
                        }
                        _ => {}
                    }
                }

                _ = &mut recycle => {
                    info!(
                        "[Lighter WS] Max connection age ({:?}) approaching - recycling connection",
                        config.max_connection_lifetime
                    );
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Recycle);
                }

                _ = shutdown_rx.changed() => {
                    info!("[Lighter WS] Shutdown requested - closing connection");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Shutdown);
                }
            }
        }
    }

    /// Handle an incoming text message; returns a reply to send, if any
    fn handle_message(
        text: &str,
        config: &LighterWebSocketConfig,
        update_tx: &broadcast::Sender<LighterUpdate>,
    ) -> Option<Message> {
        let parsed = match serde_json::from_str::<StreamMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("[Lighter WS] Ignoring message: {} (error: {})", text, e);
                return None;
            }
        };

        match parsed {
            StreamMessage::Ping => {
                debug!("[Lighter WS] Server ping - replying with pong");
                let pong = serde_json::to_string(&StreamCommand::Pong).ok()?;
                Some(Message::Text(pong.into()))
            }
            StreamMessage::Subscribed { channel } => {
                info!("[Lighter WS] Subscribed to {:?}", channel);
                None
            }
            StreamMessage::TradeUpdate { trades, .. } => {
                let received_at = Utc::now();
                let normalized: Vec<NormalizedTrade> = trades
                    .iter()
                    .flat_map(|(market_key, list)| {
                        list.iter().map(move |raw| {
                            raw.normalize(config.account_id, market_key, received_at)
                        })
                    })
                    .collect();

                if !normalized.is_empty() {
                    debug!(
                        "[Lighter WS] Received {} trades for account {}",
                        normalized.len(),
                        config.account_id
                    );
                    let _ = update_tx.send(LighterUpdate::TradeBatch { trades: normalized });
                }
                None
            }
        }
    }
}

impl std::fmt::Debug for LighterWebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LighterWebSocket")
            .field("config", &self.config)
            .finish()
    }
}
