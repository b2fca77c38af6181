//! Coinbase WebSocket stream for level2 order book updates.
//!
//! Sends a `subscribe` frame after connecting and fans out raw snapshot and
//! l2update messages over a broadcast channel. Reconnect behavior matches
//! the Binance stream: jittered exponential backoff, attempt counter reset
//! after a successful connection.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};

use crate::error::{GatewayError, Result};
use crate::infra::compute_backoff;

const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
const PING_INTERVAL_SECS: u64 = 30;
const CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct Level2Update {
    pub product_id: String,
    pub kind: String,
    pub raw: Value,
}

pub struct CoinbaseLevel2Stream {
    update_tx: broadcast::Sender<Level2Update>,
    product_ids: Vec<String>,
}

impl CoinbaseLevel2Stream {
    pub fn new(product_ids: Vec<String>) -> Self {
        let (update_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            update_tx,
            product_ids,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Level2Update> {
        self.update_tx.subscribe()
    }

    fn subscribe_message(&self) -> String {
        json!({
            "type": "subscribe",
            "channels": [{"name": "level2", "product_ids": self.product_ids}],
        })
        .to_string()
    }

    pub async fn run(&self) {
        let mut attempt: u32 = 0;
        info!(product_ids = ?self.product_ids, "starting Coinbase level2 stream");

        loop {
            match self.connect_and_stream(&mut attempt).await {
                Ok(()) => {
                    info!("Coinbase level2 stream closed normally");
                    attempt = 0;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    error!(attempt, error = %e, "Coinbase level2 stream error");
                }
            }

            let delay = compute_backoff(attempt, 1.0, 30.0, 0.2);
            info!(attempt, delay_s = delay, "reconnecting Coinbase level2 stream");
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
    }

    async fn connect_and_stream(&self, attempt: &mut u32) -> Result<()> {
        let (ws_stream, _) =
            tokio::time::timeout(Duration::from_secs(10), connect_async(COINBASE_WS_URL))
                .await
                .map_err(|_| GatewayError::Network("WebSocket connect timeout".to_string()))??;
        info!("connected to Coinbase level2 stream");
        *attempt = 0;

        let (mut write, mut read) = ws_stream.split();
        write
            .send(Message::Text(self.subscribe_message()))
            .await?;
        let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                error!(error = %e, "failed to send pong");
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("received close frame from Coinbase");
                            break;
                        }
                        Some(Err(e)) => {
                            return Err(GatewayError::WebSocket(e));
                        }
                        None => {
                            info!("Coinbase level2 stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = ping_interval.tick() => {
                    if let Err(e) = write.send(Message::Ping(vec![])).await {
                        error!(error = %e, "failed to send ping");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_message(&self, text: &str) {
        let raw: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "unparseable Coinbase message");
                return;
            }
        };
        let kind = raw
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();
        match kind.as_str() {
            "snapshot" | "l2update" => {
                let product_id = raw
                    .get("product_id")
                    .and_then(|p| p.as_str())
                    .unwrap_or("")
                    .to_string();
                let _ = self.update_tx.send(Level2Update {
                    product_id,
                    kind,
                    raw,
                });
            }
            "subscriptions" => debug!("Coinbase subscription confirmed"),
            "error" => error!(message = %raw, "Coinbase stream error message"),
            _ => {}
        }
    }
}
