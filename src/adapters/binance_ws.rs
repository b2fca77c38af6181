//! Binance WebSocket stream for real-time kline (candlestick) data.
//!
//! Subscribes to combined `<symbol>@kline_<interval>` streams and fans out
//! updates over a broadcast channel. Reconnects forever with jittered
//! exponential backoff; the attempt counter resets only after a connection
//! is actually established.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::domain::Bar;
use crate::error::{GatewayError, Result};
use crate::infra::compute_backoff;

const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443/stream?streams=";
const PING_INTERVAL_SECS: u64 = 30;
const CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct KlineUpdate {
    pub symbol: String,
    pub interval: String,
    pub bar: Bar,
    pub is_closed: bool,
    pub event_time_ms: i64,
}

#[derive(Debug, Deserialize)]
struct CombinedStream<T> {
    #[serde(rename = "stream")]
    _stream: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlineData,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

pub struct BinanceKlineStream {
    update_tx: broadcast::Sender<KlineUpdate>,
    symbols: Vec<String>,
    intervals: Vec<String>,
    closed_only: bool,
}

impl BinanceKlineStream {
    pub fn new(symbols: Vec<String>, intervals: Vec<String>, closed_only: bool) -> Self {
        let (update_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            update_tx,
            symbols,
            intervals,
            closed_only,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KlineUpdate> {
        self.update_tx.subscribe()
    }

    fn build_url(&self) -> String {
        let mut streams: Vec<String> = Vec::new();
        for s in &self.symbols {
            let sym = s.to_lowercase();
            for i in &self.intervals {
                streams.push(format!("{}@kline_{}", sym, i));
            }
        }
        format!("{}{}", BINANCE_WS_BASE, streams.join("/"))
    }

    /// Runs until the task is aborted. Each stream failure is logged and
    /// followed by a backoff before the next connection attempt.
    pub async fn run(&self) {
        let mut attempt: u32 = 0;
        info!(
            symbols = ?self.symbols,
            intervals = ?self.intervals,
            closed_only = self.closed_only,
            "starting Binance kline stream"
        );

        loop {
            match self.connect_and_stream(&mut attempt).await {
                Ok(()) => {
                    info!("Binance kline stream closed normally");
                    attempt = 0;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    error!(attempt, error = %e, "Binance kline stream error");
                }
            }

            let delay = compute_backoff(attempt, 1.0, 30.0, 0.2);
            info!(attempt, delay_s = delay, "reconnecting Binance kline stream");
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
    }

    async fn connect_and_stream(&self, attempt: &mut u32) -> Result<()> {
        let url = self.build_url();
        debug!(%url, "connecting Binance kline stream");

        let (ws_stream, _) =
            tokio::time::timeout(Duration::from_secs(10), connect_async(url.as_str()))
                .await
                .map_err(|_| GatewayError::Network("WebSocket connect timeout".to_string()))??;
        info!("connected to Binance kline stream");
        *attempt = 0;

        let (mut write, mut read) = ws_stream.split();
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
                            info!("received close frame from Binance");
                            break;
                        }
                        Some(Err(e)) => {
                            return Err(GatewayError::WebSocket(e));
                        }
                        None => {
                            info!("Binance kline stream ended");
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
        if let Ok(wrapper) = serde_json::from_str::<CombinedStream<KlineEvent>>(text) {
            self.process_event(wrapper.data);
            return;
        }
        // Raw single-stream endpoints deliver the event without the wrapper.
        if let Ok(ev) = serde_json::from_str::<KlineEvent>(text) {
            self.process_event(ev);
            return;
        }
        debug!(
            "unrecognized Binance kline message: {}",
            &text[..text.len().min(120)]
        );
    }

    fn process_event(&self, ev: KlineEvent) {
        if self.closed_only && !ev.kline.is_closed {
            return;
        }

        let parse = |field: &str, name: &str| -> Option<f64> {
            match field.parse::<f64>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(field = name, value = field, error = %e, "bad kline field");
                    None
                }
            }
        };
        let (open, high, low, close, volume) = match (
            parse(&ev.kline.open, "open"),
            parse(&ev.kline.high, "high"),
            parse(&ev.kline.low, "low"),
            parse(&ev.kline.close, "close"),
            parse(&ev.kline.volume, "volume"),
        ) {
            (Some(o), Some(h), Some(l), Some(c), Some(v)) => (o, h, l, c, v),
            _ => return,
        };

        let update = KlineUpdate {
            symbol: ev.symbol,
            interval: ev.kline.interval,
            bar: Bar {
                timestamp_ms: ev.kline.open_time,
                open,
                high,
                low,
                close,
                volume,
            },
            is_closed: ev.kline.is_closed,
            event_time_ms: ev.event_time,
        };

        let _ = self.update_tx.send(update);
    }
}
