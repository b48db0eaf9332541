use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::{MarketEvent, StreamKind, STREAM_CAP};
use crate::error::{EngineError, EngineResult};
use crate::types::Symbol;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

pub struct StreamClient {
    ws_url: String,
    cap: usize,
    desired: Mutex<HashSet<(Symbol, StreamKind)>>,
    connected: AtomicBool,
    healthy: AtomicBool,
    events_tx: mpsc::UnboundedSender<MarketEvent>,
}

impl StreamClient {
    pub fn new(ws_url: impl Into<String>, events_tx: mpsc::UnboundedSender<MarketEvent>) -> Arc<Self> {
        Arc::new(Self {
            ws_url: ws_url.into(),
            cap: STREAM_CAP,
            desired: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(false),
            healthy: AtomicBool::new(false),
            events_tx,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub async fn subscribed_symbols(&self) -> Vec<Symbol> {
        let desired = self.desired.lock().await;
        let mut symbols: Vec<Symbol> = desired.iter().map(|(s, _)| s.clone()).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub async fn usage_ratio(&self) -> f64 {
        let desired = self.desired.lock().await;
        desired.len() as f64 / self.cap as f64
    }

    /// Idempotent; refuses beyond `STREAM_CAP` with `CapacityExceeded`.
    pub async fn subscribe(&self, symbol: &str, kind: StreamKind) -> EngineResult<()> {
        let mut desired = self.desired.lock().await;
        let key = (symbol.to_string(), kind);
        if desired.contains(&key) {
            return Ok(());
        }
        if desired.len() >= self.cap {
            return Err(EngineError::CapacityExceeded(format!(
                "stream cap {} reached, refusing {symbol}/{kind:?}",
                self.cap
            )));
        }
        desired.insert(key.clone());
        if self.is_connected() {
            debug!(symbol, ?kind, "new subscription will be sent on next frame opportunity");
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, symbol: &str, kind: StreamKind) {
        self.desired.lock().await.remove(&(symbol.to_string(), kind));
    }

    /// Owning reconnect loop: connects, replays all desired subscriptions,
    /// flips `is_healthy`, reads frames until the socket drops, then backs
    /// off exponentially (capped) and retries. Returns when `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = BACKOFF_BASE;

        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.run_once(&mut shutdown).await {
                Ok(()) => {
                    // Clean shutdown requested mid-session.
                    if *shutdown.borrow() {
                        return;
                    }
                    backoff = BACKOFF_BASE;
                }
                Err(e) => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "stream session ended, reconnecting");
                }
            }

            self.connected.store(false, Ordering::Relaxed);
            self.healthy.store(false, Ordering::Relaxed);

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    async fn run_once(&self, shutdown: &mut watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(url = %self.ws_url, "connecting stream session");
        let (ws_stream, _response) = connect_async(&self.ws_url).await?;
        self.connected.store(true, Ordering::Relaxed);

        let (mut write, mut read) = ws_stream.split();

        let desired = self.desired.lock().await.clone();
        for (symbol, kind) in &desired {
            let frame = subscribe_frame(symbol, *kind);
            write.send(Message::Text(frame)).await?;
        }
        self.healthy.store(true, Ordering::Relaxed);
        info!(count = desired.len(), "stream session healthy, subscriptions replayed");

        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = decode_event(&text) {
                                let _ = self.events_tx.send(event);
                            }
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "stream read error");
                            anyhow::bail!("stream read error: {e}");
                        }
                        None => {
                            warn!("stream session ended by peer");
                            return Ok(());
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn subscribe_frame(symbol: &str, kind: StreamKind) -> String {
    serde_json::json!({ "op": "subscribe", "symbol": symbol, "kind": kind }).to_string()
}

fn decode_event(raw: &str) -> Option<MarketEvent> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let event_type = value.get("type")?.as_str()?.to_string();
    let symbol = value.get("symbol")?.as_str()?.to_string();
    Some(MarketEvent {
        event_type,
        symbol,
        payload: value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Arc<StreamClient> {
        let (tx, _rx) = mpsc::unbounded_channel();
        StreamClient::new("wss://example.invalid/stream", tx)
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let client = client();
        client.subscribe("005930", StreamKind::Trade).await.unwrap();
        client.subscribe("005930", StreamKind::Trade).await.unwrap();
        assert_eq!(client.subscribed_symbols().await.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_refuses_beyond_cap() {
        let client = client();
        for i in 0..STREAM_CAP {
            client.subscribe(&format!("S{i}"), StreamKind::Trade).await.unwrap();
        }
        let result = client.subscribe("OVERFLOW", StreamKind::Trade).await;
        assert!(matches!(result, Err(EngineError::CapacityExceeded(_))));
    }

    #[tokio::test]
    async fn unsubscribe_frees_a_cap_slot() {
        let client = client();
        client.subscribe("005930", StreamKind::Trade).await.unwrap();
        client.unsubscribe("005930", StreamKind::Trade).await;
        assert_eq!(client.subscribed_symbols().await.len(), 0);
    }

    #[test]
    fn decode_event_parses_type_and_symbol() {
        let raw = r#"{"type":"trade","symbol":"005930","price":72000}"#;
        let event = decode_event(raw).unwrap();
        assert_eq!(event.event_type, "trade");
        assert_eq!(event.symbol, "005930");
    }
}
