// =============================================================================
// Feed Client (spec §4.1 / §6.1)
// =============================================================================
//
// Connects to the upstream binary trade feed, authenticates, subscribes to
// the configured symbol universe, and forwards decoded trades to the Ingest
// Handler over a channel. Reconnects with exponential backoff (base..max,
// reset to base on a clean read) — the same shape as the teacher's
// `run_trade_stream` reconnect loop in `main.rs`, generalized from a fixed
// 5 s retry to the spec's doubling backoff sequence. Request signing is
// grounded on `binance::client::BinanceClient::sign` (HMAC-SHA256, hex
// encoded), repurposed here for feed credentials instead of REST order
// signing.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::feed::protocol::{decode_frame, encode_subscribe, Frame};
use crate::repository::Trade;

type HmacSha256 = Hmac<Sha256>;

/// Supplies a signed session token for the feed's auth handshake. A real
/// deployment backs this with a secrets-managed API key; tests use a static
/// stub.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// HMAC-SHA256 token provider: `token = hex(hmac(secret, "key_id:epoch_ms"))`.
pub struct HmacTokenProvider {
    key_id: String,
    secret: String,
}

impl HmacTokenProvider {
    pub fn new(key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for HmacTokenProvider {
    async fn token(&self) -> Result<String> {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock before UNIX epoch")?
            .as_millis();
        let payload = format!("{}:{}", self.key_id, epoch_ms);
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{payload}:{sig}"))
    }
}

/// Connects to the upstream feed and forwards decoded trades downstream.
pub struct FeedClient {
    ws_url: String,
    symbols: Vec<String>,
    token_provider: std::sync::Arc<dyn TokenProvider>,
    ping_interval: Duration,
    reconnect_base: Duration,
    reconnect_max: Duration,
    reconnect_count: AtomicU64,
}

impl FeedClient {
    pub fn new(
        ws_url: impl Into<String>,
        symbols: Vec<String>,
        token_provider: std::sync::Arc<dyn TokenProvider>,
        ping_interval: Duration,
        reconnect_base: Duration,
        reconnect_max: Duration,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            symbols,
            token_provider,
            ping_interval,
            reconnect_base,
            reconnect_max,
            reconnect_count: AtomicU64::new(0),
        }
    }

    /// Run the reconnect loop forever, forwarding trades to `trades_tx`.
    /// Returns only if `trades_tx` is dropped (shutdown).
    pub async fn run(&self, trades_tx: mpsc::Sender<Trade>) {
        let mut backoff = self.reconnect_base;

        loop {
            match self.connect_and_stream(&trades_tx).await {
                Ok(()) => {
                    info!("feed connection closed cleanly");
                    backoff = self.reconnect_base;
                }
                Err(e) => {
                    error!(error = %e, backoff_secs = backoff.as_secs(), "feed connection failed, retrying");
                }
            }

            if trades_tx.is_closed() {
                return;
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.reconnect_max);
            self.reconnect_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    async fn connect_and_stream(&self, trades_tx: &mpsc::Sender<Trade>) -> Result<()> {
        let token = self.token_provider.token().await?;
        let url = format!("{}?token={}", self.ws_url, token);
        info!(url = %self.ws_url, "connecting to upstream feed");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect to upstream feed")?;
        info!("upstream feed connected");

        let (mut write, mut read) = ws_stream.split();

        let subscribe_frame = encode_subscribe(&self.symbols)?;
        write
            .send(Message::Binary(subscribe_frame))
            .await
            .context("failed to send subscribe frame")?;

        let mut ping_interval = tokio::time::interval(self.ping_interval);
        ping_interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        return Err(anyhow::anyhow!("failed to send heartbeat ping"));
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(bytes))) => {
                            match decode_frame(&bytes) {
                                Ok(Frame::Trade(trade)) => {
                                    if trades_tx.send(trade).await.is_err() {
                                        return Ok(());
                                    }
                                }
                                Ok(Frame::Heartbeat) => {
                                    debug!("heartbeat received");
                                }
                                Ok(Frame::Reject(reason)) => {
                                    return Err(anyhow::anyhow!("feed rejected subscription: {reason}"));
                                }
                                Err(e) => {
                                    warn!(error = %e, "failed to decode feed frame, skipping");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn token(&self) -> Result<String> {
            Ok("static-token".to_string())
        }
    }

    #[tokio::test]
    async fn hmac_token_provider_produces_nonempty_signed_token() {
        let provider = HmacTokenProvider::new("key-id", "secret");
        let token = provider.token().await.unwrap();
        assert!(token.contains("key-id:"));
        assert!(token.split(':').count() == 3);
    }

    #[test]
    fn backoff_doubles_and_caps_at_max() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        let mut backoff = base;
        let mut sequence = vec![backoff.as_secs()];
        for _ in 0..6 {
            backoff = (backoff * 2).min(max);
            sequence.push(backoff.as_secs());
        }
        assert_eq!(sequence, vec![5, 10, 20, 40, 60, 60, 60]);
    }

    #[test]
    fn reconnect_count_starts_at_zero() {
        let client = FeedClient::new(
            "wss://example.invalid",
            vec!["BBCA".to_string()],
            std::sync::Arc::new(StaticToken),
            Duration::from_secs(25),
            Duration::from_secs(5),
            Duration::from_secs(60),
        );
        assert_eq!(client.reconnect_count(), 0);
    }
}
