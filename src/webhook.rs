// =============================================================================
// Webhook delivery (spec §6.2)
// =============================================================================
//
// HTTP POST of a JSON whale-alert payload to configured endpoints, at-least-
// once via an in-memory retry queue with exponential backoff and a dedup key
// `(alert_id, endpoint_id)`. Grounded on the teacher's `reqwest::Client` usage
// in `binance/client.rs` (timeout + typed Result), generalized from signed
// REST calls to unauthenticated outbound POSTs, and on `main.rs`'s
// reconnect-backoff shape for the retry delay sequence.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::repository::WhaleAlert;

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize)]
pub struct WhaleAlertPayload {
    pub alert_id: i64,
    pub symbol: String,
    pub trigger_value: f64,
    pub trigger_price: f64,
    pub trigger_volume_lots: f64,
    pub action: String,
}

impl From<&WhaleAlert> for WhaleAlertPayload {
    fn from(a: &WhaleAlert) -> Self {
        Self {
            alert_id: a.id,
            symbol: a.symbol.clone(),
            trigger_value: a.trigger_value,
            trigger_price: a.trigger_price,
            trigger_volume_lots: a.trigger_volume_lots,
            action: a.action.to_string(),
        }
    }
}

struct Delivery {
    endpoint: String,
    endpoint_id: String,
    payload: WhaleAlertPayload,
    attempt: u32,
}

/// Dispatches whale-alert webhooks with retry-with-backoff and dedup.
#[derive(Clone)]
pub struct WebhookDispatcher {
    queue: mpsc::Sender<Delivery>,
    endpoints: Arc<Mutex<Vec<String>>>,
}

impl WebhookDispatcher {
    pub fn spawn(client: Client) -> Self {
        let (tx, mut rx) = mpsc::channel::<Delivery>(1024);
        let seen: Arc<Mutex<HashSet<(i64, String)>>> = Arc::new(Mutex::new(HashSet::new()));

        let retry_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let key = (delivery.payload.alert_id, delivery.endpoint_id.clone());
                if delivery.attempt == 1 {
                    let mut seen = seen.lock();
                    if seen.contains(&key) {
                        continue;
                    }
                    seen.insert(key.clone());
                }

                let result = client
                    .post(&delivery.endpoint)
                    .json(&delivery.payload)
                    .timeout(Duration::from_secs(10))
                    .send()
                    .await;

                match result {
                    Ok(resp) if resp.status().is_success() => {
                        debug!(endpoint = %delivery.endpoint, alert_id = delivery.payload.alert_id, "webhook delivered");
                    }
                    _ => {
                        if delivery.attempt < MAX_ATTEMPTS {
                            let backoff = (BASE_BACKOFF_SECS * 2u64.pow(delivery.attempt - 1))
                                .min(MAX_BACKOFF_SECS);
                            warn!(
                                endpoint = %delivery.endpoint,
                                attempt = delivery.attempt,
                                backoff_secs = backoff,
                                "webhook delivery failed, retrying"
                            );
                            let retry_tx = retry_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(Duration::from_secs(backoff)).await;
                                let _ = retry_tx
                                    .send(Delivery {
                                        endpoint: delivery.endpoint,
                                        endpoint_id: delivery.endpoint_id,
                                        payload: delivery.payload,
                                        attempt: delivery.attempt + 1,
                                    })
                                    .await;
                            });
                        } else {
                            warn!(
                                endpoint = %delivery.endpoint,
                                alert_id = delivery.payload.alert_id,
                                "webhook delivery exhausted retries, dropping"
                            );
                        }
                    }
                }
            }
        });

        Self {
            queue: tx,
            endpoints: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reload endpoints (spec §6.2: "reloadable without restart via the
    /// repository, refresh on CRUD").
    pub fn set_endpoints(&self, endpoints: Vec<String>) {
        *self.endpoints.lock() = endpoints;
    }

    /// Enqueue a delivery to every configured endpoint.
    pub async fn enqueue(&self, alert: &WhaleAlert) {
        let payload = WhaleAlertPayload::from(alert);
        let endpoints = self.endpoints.lock().clone();
        for (i, endpoint) in endpoints.into_iter().enumerate() {
            let delivery = Delivery {
                endpoint: endpoint.clone(),
                endpoint_id: format!("ep{i}"),
                payload: payload.clone(),
                attempt: 1,
            };
            if self.queue.send(delivery).await.is_err() {
                warn!("webhook queue closed — alert dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;
    use chrono::Utc;

    fn sample_alert() -> WhaleAlert {
        WhaleAlert {
            id: 1,
            trade_id: 1,
            symbol: "BBCA".to_string(),
            detected_at: Utc::now(),
            trigger_value: 6e8,
            trigger_price: 10000.0,
            trigger_volume_lots: 60000.0,
            z_score: None,
            action: Action::Buy,
        }
    }

    #[test]
    fn payload_conversion_copies_fields() {
        let alert = sample_alert();
        let payload = WhaleAlertPayload::from(&alert);
        assert_eq!(payload.alert_id, 1);
        assert_eq!(payload.symbol, "BBCA");
        assert!((payload.trigger_value - 6e8).abs() < 1.0);
    }

    #[tokio::test]
    async fn enqueue_with_no_endpoints_is_a_noop() {
        let dispatcher = WebhookDispatcher::spawn(Client::new());
        // No endpoints configured — should not panic or block.
        dispatcher.enqueue(&sample_alert()).await;
    }
}
