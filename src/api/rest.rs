// =============================================================================
// REST + SSE API surface (spec §1: "thin wrappers", not where effort concentrates)
// =============================================================================
//
// All endpoints live under `/api/v1/`. `health` is public; everything else
// requires a valid Bearer token via the `AuthBearer` extractor. Grounded on
// the teacher's `api/rest.rs` router shape (permissive CORS, `with_state`)
// trimmed down to the handful of read endpoints and the event stream this
// engine actually needs.
// =============================================================================

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::types::{Action, Decision, OutcomeStatus};

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/signals", get(signals))
        .route("/api/v1/whales", get(whales))
        .route("/api/v1/events", get(events))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

#[derive(Deserialize)]
struct SignalsQuery {
    symbol: Option<String>,
    decision: Option<String>,
    limit: Option<u32>,
}

async fn signals(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<SignalsQuery>,
) -> impl IntoResponse {
    let decision = q.decision.and_then(|d| match d.to_uppercase().as_str() {
        "BUY" => Some(Decision::Buy),
        "SELL" => Some(Decision::Sell),
        "WAIT" => Some(Decision::Wait),
        _ => None,
    });
    let end = chrono::Utc::now();
    let start = end - chrono::Duration::days(7);
    let limit = q.limit.unwrap_or(100).min(1000);

    match state
        .repo
        .get_trading_signals(q.symbol.as_deref(), None, decision, start, end, limit)
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            state.push_error(format!("get_trading_signals failed: {e}"));
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
struct WhalesQuery {
    symbol: Option<String>,
    action: Option<String>,
    limit: Option<u32>,
}

async fn whales(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WhalesQuery>,
) -> impl IntoResponse {
    let action = q.action.and_then(|a| match a.to_uppercase().as_str() {
        "BUY" => Some(Action::Buy),
        "SELL" => Some(Action::Sell),
        _ => None,
    });
    let end = chrono::Utc::now();
    let start = end - chrono::Duration::days(7);
    let limit = q.limit.unwrap_or(100).min(1000);

    match state
        .repo
        .get_historical_whales(q.symbol.as_deref(), start, end, action, None, limit, 0)
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            state.push_error(format!("get_historical_whales failed: {e}"));
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
struct EventsQuery {
    topic: Option<String>,
}

/// SSE stream of broker events (`alert` and `signal` topics), optionally
/// filtered to a single topic via `?topic=`.
async fn events(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.broker.subscribe(q.topic).await;

    let stream = match subscription {
        Some((channel, _cancel)) => stream::unfold(channel.receiver, |mut rx| async move {
            rx.recv().await.map(|event| {
                let sse = SseEvent::default().event(event.topic).data(event.payload);
                (Ok(sse), rx)
            })
        }),
        None => stream::unfold(None, |_| async { None }),
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[allow(dead_code)]
fn outcome_status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Open => "OPEN",
        OutcomeStatus::Win => "WIN",
        OutcomeStatus::Loss => "LOSS",
        OutcomeStatus::Breakeven => "BREAKEVEN",
    }
}
