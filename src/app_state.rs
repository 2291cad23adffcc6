// =============================================================================
// Central Application State — Whale Signal Engine
// =============================================================================
//
// The single source of truth shared across every spawned task. Unlike the
// teacher's `AppState` (which owns mutable in-memory trading state protected
// by `parking_lot::RwLock`), most of this engine's state lives in the
// Repository; `AppState` mainly holds the `Arc`-wrapped component handles the
// Orchestrator wires together, plus the same version counter and bounded
// error ring buffer the teacher uses for the dashboard feed.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::broker::Broker;
use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::feed::FeedClient;
use crate::followup::WhaleFollowupTracker;
use crate::ingest::IngestHandler;
use crate::outcome::SignalOutcomeTracker;
use crate::repository::Repository;
use crate::signals::SignalGenerator;
use crate::webhook::WebhookDispatcher;
use crate::workers::{
    BaselineCalculator, CorrelationAnalyzer, PatternDetector, PerformanceRefresher, RegimeDetector,
};

/// A recorded error event for the operational error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: String,
}

const MAX_RECENT_ERRORS: usize = 50;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on every meaningful
    /// mutation so polling API clients can detect fresh state cheaply.
    pub state_version: AtomicU64,

    pub config: Arc<EngineConfig>,
    pub repo: Arc<dyn Repository>,
    pub cache: Arc<dyn Cache>,
    pub broker: Broker,
    pub webhooks: WebhookDispatcher,

    pub feed_client: Arc<FeedClient>,
    pub ingest: Arc<IngestHandler>,
    pub generator: Arc<SignalGenerator>,
    pub outcome_tracker: Arc<SignalOutcomeTracker>,
    pub followup_tracker: Arc<WhaleFollowupTracker>,

    pub baseline: Arc<BaselineCalculator>,
    pub regime: Arc<RegimeDetector>,
    pub pattern: Arc<PatternDetector>,
    pub correlation: Arc<CorrelationAnalyzer>,
    pub performance: Arc<PerformanceRefresher>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        repo: Arc<dyn Repository>,
        cache: Arc<dyn Cache>,
        broker: Broker,
        webhooks: WebhookDispatcher,
        feed_client: Arc<FeedClient>,
        ingest: Arc<IngestHandler>,
        generator: Arc<SignalGenerator>,
        outcome_tracker: Arc<SignalOutcomeTracker>,
        followup_tracker: Arc<WhaleFollowupTracker>,
        baseline: Arc<BaselineCalculator>,
        regime: Arc<RegimeDetector>,
        pattern: Arc<PatternDetector>,
        correlation: Arc<CorrelationAnalyzer>,
        performance: Arc<PerformanceRefresher>,
    ) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            config,
            repo,
            cache,
            broker,
            webhooks,
            feed_client,
            ingest,
            generator,
            outcome_tracker,
            followup_tracker,
            baseline,
            regime,
            pattern,
            correlation,
            performance,
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Record an operational error. The ring buffer is capped at
    /// [`MAX_RECENT_ERRORS`]; oldest entries are evicted first.
    pub fn push_error(&self, msg: String) {
        let record = ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        self.increment_version();
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Build a lightweight status snapshot for the REST/WebSocket surface.
    pub fn build_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.uptime_secs(),
            symbols: self.config.symbols.clone(),
            feed_reconnect_count: self.feed_client.reconnect_count(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

/// Snapshot payload served by `GET /api/v1/state` and pushed over the
/// WebSocket feed.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub symbols: Vec<String>,
    pub feed_reconnect_count: u64,
    pub recent_errors: Vec<ErrorRecord>,
}
