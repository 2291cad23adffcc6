// =============================================================================
// Whale Followup Tracker (spec §4.12)
// =============================================================================
//
// For every still-pending whale alert, fills in the next price-change
// milestone (1/5/15/30/60 minutes, 1 day) once that much time has elapsed
// since the alert fired, then classifies immediate (5 min) and sustained
// (60 min) impact and flags a reversal if the move later flips against the
// alert's own action.
//
// Grounded on the teacher's `exit::monitor::run_exit_monitor` periodic-sweep
// shape (fixed-cadence tick over a pending-work set, one persisted update
// per item); the milestone/impact bookkeeping itself has no teacher analog
// and follows spec §4.12 directly.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::repository::{Repository, WhaleAlertFollowup};
use crate::types::{Action, ImpactClass, Timeframe};

const PENDING_WINDOW: Duration = Duration::from_secs(2 * 24 * 3600);
const NEUTRAL_BAND_PCT: f64 = 0.3;

struct Milestone {
    minutes: i64,
}

const MILESTONES: [Milestone; 6] = [
    Milestone { minutes: 1 },
    Milestone { minutes: 5 },
    Milestone { minutes: 15 },
    Milestone { minutes: 30 },
    Milestone { minutes: 60 },
    Milestone { minutes: 24 * 60 },
];

pub struct WhaleFollowupTracker {
    repo: Arc<dyn Repository>,
}

impl WhaleFollowupTracker {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    warn!(error = %e, "whale followup sweep failed");
                }
            }
        });
    }

    pub async fn sweep(&self) -> anyhow::Result<()> {
        let pending = self.repo.get_pending_followups(PENDING_WINDOW).await?;
        for followup in pending {
            if let Err(e) = self.refresh_one(followup).await {
                warn!(error = %e, "followup refresh failed");
            }
        }
        Ok(())
    }

    async fn refresh_one(&self, mut followup: WhaleAlertFollowup) -> anyhow::Result<()> {
        let now = chrono::Utc::now();
        let elapsed_minutes = (now - followup.alert_time).num_minutes();

        let current_price = match self.repo.get_latest_candle(&followup.symbol, Timeframe::M1).await? {
            Some(c) => c.close,
            None => return Ok(()),
        };

        let mut changed = false;
        for milestone in &MILESTONES {
            if elapsed_minutes < milestone.minutes {
                continue;
            }
            changed |= fill_milestone(&mut followup, milestone.minutes, current_price);
        }

        if !changed {
            return Ok(());
        }

        followup.immediate_impact = followup
            .change_5min_pct
            .map(|pct| classify_impact(pct, followup.alert_action));
        followup.sustained_impact = followup
            .change_60min_pct
            .map(|pct| classify_impact(pct, followup.alert_action));

        detect_reversal(&mut followup);

        debug!(
            symbol = %followup.symbol,
            alert_id = followup.alert_id,
            immediate = ?followup.immediate_impact,
            sustained = ?followup.sustained_impact,
            reversal = followup.reversal_detected,
            "whale followup updated"
        );
        self.repo.update_whale_followup(&followup).await?;
        Ok(())
    }
}

fn fill_milestone(followup: &mut WhaleAlertFollowup, minutes: i64, price: f64) -> bool {
    let pct = pct_change(followup.alert_price, price);
    match minutes {
        1 if followup.price_1min.is_none() => {
            followup.price_1min = Some(price);
            followup.change_1min_pct = Some(pct);
            true
        }
        5 if followup.price_5min.is_none() => {
            followup.price_5min = Some(price);
            followup.change_5min_pct = Some(pct);
            true
        }
        15 if followup.price_15min.is_none() => {
            followup.price_15min = Some(price);
            followup.change_15min_pct = Some(pct);
            true
        }
        30 if followup.price_30min.is_none() => {
            followup.price_30min = Some(price);
            followup.change_30min_pct = Some(pct);
            true
        }
        60 if followup.price_60min.is_none() => {
            followup.price_60min = Some(price);
            followup.change_60min_pct = Some(pct);
            true
        }
        1440 if followup.price_1day.is_none() => {
            followup.price_1day = Some(price);
            followup.change_1day_pct = Some(pct);
            true
        }
        _ => false,
    }
}

fn pct_change(base: f64, current: f64) -> f64 {
    if base <= 0.0 {
        0.0
    } else {
        (current - base) / base * 100.0
    }
}

/// Classify a price move relative to the direction the alert implied:
/// a BUY alert is confirmed by a rise, a SELL alert by a fall.
fn classify_impact(pct: f64, action: Action) -> ImpactClass {
    let aligned_pct = match action {
        Action::Sell => -pct,
        Action::Buy => pct,
    };
    if aligned_pct > NEUTRAL_BAND_PCT {
        ImpactClass::Positive
    } else if aligned_pct < -NEUTRAL_BAND_PCT {
        ImpactClass::Negative
    } else {
        ImpactClass::Neutral
    }
}

/// A reversal is flagged once a later milestone's impact flips against an
/// earlier positive one.
fn detect_reversal(followup: &mut WhaleAlertFollowup) {
    if followup.reversal_detected {
        return;
    }

    let milestones: [(i64, Option<f64>); 5] = [
        (1, followup.change_1min_pct),
        (5, followup.change_5min_pct),
        (15, followup.change_15min_pct),
        (30, followup.change_30min_pct),
        (60, followup.change_60min_pct),
    ];

    let mut best_aligned: Option<f64> = None;
    for (minutes, pct) in milestones {
        let pct = match pct {
            Some(p) => p,
            None => continue,
        };
        let aligned = match followup.alert_action {
            Action::Sell => -pct,
            Action::Buy => pct,
        };

        if let Some(best) = best_aligned {
            if best > NEUTRAL_BAND_PCT && aligned < -NEUTRAL_BAND_PCT {
                followup.reversal_detected = true;
                followup.reversal_time_minutes = Some(minutes);
                return;
            }
        }
        best_aligned = Some(best_aligned.map_or(aligned, |b| b.max(aligned)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn followup() -> WhaleAlertFollowup {
        WhaleAlertFollowup {
            alert_id: 1,
            symbol: "BBCA".to_string(),
            alert_time: Utc::now(),
            alert_price: 1000.0,
            alert_action: Action::Buy,
            price_1min: None,
            price_5min: None,
            price_15min: None,
            price_30min: None,
            price_60min: None,
            price_1day: None,
            change_1min_pct: None,
            change_5min_pct: None,
            change_15min_pct: None,
            change_30min_pct: None,
            change_60min_pct: None,
            change_1day_pct: None,
            immediate_impact: None,
            sustained_impact: None,
            reversal_detected: false,
            reversal_time_minutes: None,
        }
    }

    #[test]
    fn fill_milestone_sets_price_and_pct_once() {
        let mut f = followup();
        assert!(fill_milestone(&mut f, 5, 1050.0));
        assert_eq!(f.price_5min, Some(1050.0));
        assert!((f.change_5min_pct.unwrap() - 5.0).abs() < 1e-9);
        // Second fill for the same milestone is a no-op.
        assert!(!fill_milestone(&mut f, 5, 1100.0));
        assert_eq!(f.price_5min, Some(1050.0));
    }

    #[test]
    fn classify_impact_respects_action_direction() {
        assert_eq!(classify_impact(1.0, Action::Buy), ImpactClass::Positive);
        assert_eq!(classify_impact(1.0, Action::Sell), ImpactClass::Negative);
        assert_eq!(classify_impact(0.1, Action::Buy), ImpactClass::Neutral);
    }

    #[test]
    fn detect_reversal_flags_flip_after_initial_move() {
        let mut f = followup();
        f.change_1min_pct = Some(1.0);
        f.change_5min_pct = Some(2.0);
        f.change_15min_pct = Some(-1.0);
        detect_reversal(&mut f);
        assert!(f.reversal_detected);
        assert_eq!(f.reversal_time_minutes, Some(15));
    }

    #[test]
    fn no_reversal_when_direction_holds() {
        let mut f = followup();
        f.change_1min_pct = Some(1.0);
        f.change_5min_pct = Some(2.0);
        f.change_15min_pct = Some(3.0);
        detect_reversal(&mut f);
        assert!(!f.reversal_detected);
    }
}
