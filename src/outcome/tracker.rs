// =============================================================================
// Signal Outcome Tracker (spec §4.11)
// =============================================================================
//
// Periodically sweeps every open signal and evaluates a six-rule exit
// cascade against its current price: ATR hard stop, trailing stop with
// breakeven lock, final take-profit, time-based partial take-profit, max
// holding period, and a scaled TP1 that relaxes linearly between 120 and
// 240 minutes of holding. The first rule to fire closes the position;
// terminal P&L is then classified WIN/LOSS/BREAKEVEN against a ±0.5% band.
//
// Grounded on the teacher's `exit::monitor::run_exit_monitor` periodic sweep
// shape and `exit::triple_barrier::BarrierState` (ATR-derived SL/TP1/TP2,
// progressive breakeven lock), generalized from an in-memory per-position
// actor to a stateless sweep that persists trailing-stop state on the
// `SignalOutcome` row itself between ticks.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::indicators::atr::calculate_atr;
use crate::repository::{Repository, SignalOutcome};
use crate::types::{Decision, ExitReason, OutcomeStatus, Timeframe};

const MAX_HOLD_MINUTES: i64 = 240;
const SCALE_START_MINUTES: i64 = 120;
const SCALE_MIN_FRACTION: f64 = 0.40;
const WIN_THRESHOLD_PCT: f64 = 0.5;
const LOSS_THRESHOLD_PCT: f64 = -0.5;
const ATR_PERIOD: usize = 14;
const OPEN_SIGNALS_LIMIT: u32 = 500;

pub struct SignalOutcomeTracker {
    repo: Arc<dyn Repository>,
    config: Arc<EngineConfig>,
}

impl SignalOutcomeTracker {
    pub fn new(repo: Arc<dyn Repository>, config: Arc<EngineConfig>) -> Self {
        Self { repo, config }
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    warn!(error = %e, "signal outcome sweep failed");
                }
            }
        });
    }

    pub async fn sweep(&self) -> anyhow::Result<()> {
        let open = self.repo.get_open_signals(OPEN_SIGNALS_LIMIT).await?;
        for signal in open {
            if let Err(e) = self.evaluate_one(&signal.symbol, signal.id, signal.decision).await {
                warn!(symbol = %signal.symbol, signal_id = signal.id, error = %e, "outcome evaluation failed");
            }
        }
        Ok(())
    }

    async fn evaluate_one(&self, symbol: &str, signal_id: i64, decision: Decision) -> anyhow::Result<()> {
        let mut outcome = match self.repo.get_signal_outcome_by_signal_id(signal_id).await? {
            Some(o) if o.status == OutcomeStatus::Open => o,
            _ => return Ok(()),
        };

        let candles = self.repo.get_candles_by_timeframe(Timeframe::M5, symbol, 100).await?;
        let current_price = match candles.last() {
            Some(c) => c.close,
            None => return Ok(()),
        };
        let atr = calculate_atr(&candles, ATR_PERIOD);

        let now = chrono::Utc::now();
        let elapsed_minutes = (now - outcome.entry_time).num_minutes();

        let verdict = evaluate_cascade(ExitInputs {
            entry_price: outcome.entry_price,
            current_price,
            decision,
            atr,
            elapsed_minutes,
            exit: &self.config.exit,
            trailing_stop_price: outcome.trailing_stop_price,
        });

        match verdict {
            CascadeResult::Exit(reason, exit_price) => {
                let pnl_pct = signed_pnl_pct(outcome.entry_price, exit_price, decision);
                outcome.status = classify(pnl_pct);
                outcome.exit_time = Some(now);
                outcome.exit_price = Some(exit_price);
                outcome.exit_reason = Some(reason);
                outcome.profit_loss_pct = Some(pnl_pct);
                outcome.holding_minutes = Some(elapsed_minutes);
                update_mae_mfe(&mut outcome, pnl_pct);

                info!(symbol, signal_id, reason = %reason, pnl_pct, "signal outcome closed");
                self.repo.update_signal_outcome(&outcome).await?;
            }
            CascadeResult::UpdateTrailingStop(new_stop) => {
                outcome.trailing_stop_price = Some(new_stop);
                update_mae_mfe(&mut outcome, signed_pnl_pct(outcome.entry_price, current_price, decision));
                debug!(symbol, signal_id, new_stop, "trailing stop updated");
                self.repo.update_signal_outcome(&outcome).await?;
            }
            CascadeResult::NoAction => {
                update_mae_mfe(&mut outcome, signed_pnl_pct(outcome.entry_price, current_price, decision));
                self.repo.update_signal_outcome(&outcome).await?;
            }
        }

        Ok(())
    }
}

fn update_mae_mfe(outcome: &mut SignalOutcome, pnl_pct: f64) {
    outcome.mae = Some(outcome.mae.map_or(pnl_pct, |mae| mae.min(pnl_pct)));
    outcome.mfe = Some(outcome.mfe.map_or(pnl_pct, |mfe| mfe.max(pnl_pct)));
}

fn signed_pnl_pct(entry: f64, current: f64, decision: Decision) -> f64 {
    if entry <= 0.0 {
        return 0.0;
    }
    let raw = (current - entry) / entry * 100.0;
    match decision {
        Decision::Sell => -raw,
        _ => raw,
    }
}

fn classify(pnl_pct: f64) -> OutcomeStatus {
    if pnl_pct >= WIN_THRESHOLD_PCT {
        OutcomeStatus::Win
    } else if pnl_pct <= LOSS_THRESHOLD_PCT {
        OutcomeStatus::Loss
    } else {
        OutcomeStatus::Breakeven
    }
}

struct ExitInputs<'a> {
    entry_price: f64,
    current_price: f64,
    decision: Decision,
    atr: Option<f64>,
    elapsed_minutes: i64,
    exit: &'a crate::config::ExitParams,
    trailing_stop_price: Option<f64>,
}

enum CascadeResult {
    Exit(ExitReason, f64),
    UpdateTrailingStop(f64),
    NoAction,
}

/// ATR-multiplier-derived or, when ATR can't be computed, fixed-percentage
/// fallback distances for each cascade rule (spec §4.11 / §8).
struct Distances {
    stop: f64,
    trail: f64,
    tp1: f64,
    tp2: f64,
}

fn resolve_distances(atr: Option<f64>, entry_price: f64, exit: &crate::config::ExitParams) -> Distances {
    match atr {
        Some(atr) if entry_price > 0.0 => {
            let atr_pct = (atr / entry_price) * 100.0;
            Distances {
                stop: atr_pct * exit.stop_loss_atr_multiplier,
                trail: atr_pct * exit.trailing_stop_atr_multiplier,
                tp1: atr_pct * exit.take_profit_1_atr_multiplier,
                tp2: atr_pct * exit.take_profit_2_atr_multiplier,
            }
        }
        _ => Distances {
            stop: exit.fallback_stop_loss_pct,
            trail: exit.fallback_trailing_stop_pct,
            tp1: exit.fallback_take_profit_1_pct,
            tp2: exit.fallback_take_profit_2_pct,
        },
    }
}

/// Pure six-rule cascade. First matching rule wins. When ATR cannot be
/// computed (fewer than 15 M5 candles), falls back to the fixed-percentage
/// distances in `ExitParams` instead of skipping evaluation outright.
fn evaluate_cascade(input: ExitInputs) -> CascadeResult {
    let distances = resolve_distances(input.atr, input.entry_price, input.exit);

    let pnl_pct = signed_pnl_pct(input.entry_price, input.current_price, input.decision);

    // Rule 1: ATR hard stop (or fixed fallback stop).
    let stop_distance = distances.stop;
    if pnl_pct <= -stop_distance {
        return CascadeResult::Exit(ExitReason::AtrStop, input.current_price);
    }

    // Rule 2: trailing stop with breakeven lock. A stop-out exits
    // immediately; otherwise the updated stop is remembered but doesn't
    // preempt the later rules, which may still close the position outright.
    let mut pending_trailing_update = None;
    if pnl_pct >= input.exit.breakeven_trigger_pct {
        let breakeven_floor = input.entry_price * (1.0 + input.exit.breakeven_buffer_pct / 100.0);
        let trail_distance = distances.trail;
        let trail_floor_pct = pnl_pct - trail_distance;
        let candidate_stop = direction_price(input.entry_price, trail_floor_pct, input.decision)
            .max(match input.decision {
                Decision::Sell => f64::MIN,
                _ => breakeven_floor,
            });
        let effective_stop = match input.trailing_stop_price {
            Some(existing) => match input.decision {
                Decision::Sell => existing.min(candidate_stop),
                _ => existing.max(candidate_stop),
            },
            None => candidate_stop,
        };

        let hit = match input.decision {
            Decision::Sell => input.current_price >= effective_stop,
            _ => input.current_price <= effective_stop,
        };

        if hit {
            return CascadeResult::Exit(ExitReason::TrailingStopHit, input.current_price);
        }
        if input.trailing_stop_price != Some(effective_stop) {
            pending_trailing_update = Some(effective_stop);
        }
    }

    // Rule 3: final take-profit (TP2).
    let tp2_distance = distances.tp2;
    if pnl_pct >= tp2_distance {
        return CascadeResult::Exit(ExitReason::TakeProfitFull, input.current_price);
    }

    let tp1_distance = distances.tp1;

    // Rule 4: time-based partial take-profit — TP1 reached after sitting
    // past the scale window opens.
    if input.elapsed_minutes >= SCALE_START_MINUTES && pnl_pct >= tp1_distance {
        return CascadeResult::Exit(ExitReason::TakeProfitTimeBased, input.current_price);
    }

    // Rule 5: max holding period.
    if input.elapsed_minutes >= MAX_HOLD_MINUTES {
        let reason = if pnl_pct >= input.exit.breakeven_trigger_pct {
            ExitReason::MaxHoldingProfit
        } else {
            ExitReason::MaxHoldingSmallProfit
        };
        return CascadeResult::Exit(reason, input.current_price);
    }

    // Rule 6: scaled TP1 — required fraction decays linearly from 100% to
    // 40% between 120 and 240 minutes of holding.
    if input.elapsed_minutes > SCALE_START_MINUTES {
        let span = (MAX_HOLD_MINUTES - SCALE_START_MINUTES) as f64;
        let progress = ((input.elapsed_minutes - SCALE_START_MINUTES) as f64 / span).clamp(0.0, 1.0);
        let fraction = 1.0 - progress * (1.0 - SCALE_MIN_FRACTION);
        let scaled_target = tp1_distance * fraction;
        if pnl_pct >= scaled_target {
            return CascadeResult::Exit(ExitReason::ScaledTakeProfit, input.current_price);
        }
    }

    match pending_trailing_update {
        Some(stop) => CascadeResult::UpdateTrailingStop(stop),
        None => CascadeResult::NoAction,
    }
}

fn direction_price(entry: f64, pnl_pct: f64, decision: Decision) -> f64 {
    match decision {
        Decision::Sell => entry * (1.0 - pnl_pct / 100.0),
        _ => entry * (1.0 + pnl_pct / 100.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExitParams;

    fn exit_params() -> ExitParams {
        ExitParams {
            stop_loss_atr_multiplier: 1.5,
            trailing_stop_atr_multiplier: 1.0,
            take_profit_1_atr_multiplier: 2.0,
            take_profit_2_atr_multiplier: 3.5,
            breakeven_trigger_pct: 1.0,
            breakeven_buffer_pct: 0.1,
            fallback_stop_loss_pct: 1.5,
            fallback_trailing_stop_pct: 1.0,
            fallback_take_profit_1_pct: 3.0,
            fallback_take_profit_2_pct: 5.0,
        }
    }

    #[test]
    fn atr_stop_fires_on_adverse_move() {
        let exit = exit_params();
        let result = evaluate_cascade(ExitInputs {
            entry_price: 1000.0,
            current_price: 970.0, // -3% vs atr_pct=1% * 1.5 = 1.5% stop
            decision: Decision::Buy,
            atr: Some(10.0),
            elapsed_minutes: 10,
            exit: &exit,
            trailing_stop_price: None,
        });
        assert!(matches!(result, CascadeResult::Exit(ExitReason::AtrStop, _)));
    }

    #[test]
    fn final_take_profit_fires_above_tp2() {
        let exit = exit_params();
        // atr_pct = 1%, tp2 = 3.5%
        let result = evaluate_cascade(ExitInputs {
            entry_price: 1000.0,
            current_price: 1040.0,
            decision: Decision::Buy,
            atr: Some(10.0),
            elapsed_minutes: 10,
            exit: &exit,
            trailing_stop_price: None,
        });
        assert!(matches!(result, CascadeResult::Exit(ExitReason::TakeProfitFull, _)));
    }

    #[test]
    fn time_based_partial_tp_requires_scale_window() {
        let exit = exit_params();
        // pnl=2.0% equals tp1 distance, but elapsed below scale start: no fire.
        let too_early = evaluate_cascade(ExitInputs {
            entry_price: 1000.0,
            current_price: 1020.0,
            decision: Decision::Buy,
            atr: Some(10.0),
            elapsed_minutes: 30,
            exit: &exit,
            trailing_stop_price: None,
        });
        assert!(matches!(too_early, CascadeResult::NoAction | CascadeResult::UpdateTrailingStop(_)));

        let after_window = evaluate_cascade(ExitInputs {
            entry_price: 1000.0,
            current_price: 1020.0,
            decision: Decision::Buy,
            atr: Some(10.0),
            elapsed_minutes: 130,
            exit: &exit,
            trailing_stop_price: None,
        });
        assert!(matches!(after_window, CascadeResult::Exit(ExitReason::TakeProfitTimeBased, _)));
    }

    #[test]
    fn max_holding_period_closes_with_profit_variant() {
        let exit = exit_params();
        let result = evaluate_cascade(ExitInputs {
            entry_price: 1000.0,
            current_price: 1015.0,
            decision: Decision::Buy,
            atr: Some(10.0),
            elapsed_minutes: MAX_HOLD_MINUTES,
            exit: &exit,
            trailing_stop_price: None,
        });
        assert!(matches!(result, CascadeResult::Exit(ExitReason::MaxHoldingProfit, _)));
    }

    #[test]
    fn max_holding_period_closes_with_small_profit_variant_below_breakeven_trigger() {
        let exit = exit_params();
        let result = evaluate_cascade(ExitInputs {
            entry_price: 1000.0,
            current_price: 1002.0,
            decision: Decision::Buy,
            atr: Some(10.0),
            elapsed_minutes: MAX_HOLD_MINUTES,
            exit: &exit,
            trailing_stop_price: None,
        });
        assert!(matches!(result, CascadeResult::Exit(ExitReason::MaxHoldingSmallProfit, _)));
    }

    #[test]
    fn scaled_tp1_threshold_relaxes_with_time() {
        let exit = exit_params();
        // tp1 distance = 2.0%; at the midpoint of the scale window the
        // required fraction is ~70% -> target ~1.4%.
        let result = evaluate_cascade(ExitInputs {
            entry_price: 1000.0,
            current_price: 1015.0,
            decision: Decision::Buy,
            atr: Some(10.0),
            elapsed_minutes: 180,
            exit: &exit,
            trailing_stop_price: None,
        });
        assert!(matches!(result, CascadeResult::Exit(ExitReason::ScaledTakeProfit, _)));
    }

    #[test]
    fn missing_atr_falls_back_to_fixed_percentages_instead_of_no_action() {
        let exit = exit_params();
        // pnl = +10%, well past the 5% fixed TP2 fallback.
        let result = evaluate_cascade(ExitInputs {
            entry_price: 1000.0,
            current_price: 1100.0,
            decision: Decision::Buy,
            atr: None,
            elapsed_minutes: 10,
            exit: &exit,
            trailing_stop_price: None,
        });
        assert!(matches!(result, CascadeResult::Exit(ExitReason::TakeProfitFull, _)));
    }

    #[test]
    fn missing_atr_fallback_stop_fires_on_adverse_move() {
        let exit = exit_params();
        // pnl = -2%, past the 1.5% fixed fallback stop.
        let result = evaluate_cascade(ExitInputs {
            entry_price: 1000.0,
            current_price: 980.0,
            decision: Decision::Buy,
            atr: None,
            elapsed_minutes: 10,
            exit: &exit,
            trailing_stop_price: None,
        });
        assert!(matches!(result, CascadeResult::Exit(ExitReason::AtrStop, _)));
    }

    #[test]
    fn missing_atr_within_fallback_band_yields_no_action() {
        let exit = exit_params();
        // pnl = +0.2%, inside every fallback band and below breakeven trigger.
        let result = evaluate_cascade(ExitInputs {
            entry_price: 1000.0,
            current_price: 1002.0,
            decision: Decision::Buy,
            atr: None,
            elapsed_minutes: 10,
            exit: &exit,
            trailing_stop_price: None,
        });
        assert!(matches!(result, CascadeResult::NoAction));
    }

    #[test]
    fn classify_uses_half_percent_band() {
        assert_eq!(classify(0.6), OutcomeStatus::Win);
        assert_eq!(classify(-0.6), OutcomeStatus::Loss);
        assert_eq!(classify(0.1), OutcomeStatus::Breakeven);
    }

    #[test]
    fn sell_decision_inverts_pnl_sign() {
        let pnl = signed_pnl_pct(1000.0, 950.0, Decision::Sell);
        assert!(pnl > 0.0);
    }
}
