// =============================================================================
// Volume-Weighted Average Price (VWAP)
// =============================================================================
//
// VWAP = sum(typical_price * volume) / sum(volume), where typical_price is
// (high + low + close) / 3 for each bar. Used by the Dynamic Confidence
// filter (spec §4.10-3) to reject BUY candidates trading below the session's
// volume-weighted center of gravity.
// =============================================================================

use crate::repository::Candle;

/// Compute VWAP over a slice of OHLCV candles (any order). Returns `None` when
/// the slice is empty or total volume is zero.
pub fn calculate_vwap(candles: &[Candle]) -> Option<f64> {
    let mut value_sum = 0.0;
    let mut volume_sum = 0.0;

    for c in candles {
        let typical_price = (c.high + c.low + c.close) / 3.0;
        value_sum += typical_price * c.volume_lots;
        volume_sum += c.volume_lots;
    }

    if volume_sum <= 0.0 {
        return None;
    }

    Some(value_sum / volume_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            close_time: Utc::now(),
            open: close,
            high,
            low,
            close,
            volume_lots: volume,
            is_closed: true,
        }
    }

    #[test]
    fn empty_slice_yields_none() {
        assert_eq!(calculate_vwap(&[]), None);
    }

    #[test]
    fn single_candle_vwap_is_its_typical_price() {
        let c = candle(110.0, 90.0, 100.0, 50.0);
        let vwap = calculate_vwap(&[c]).unwrap();
        assert!((vwap - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn heavier_volume_bar_dominates_the_average() {
        let low_vol = candle(101.0, 99.0, 100.0, 1.0);
        let high_vol = candle(201.0, 199.0, 200.0, 99.0);
        let vwap = calculate_vwap(&[low_vol, high_vol]).unwrap();
        assert!(vwap > 190.0);
    }

    #[test]
    fn zero_volume_yields_none() {
        let c = candle(110.0, 90.0, 100.0, 0.0);
        assert_eq!(calculate_vwap(&[c]), None);
    }
}
