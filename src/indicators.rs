//! Pure indicator math over close series and candle windows.
//!
//! No I/O and no shared state; every function takes read-only slices and
//! returns values. Periods follow the usual conventions (EMA 12/26 for the
//! trend cross, Wilder smoothing for RSI and ATR at period 14).

use crate::types::Candle;

/// Default RSI / ATR period
pub const WILDER_PERIOD: usize = 14;

/// EMA periods for the bullish cross check
pub const EMA_FAST: usize = 12;
pub const EMA_SLOW: usize = 26;

/// Exponential moving average, seeded with the first value.
///
/// Recurrence: `e_i = p * x_i + (1 - p) * e_{i-1}` with `p = 2/(period+1)`.
/// Returns None while the series is shorter than the period.
pub fn ema(series: &[f64], period: usize) -> Option<f64> {
    if period == 0 || series.len() < period {
        return None;
    }
    let p = 2.0 / (period as f64 + 1.0);
    let mut e = series[0];
    for x in &series[1..] {
        e = p * x + (1.0 - p) * e;
    }
    Some(e)
}

/// True when the fast EMA sits above the slow EMA on the latest close.
pub fn ema_bull(series: &[f64]) -> bool {
    match (ema(series, EMA_FAST), ema(series, EMA_SLOW)) {
        (Some(fast), Some(slow)) => fast > slow,
        _ => false,
    }
}

/// Relative strength index with Wilder smoothing, clamped to [0, 100].
///
/// When the window shows no losses the result is 100 (pure up-move).
/// Returns None while fewer than `period + 1` closes are available.
pub fn rsi(series: &[f64], period: usize) -> Option<f64> {
    if period == 0 || series.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    // Seed with the simple average of the first `period` changes
    for w in series[..period + 1].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    // Wilder smoothing over the remainder
    for w in series[period..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some((100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0))
}

/// Average true range with Wilder smoothing.
///
/// True range per candle: `max(h - l, |h - prev_c|, |l - prev_c|)`.
/// Returns None while fewer than `period + 1` candles are available.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let prev_c = w[0].c;
            let c = &w[1];
            (c.h - c.l)
                .max((c.h - prev_c).abs())
                .max((c.l - prev_c).abs())
        })
        .collect();

    let mut value = true_ranges[..period].iter().sum::<f64>() / period as f64;
    for tr in &true_ranges[period..] {
        value = (value * (period as f64 - 1.0) + tr) / period as f64;
    }
    Some(value)
}

/// Short-window volume relative to the scaled longer-window average.
///
/// `vol_5m / (avg_vol_30m * 5)`; 0 when the denominator is not positive.
pub fn volume_spike(vol_5m: f64, avg_vol_30m: f64) -> f64 {
    if avg_vol_30m > 0.0 {
        vol_5m / (avg_vol_30m * 5.0)
    } else {
        0.0
    }
}

/// Buy/sell flow ratio over a window.
///
/// None when there is no sell volume; callers decide the polarity of that
/// case (buys with zero sells is positive flow, not absence of flow).
pub fn net_flow(buy_vol: f64, sell_vol: f64) -> Option<f64> {
    if sell_vol > 0.0 {
        Some(buy_vol / sell_vol)
    } else {
        None
    }
}
