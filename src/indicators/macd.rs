// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// macd_line = EMA(closes, fast) - EMA(closes, slow)     (defaults 12 / 26)
// signal    = EMA(macd_line series, signal)             (default 9)
// histogram = macd_line - signal
//
// Each EMA uses multiplier 2 / (period + 1) and is seeded with the SMA of its
// first `period` inputs, so the fast and slow series start at different close
// indices and must be re-aligned before subtracting.
// =============================================================================

use serde::Serialize;

/// MACD values for the newest close.
///
/// `signal` and `histogram` stay `None` while the window holds at least
/// `slow` but fewer than `slow + signal` closes: the line is meaningful
/// there but the signal EMA is still warming up, and that gap is reported
/// explicitly instead of being backfilled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdOutput {
    pub line: f64,
    pub signal: Option<f64>,
    pub histogram: Option<f64>,
}

/// Compute MACD over `closes`.
///
/// # Edge cases
/// - any zero period, or `fast >= slow` => `None` (config validates; this guards)
/// - `closes.len() < slow` => `None`
/// - `slow <= closes.len() < slow + signal` => line only, signal-incomplete
/// - non-finite line => `None`
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<MacdOutput> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow || closes.len() < slow {
        return None;
    }

    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);

    // fast_ema[i] sits at close index `fast - 1 + i`, slow_ema[i] at
    // `slow - 1 + i`; shift the fast series so both refer to the same close.
    let offset = slow - fast;
    let macd_series: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, s)| fast_ema[i + offset] - s)
        .collect();

    let line = *macd_series.last()?;
    if !line.is_finite() {
        // A NaN anywhere in the inputs rides the recurrences all the way to
        // the newest value, so this one check covers the whole window.
        return None;
    }

    if closes.len() < slow + signal {
        return Some(MacdOutput {
            line,
            signal: None,
            histogram: None,
        });
    }

    let signal_value = *ema_series(&macd_series, signal).last()?;

    Some(MacdOutput {
        line,
        signal: Some(signal_value),
        histogram: Some(line - signal_value),
    })
}

/// EMA series over `values`: one output per input starting at index
/// `period - 1`, seeded with the SMA of the first `period` values.
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period + 1) as f64;
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);

    let mut prev = seed;
    for &value in &values[period..] {
        prev = value * multiplier + prev * (1.0 - multiplier);
        out.push(prev);
    }

    out
}
