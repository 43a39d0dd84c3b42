// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Step 1 — Price deltas from consecutive closes.
// Step 2 — Seed average gain / average loss with the simple average of the
//          first `period` deltas.
// Step 3 — Wilder's smoothing per subsequent delta:
//            avg = (prev_avg * (period - 1) + current) / period
// Step 4 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
// =============================================================================

/// Compute the RSI for the newest close in `closes`.
///
/// The whole window is re-smoothed on every call, so the value depends on
/// nothing but the input slice.
///
/// # Edge cases
/// - `period == 0` or `closes.len() < period + 1` => `None`
///   (a window of `n` closes only carries `n - 1` deltas)
/// - Average loss 0 with gains present => exactly 100.0
/// - Flat window (both averages 0) => exactly 50.0, never a division by zero
/// - Non-finite result => `None`
pub fn calculate_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let period_f = period as f64;

    // --- Step 1: deltas -------------------------------------------------
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    // --- Step 2: seed averages --------------------------------------------
    let (gain_sum, loss_sum) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l + d.abs())
            }
        });

    let mut avg_gain = gain_sum / period_f;
    let mut avg_loss = loss_sum / period_f;

    // --- Step 3: Wilder's smoothing over the remaining deltas --------------
    for &delta in &deltas[period..] {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
    }

    // --- Step 4: averages -> oscillator value ------------------------------
    rsi_from_averages(avg_gain, avg_loss)
}

/// Convert average gain / average loss into an RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0 // No movement at all — neutral.
    } else if avg_loss == 0.0 {
        100.0 // All gains, no losses.
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };

    rsi.is_finite().then_some(rsi)
}
