// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Arithmetic mean of the most recent `period` close prices. Used directly
// for the short/long moving-average pair watched by the signal rules.
// =============================================================================

/// Compute the SMA over the most recent `period` closes.
///
/// # Edge cases
/// - `period == 0` => `None` (division guard)
/// - `closes.len() < period` => `None` (insufficient data)
/// - Non-finite mean => `None`
pub fn calculate_sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;

    mean.is_finite().then_some(mean)
}
