// =============================================================================
// Volume-Weighted Average Price (VWAP) — windowed
// =============================================================================
//
// vwap = sum(price_i * volume_i) / sum(volume_i), taken over the *current
// window only*. There is no session anchor: as the series evicts old samples
// the weighting window slides with them.
// =============================================================================

/// Compute the VWAP of the window. `prices` and `volumes` are the aligned
/// column views of the same snapshot.
///
/// # Edge cases
/// - empty window or mismatched lengths => `None`
/// - total volume 0 => `None` (no division by zero)
/// - non-finite result => `None`
pub fn calculate_vwap(prices: &[f64], volumes: &[f64]) -> Option<f64> {
    if prices.is_empty() || prices.len() != volumes.len() {
        return None;
    }

    let mut weighted_sum = 0.0;
    let mut total_volume = 0.0;
    for (price, volume) in prices.iter().zip(volumes) {
        weighted_sum += price * volume;
        total_volume += volume;
    }

    if total_volume > 0.0 {
        let vwap = weighted_sum / total_volume;
        vwap.is_finite().then_some(vwap)
    } else {
        None
    }
}
