// =============================================================================
// Indicator engine — one snapshot in, one indicator state out
// =============================================================================

use serde::Serialize;

use crate::config::IndicatorParams;
use crate::market_data::SeriesSnapshot;

use super::macd::calculate_macd;
use super::rsi::calculate_rsi;
use super::sma::calculate_sma;
use super::vwap::calculate_vwap;

/// Rolling indicator values for the newest sample in the window.
///
/// Every field is `None` until its minimum period is satisfied; absence is
/// the explicit "insufficient data" marker, never a stand-in zero. A present
/// `macd_line` with an absent `macd_signal` means the signal EMA is still
/// warming up.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct IndicatorState {
    pub rsi: Option<f64>,
    pub sma_short: Option<f64>,
    pub sma_long: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub vwap: Option<f64>,
}

/// Recomputes the full [`IndicatorState`] from a window snapshot.
///
/// The engine holds nothing but its configured periods: `compute` is a pure
/// function of the snapshot, so recomputing an unchanged window always yields
/// an identical state.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    params: IndicatorParams,
}

impl IndicatorEngine {
    pub fn new(params: IndicatorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &IndicatorParams {
        &self.params
    }

    /// Compute the indicator state for the current window.
    pub fn compute(&self, snapshot: &SeriesSnapshot<'_>) -> IndicatorState {
        let closes = snapshot.closes();
        let volumes = snapshot.volumes();
        let p = &self.params;

        let macd = calculate_macd(&closes, p.macd_fast, p.macd_slow, p.macd_signal);

        IndicatorState {
            rsi: calculate_rsi(&closes, p.rsi_period),
            sma_short: calculate_sma(&closes, p.sma_short),
            sma_long: calculate_sma(&closes, p.sma_long),
            macd_line: macd.map(|m| m.line),
            macd_signal: macd.and_then(|m| m.signal),
            macd_histogram: macd.and_then(|m| m.histogram),
            vwap: calculate_vwap(&closes, &volumes),
        }
    }
}
