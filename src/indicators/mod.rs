// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the rolling indicators computed
// per accepted sample.  Every public function returns `Option<T>` so callers
// are forced to handle insufficient-data and numerical-edge-case scenarios.

pub mod engine;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod vwap;

pub use engine::{IndicatorEngine, IndicatorState};
pub use macd::MacdOutput;
