// =============================================================================
// Configuration — feed target, window sizing, indicator and signal parameters
// =============================================================================
//
// Everything tunable lives here. All fields carry `#[serde(default)]` so a
// partial JSON file keeps working as fields are added, and every check that
// must abort startup (unknown interval, degenerate periods) runs before the
// first connection attempt.
//
// =============================================================================

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::market_data::Subscription;

// =============================================================================
// Errors
// =============================================================================

/// Fatal configuration problems. Every variant aborts startup; none of them
/// is ever retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(
        "unknown interval '{0}' (expected one of: 1m, 3m, 5m, 15m, 30m, 1h, 2h, 4h, 6h, 8h, 12h, 1d, 3d, 1w, 1M)"
    )]
    UnknownInterval(String),

    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("window_capacity must be at least 1")]
    ZeroWindowCapacity,

    #[error("reconnect_delay_secs must be at least 1")]
    ZeroReconnectDelay,

    #[error("indicator periods must all be at least 1")]
    ZeroIndicatorPeriod,

    #[error("macd_fast ({fast}) must be less than macd_slow ({slow})")]
    MacdPeriodOrder { fast: usize, slow: usize },
}

// =============================================================================
// Interval
// =============================================================================

/// Kline interval accepted by the exchange.
///
/// Wire names are case-sensitive: minutes are lowercase (`1m`) while the
/// one-month interval is uppercase (`1M`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour8,
    Hour12,
    Day1,
    Day3,
    Week1,
    Month1,
}

impl Interval {
    /// Every interval the exchange offers, in ascending duration order.
    pub const ALL: [Interval; 15] = [
        Interval::Min1,
        Interval::Min3,
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Hour1,
        Interval::Hour2,
        Interval::Hour4,
        Interval::Hour6,
        Interval::Hour8,
        Interval::Hour12,
        Interval::Day1,
        Interval::Day3,
        Interval::Week1,
        Interval::Month1,
    ];

    /// The exchange wire name, as used in stream subscriptions.
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::Min1 => "1m",
            Interval::Min3 => "3m",
            Interval::Min5 => "5m",
            Interval::Min15 => "15m",
            Interval::Min30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour2 => "2h",
            Interval::Hour4 => "4h",
            Interval::Hour6 => "6h",
            Interval::Hour8 => "8h",
            Interval::Hour12 => "12h",
            Interval::Day1 => "1d",
            Interval::Day3 => "3d",
            Interval::Week1 => "1w",
            Interval::Month1 => "1M",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .iter()
            .copied()
            .find(|iv| iv.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownInterval(s.to_string()))
    }
}

impl TryFrom<String> for Interval {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Interval> for String {
    fn from(iv: Interval) -> Self {
        iv.as_str().to_string()
    }
}

// =============================================================================
// FeedSource
// =============================================================================

/// Which inbound messages become authoritative samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedSource {
    /// Closed-interval klines only; in-progress updates are ignored.
    Kline,
    /// Every aggregate-trade tick.
    AggTrade,
}

impl Default for FeedSource {
    fn default() -> Self {
        Self::Kline
    }
}

impl std::fmt::Display for FeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kline => write!(f, "kline"),
            Self::AggTrade => write!(f, "aggTrade"),
        }
    }
}

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_interval() -> Interval {
    Interval::Min1
}

fn default_window_capacity() -> usize {
    1000
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_rsi_period() -> usize {
    14
}

fn default_sma_short() -> usize {
    20
}

fn default_sma_long() -> usize {
    50
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_rsi_overbought() -> f64 {
    70.0
}

fn default_rsi_oversold() -> f64 {
    30.0
}

fn default_stop_loss_pct() -> f64 {
    2.0
}

fn default_take_profit_pct() -> f64 {
    3.0
}

fn default_volume_window() -> usize {
    20
}

fn default_min_samples() -> usize {
    50
}

// =============================================================================
// IndicatorParams
// =============================================================================

/// Look-back periods for the indicator engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorParams {
    /// RSI look-back (Wilder's smoothing).
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    /// Short simple moving average period.
    #[serde(default = "default_sma_short")]
    pub sma_short: usize,

    /// Long simple moving average period.
    #[serde(default = "default_sma_long")]
    pub sma_long: usize,

    /// MACD fast EMA period.
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,

    /// MACD slow EMA period.
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,

    /// MACD signal EMA period.
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            sma_short: default_sma_short(),
            sma_long: default_sma_long(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
        }
    }
}

// =============================================================================
// SignalParams
// =============================================================================

/// Thresholds and sizing for the rule-based signal engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalParams {
    /// RSI at or above which the market counts as overbought.
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,

    /// RSI at or below which the market counts as oversold.
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,

    /// Stop-loss distance as a percentage of the signal price.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Take-profit distance as a percentage of the signal price.
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,

    /// Rolling window for the volume-confirmation mean.
    #[serde(default = "default_volume_window")]
    pub volume_window: usize,

    /// Accepted samples required before any signal may fire.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            rsi_overbought: default_rsi_overbought(),
            rsi_oversold: default_rsi_oversold(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            volume_window: default_volume_window(),
            min_samples: default_min_samples(),
        }
    }
}

// =============================================================================
// Config
// =============================================================================

/// Top-level configuration.
///
/// Every field has a serde default so that older JSON files missing new
/// fields still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Symbol to watch, e.g. "BTCUSDT".
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Kline interval to subscribe to (ignored for the aggTrade source).
    #[serde(default = "default_interval")]
    pub interval: Interval,

    /// Maximum number of samples retained in the rolling window.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Fixed delay between reconnect attempts. Constant, never exponential.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Which messages become samples: closed klines or every trade tick.
    #[serde(default)]
    pub source: FeedSource,

    /// Indicator look-back periods.
    #[serde(default)]
    pub indicators: IndicatorParams,

    /// Signal-rule thresholds.
    #[serde(default)]
    pub signals: SignalParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: default_interval(),
            window_capacity: default_window_capacity(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            source: FeedSource::default(),
            indicators: IndicatorParams::default(),
            signals: SignalParams::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            interval = %config.interval,
            source = %config.source,
            "config loaded"
        );

        Ok(config)
    }

    /// Apply `TAPEWATCH_SYMBOL` / `TAPEWATCH_INTERVAL` environment overrides.
    ///
    /// A malformed interval here is as fatal as one in the file.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(symbol) = std::env::var("TAPEWATCH_SYMBOL") {
            if !symbol.trim().is_empty() {
                self.symbol = symbol.trim().to_uppercase();
            }
        }

        if let Ok(interval) = std::env::var("TAPEWATCH_INTERVAL") {
            self.interval = interval.trim().parse()?;
        }

        Ok(())
    }

    /// Validate everything that must abort startup. Runs before the first
    /// connection attempt; nothing here is retried.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if self.window_capacity == 0 {
            return Err(ConfigError::ZeroWindowCapacity);
        }
        if self.reconnect_delay_secs == 0 {
            return Err(ConfigError::ZeroReconnectDelay);
        }

        let ind = &self.indicators;
        if ind.rsi_period == 0
            || ind.sma_short == 0
            || ind.sma_long == 0
            || ind.macd_fast == 0
            || ind.macd_slow == 0
            || ind.macd_signal == 0
        {
            return Err(ConfigError::ZeroIndicatorPeriod);
        }
        if ind.macd_fast >= ind.macd_slow {
            return Err(ConfigError::MacdPeriodOrder {
                fast: ind.macd_fast,
                slow: ind.macd_slow,
            });
        }

        Ok(())
    }

    /// The single channel this process subscribes to.
    pub fn subscription(&self) -> Subscription {
        Subscription {
            symbol: self.symbol.clone(),
            interval: self.interval,
            source: self.source,
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}
