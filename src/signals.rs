// =============================================================================
// Signal engine — rule-based trade signals over consecutive indicator states
// =============================================================================
//
// Evaluated once per accepted sample, against the previous tick. Level rules
// (RSI) contribute a full point; crossover rules need both ticks on opposite
// sides of their reference line. Volume confirmation only ever reinforces a
// direction that another rule already picked.
// =============================================================================

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::SignalParams;
use crate::indicators::IndicatorState;
use crate::market_data::Sample;

/// Which way a signal points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalDirection {
    Long,
    Short,
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// One emitted trade signal with its protective levels and the rules that
/// fired.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSignal {
    pub direction: SignalDirection,
    pub strength: f64,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub reasons: Vec<String>,
    /// Timestamp of the sample that produced the signal, in milliseconds.
    pub at: i64,
}

/// What the previous tick looked like, for the crossover rules.
#[derive(Debug, Clone)]
struct PrevTick {
    price: f64,
    state: IndicatorState,
}

/// Stateful rule evaluator.
///
/// Keeps the previous tick, a rolling volume window and the accepted-sample
/// count. The supervisor owns the callback this lives behind, so all of it
/// survives reconnects alongside the sample window.
pub struct SignalEngine {
    params: SignalParams,
    prev: Option<PrevTick>,
    volumes: VecDeque<f64>,
    accepted: usize,
}

impl SignalEngine {
    pub fn new(params: SignalParams) -> Self {
        let capacity = params.volume_window;
        Self {
            params,
            prev: None,
            volumes: VecDeque::with_capacity(capacity + 1),
            accepted: 0,
        }
    }

    /// Evaluate the rules for one accepted sample.
    ///
    /// Returns `None` until `min_samples` samples have been seen and a
    /// previous tick exists, and whenever no rule fires. Rules whose inputs
    /// are still warming up simply contribute nothing.
    pub fn evaluate(&mut self, sample: &Sample, state: &IndicatorState) -> Option<TradeSignal> {
        self.accepted += 1;

        self.volumes.push_back(sample.volume);
        while self.volumes.len() > self.params.volume_window {
            self.volumes.pop_front();
        }

        let prev = self.prev.replace(PrevTick {
            price: sample.price,
            state: state.clone(),
        });

        if self.accepted < self.params.min_samples {
            return None;
        }
        let prev = prev?;

        let p = &self.params;
        let mut long = 0.0_f64;
        let mut short = 0.0_f64;
        let mut reasons: Vec<String> = Vec::new();

        // RSI level.
        if let Some(rsi) = state.rsi {
            if rsi < p.rsi_oversold {
                long += 1.0;
                reasons.push("RSI oversold".to_string());
            } else if rsi > p.rsi_overbought {
                short += 1.0;
                reasons.push("RSI overbought".to_string());
            }
        }

        // Moving-average cross.
        if let (Some(s), Some(l), Some(ps), Some(pl)) = (
            state.sma_short,
            state.sma_long,
            prev.state.sma_short,
            prev.state.sma_long,
        ) {
            if s > l && ps <= pl {
                long += 1.0;
                reasons.push("golden cross (short SMA crossed above long SMA)".to_string());
            } else if s < l && ps >= pl {
                short += 1.0;
                reasons.push("death cross (short SMA crossed below long SMA)".to_string());
            }
        }

        // MACD cross.
        if let (Some(line), Some(signal), Some(prev_line), Some(prev_signal)) = (
            state.macd_line,
            state.macd_signal,
            prev.state.macd_line,
            prev.state.macd_signal,
        ) {
            if line > signal && prev_line <= prev_signal {
                long += 1.0;
                reasons.push("MACD bullish crossover".to_string());
            } else if line < signal && prev_line >= prev_signal {
                short += 1.0;
                reasons.push("MACD bearish crossover".to_string());
            }
        }

        // Volume confirmation, before the VWAP rule: a pure-VWAP signal gets
        // no volume bump.
        if (long > 0.0 || short > 0.0) && sample.volume > self.volume_mean() {
            if long > 0.0 {
                long += 0.5;
            }
            if short > 0.0 {
                short += 0.5;
            }
            reasons.push("high volume confirmation".to_string());
        }

        // VWAP cross.
        if let (Some(vwap), Some(prev_vwap)) = (state.vwap, prev.state.vwap) {
            if sample.price > vwap && prev.price <= prev_vwap {
                long += 0.5;
                reasons.push("price crossed above VWAP".to_string());
            } else if sample.price < vwap && prev.price >= prev_vwap {
                short += 0.5;
                reasons.push("price crossed below VWAP".to_string());
            }
        }

        if long == 0.0 && short == 0.0 {
            return None;
        }

        // Ties resolve long.
        let (direction, strength) = if long >= short {
            (SignalDirection::Long, long)
        } else {
            (SignalDirection::Short, short)
        };

        let price = sample.price;
        let (stop_loss, take_profit) = match direction {
            SignalDirection::Long => (
                price * (1.0 - p.stop_loss_pct / 100.0),
                price * (1.0 + p.take_profit_pct / 100.0),
            ),
            SignalDirection::Short => (
                price * (1.0 + p.stop_loss_pct / 100.0),
                price * (1.0 - p.take_profit_pct / 100.0),
            ),
        };

        Some(TradeSignal {
            direction,
            strength,
            price,
            stop_loss,
            take_profit,
            reasons,
            at: sample.timestamp,
        })
    }

    /// Mean of the rolling volume window, current sample included.
    fn volume_mean(&self) -> f64 {
        if self.volumes.is_empty() {
            return 0.0;
        }
        self.volumes.iter().sum::<f64>() / self.volumes.len() as f64
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SignalParams {
        SignalParams {
            min_samples: 2,
            ..SignalParams::default()
        }
    }

    fn sample(ts: i64, price: f64, volume: f64) -> Sample {
        Sample {
            timestamp: ts,
            price,
            volume,
        }
    }

    fn neutral_state() -> IndicatorState {
        IndicatorState {
            rsi: Some(50.0),
            sma_short: Some(100.0),
            sma_long: Some(100.0),
            macd_line: Some(0.0),
            macd_signal: Some(0.0),
            macd_histogram: Some(0.0),
            vwap: Some(100.0),
        }
    }

    /// Feed one neutral tick so the engine has a previous state.
    fn warmed_engine(prev: &IndicatorState) -> SignalEngine {
        let mut engine = SignalEngine::new(params());
        assert!(engine.evaluate(&sample(0, 100.0, 10.0), prev).is_none());
        engine
    }

    #[test]
    fn no_signal_below_min_samples() {
        let mut engine = SignalEngine::new(SignalParams::default()); // min_samples = 50
        let state = IndicatorState {
            rsi: Some(10.0), // Would fire if the gate were open.
            ..Default::default()
        };
        for i in 0..49 {
            assert!(engine.evaluate(&sample(i, 100.0, 10.0), &state).is_none());
        }
    }

    #[test]
    fn no_signal_when_nothing_fires() {
        let prev = neutral_state();
        let mut engine = warmed_engine(&prev);
        assert!(engine.evaluate(&sample(1, 100.0, 10.0), &prev).is_none());
    }

    #[test]
    fn rsi_oversold_fires_long() {
        let mut engine = warmed_engine(&neutral_state());
        let state = IndicatorState {
            rsi: Some(25.0),
            ..neutral_state()
        };

        let signal = engine.evaluate(&sample(1, 100.0, 10.0), &state).unwrap();
        assert_eq!(signal.direction, SignalDirection::Long);
        assert!((signal.strength - 1.0).abs() < f64::EPSILON);
        assert_eq!(signal.reasons, vec!["RSI oversold"]);
        assert!((signal.stop_loss - 98.0).abs() < 1e-10);
        assert!((signal.take_profit - 103.0).abs() < 1e-10);
    }

    #[test]
    fn rsi_overbought_fires_short_with_mirrored_levels() {
        let mut engine = warmed_engine(&neutral_state());
        let state = IndicatorState {
            rsi: Some(80.0),
            ..neutral_state()
        };

        let signal = engine.evaluate(&sample(1, 100.0, 10.0), &state).unwrap();
        assert_eq!(signal.direction, SignalDirection::Short);
        assert!((signal.stop_loss - 102.0).abs() < 1e-10);
        assert!((signal.take_profit - 97.0).abs() < 1e-10);
    }

    #[test]
    fn golden_cross_needs_both_ticks() {
        // Short SMA already above on both ticks: a level, not a cross.
        let above = IndicatorState {
            sma_short: Some(101.0),
            sma_long: Some(100.0),
            ..neutral_state()
        };
        let mut engine = warmed_engine(&above);
        assert!(engine.evaluate(&sample(1, 100.0, 10.0), &above).is_none());

        // Now an actual cross: below-or-equal then above.
        let mut engine = warmed_engine(&neutral_state());
        let signal = engine.evaluate(&sample(1, 100.0, 10.0), &above).unwrap();
        assert_eq!(signal.direction, SignalDirection::Long);
        assert_eq!(
            signal.reasons,
            vec!["golden cross (short SMA crossed above long SMA)"]
        );
    }

    #[test]
    fn death_cross_fires_short() {
        let below = IndicatorState {
            sma_short: Some(99.0),
            sma_long: Some(100.0),
            ..neutral_state()
        };
        let mut engine = warmed_engine(&neutral_state());
        let signal = engine.evaluate(&sample(1, 100.0, 10.0), &below).unwrap();
        assert_eq!(signal.direction, SignalDirection::Short);
    }

    #[test]
    fn macd_bullish_crossover_fires_long() {
        let crossed = IndicatorState {
            macd_line: Some(0.5),
            macd_signal: Some(0.2),
            ..neutral_state()
        };
        let mut engine = warmed_engine(&neutral_state());
        let signal = engine.evaluate(&sample(1, 100.0, 10.0), &crossed).unwrap();
        assert_eq!(signal.direction, SignalDirection::Long);
        assert_eq!(signal.reasons, vec!["MACD bullish crossover"]);
    }

    #[test]
    fn volume_confirmation_adds_half_point() {
        let mut engine = warmed_engine(&neutral_state());
        let state = IndicatorState {
            rsi: Some(25.0),
            ..neutral_state()
        };

        // Window holds [10.0, 50.0]; mean 30 < 50, so the bump applies.
        let signal = engine.evaluate(&sample(1, 100.0, 50.0), &state).unwrap();
        assert!((signal.strength - 1.5).abs() < f64::EPSILON);
        assert!(signal
            .reasons
            .iter()
            .any(|r| r == "high volume confirmation"));
    }

    #[test]
    fn pure_vwap_cross_gets_no_volume_bump() {
        let mut engine = warmed_engine(&neutral_state());
        let state = IndicatorState {
            vwap: Some(99.0), // Price 101 above, previous price 100 was <= 100.
            ..neutral_state()
        };

        let signal = engine.evaluate(&sample(1, 101.0, 500.0), &state).unwrap();
        assert_eq!(signal.direction, SignalDirection::Long);
        assert!((signal.strength - 0.5).abs() < f64::EPSILON);
        assert_eq!(signal.reasons, vec!["price crossed above VWAP"]);
    }

    #[test]
    fn absent_indicators_contribute_nothing() {
        let mut engine = warmed_engine(&IndicatorState::default());
        assert!(engine
            .evaluate(&sample(1, 100.0, 10.0), &IndicatorState::default())
            .is_none());
    }

    #[test]
    fn tie_resolves_long() {
        // RSI oversold (long +1) against a death cross (short +1); the high
        // volume bump then reinforces both sides equally.
        let state = IndicatorState {
            rsi: Some(25.0),
            sma_short: Some(99.0),
            sma_long: Some(100.0),
            ..neutral_state()
        };
        let mut engine = warmed_engine(&neutral_state());
        let signal = engine.evaluate(&sample(1, 100.0, 50.0), &state).unwrap();
        assert_eq!(signal.direction, SignalDirection::Long);
        assert!((signal.strength - 1.5).abs() < f64::EPSILON);
    }
}
