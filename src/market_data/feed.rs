use anyhow::{Context, Result};
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tracing::{debug, error, info, warn};

use crate::config::{FeedSource, Interval};
use crate::indicators::{IndicatorEngine, IndicatorState};

use super::series::{BoundedSeries, Sample};
use super::supervisor::ConnectionStatus;

// ---------------------------------------------------------------------------
// Connector seam
// ---------------------------------------------------------------------------

/// Errors crossing the connector seam.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport-level failure: dial, TLS, read or write.
    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// The peer vanished or the stream broke mid-session.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// The single channel one session subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub symbol: String,
    pub interval: Interval,
    pub source: FeedSource,
}

impl Subscription {
    /// Stream name for the SUBSCRIBE frame. The exchange wants lowercase
    /// symbols on the wire, but interval names keep their case: `1M` is the
    /// month interval, `1m` the minute.
    pub fn stream_name(&self) -> String {
        match self.source {
            FeedSource::Kline => {
                format!("{}@kline_{}", self.symbol.to_lowercase(), self.interval)
            }
            FeedSource::AggTrade => format!("{}@aggTrade", self.symbol.to_lowercase()),
        }
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source {
            FeedSource::Kline => write!(f, "{}@kline_{}", self.symbol, self.interval),
            FeedSource::AggTrade => write!(f, "{}@aggTrade", self.symbol),
        }
    }
}

/// Dials the exchange and hands back a connected message stream.
///
/// The session never touches sockets directly; everything transport-shaped
/// sits behind this seam so the resilience scenarios can run against
/// scripted feeds instead of live endpoints.
#[allow(async_fn_in_trait)]
pub trait FeedConnector {
    type Feed: FeedStream;

    async fn connect(&mut self, subscription: &Subscription) -> Result<Self::Feed, FeedError>;
}

/// One connected message stream.
///
/// `None` means the peer closed cleanly; `Some(Err(_))` is a transport
/// failure. Either way the stream is finished and must be dropped.
#[allow(async_fn_in_trait)]
pub trait FeedStream {
    async fn next_message(&mut self) -> Option<Result<String, FeedError>>;
}

// ---------------------------------------------------------------------------
// Message parsing
// ---------------------------------------------------------------------------

/// Classified inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    /// An authoritative sample per the configured source.
    Sample(Sample),
    /// Kline update for an interval that has not closed yet.
    InProgress,
    /// Subscription acknowledgement (`{"result":null,"id":1}`).
    Ack,
    /// Error payload pushed by the exchange.
    RemoteError(String),
}

/// Classify one text frame from the exchange.
pub(crate) fn parse_feed_message(text: &str, source: FeedSource) -> Result<Inbound> {
    let root: Value = serde_json::from_str(text).context("failed to parse feed JSON")?;

    // Control responses from the subscribe flow arrive before any event.
    if root.get("error").is_some() {
        return Ok(Inbound::RemoteError(root["error"].to_string()));
    }
    if root.get("result").is_some() {
        return Ok(Inbound::Ack);
    }

    let event = root["e"].as_str().context("missing field e")?;
    match (source, event) {
        (FeedSource::Kline, "kline") => parse_kline(&root),
        (FeedSource::AggTrade, "aggTrade") => parse_agg_trade(&root),
        _ => anyhow::bail!("unexpected event type '{event}' for {source} source"),
    }
}

/// Single-stream kline payload:
/// `{ "e": "kline", "s": "BTCUSDT", "k": { "t": …, "c": "…", "v": "…", "x": … } }`
fn parse_kline(root: &Value) -> Result<Inbound> {
    let k = &root["k"];

    let is_closed = k["x"].as_bool().context("missing field k.x")?;
    if !is_closed {
        return Ok(Inbound::InProgress);
    }

    let timestamp = k["t"].as_i64().context("missing field k.t")?;
    let price = parse_string_f64(&k["c"], "k.c")?;
    let volume = parse_string_f64(&k["v"], "k.v")?;

    Ok(Inbound::Sample(Sample {
        timestamp,
        price,
        volume,
    }))
}

/// Aggregate-trade payload:
/// `{ "e": "aggTrade", "p": "…", "q": "…", "T": … }`
fn parse_agg_trade(root: &Value) -> Result<Inbound> {
    let timestamp = root["T"].as_i64().context("missing field T")?;
    let price = parse_string_f64(&root["p"], "p")?;
    let volume = parse_string_f64(&root["q"], "q")?;

    Ok(Inbound::Sample(Sample {
        timestamp,
        price,
        volume,
    }))
}

/// Helper: Binance sends numeric values as JSON strings inside event objects.
fn parse_string_f64(val: &Value, name: &str) -> Result<f64> {
    match val {
        Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// FeedSession -- one connection lifecycle
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Streaming,
    Closed,
    Errored,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Closed => write!(f, "Closed"),
            Self::Errored => write!(f, "Errored"),
        }
    }
}

/// How a session finished. Returned to the supervisor, which owns the retry
/// policy; the session itself never reconnects.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed the stream cleanly.
    Closed,
    /// Connecting or streaming failed at the transport.
    Errored(FeedError),
}

impl SessionEnd {
    /// Reason string recorded into the shared connection status.
    pub fn reason(&self) -> String {
        match self {
            SessionEnd::Closed => "stream closed by peer".to_string(),
            SessionEnd::Errored(e) => e.to_string(),
        }
    }
}

/// Callback invoked once per accepted sample with the freshly recomputed
/// indicator state.
pub type UpdateFn = Box<dyn FnMut(&Sample, &IndicatorState) + Send>;

/// One connection lifecycle: Idle -> Connecting -> Streaming -> Closed/Errored.
///
/// The session borrows the series, engine and callback from the supervisor
/// for exactly its own lifetime, which is what keeps the series single-writer
/// by construction: no other `&mut` can exist while a session runs.
pub struct FeedSession<'a> {
    subscription: &'a Subscription,
    series: &'a mut BoundedSeries,
    engine: &'a IndicatorEngine,
    on_update: &'a mut UpdateFn,
    status: &'a ConnectionStatus,
    phase: SessionPhase,
}

impl<'a> FeedSession<'a> {
    pub fn new(
        subscription: &'a Subscription,
        series: &'a mut BoundedSeries,
        engine: &'a IndicatorEngine,
        on_update: &'a mut UpdateFn,
        status: &'a ConnectionStatus,
    ) -> Self {
        Self {
            subscription,
            series,
            engine,
            on_update,
            status,
            phase: SessionPhase::Idle,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn transition(&mut self, next: SessionPhase) {
        debug!(from = %self.phase, to = %next, "session phase change");
        self.phase = next;
    }

    /// Drive one full lifecycle. Consumes the session: a finished session is
    /// never reused, the supervisor builds a fresh one per attempt.
    pub async fn run<C: FeedConnector>(mut self, connector: &mut C) -> SessionEnd {
        self.transition(SessionPhase::Connecting);

        let mut feed = match connector.connect(self.subscription).await {
            Ok(feed) => feed,
            Err(e) => {
                self.transition(SessionPhase::Errored);
                error!(stream = %self.subscription, error = %e, "feed connection failed");
                return SessionEnd::Errored(e);
            }
        };

        self.transition(SessionPhase::Streaming);
        self.status.mark_open();
        info!(stream = %self.subscription, "feed session streaming");

        while let Some(item) = feed.next_message().await {
            match item {
                Ok(text) => self.handle_message(&text),
                Err(e) => {
                    self.transition(SessionPhase::Errored);
                    error!(stream = %self.subscription, error = %e, "feed read error");
                    return SessionEnd::Errored(e);
                }
            }
        }

        self.transition(SessionPhase::Closed);
        warn!(stream = %self.subscription, "feed stream ended");
        SessionEnd::Closed
    }

    /// Process one text frame. Bad frames are logged and skipped; nothing in
    /// here ever ends the session.
    fn handle_message(&mut self, text: &str) {
        match parse_feed_message(text, self.subscription.source) {
            Ok(Inbound::Sample(sample)) => self.accept(sample),
            Ok(Inbound::InProgress) => {} // Interval still open -- not authoritative.
            Ok(Inbound::Ack) => debug!(stream = %self.subscription, "subscription acknowledged"),
            Ok(Inbound::RemoteError(msg)) => {
                warn!(error = %msg, "exchange pushed an error payload");
            }
            Err(e) => {
                warn!(error = %e, "malformed feed message skipped");
            }
        }
    }

    fn accept(&mut self, sample: Sample) {
        match self.series.append(sample) {
            Ok(()) => {
                let state = self.engine.compute(&self.series.snapshot());
                (self.on_update)(&sample, &state);
            }
            Err(e) => {
                warn!(error = %e, "out-of-order sample skipped");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::config::IndicatorParams;

    fn kline_text(ts: i64, close: f64, volume: f64, closed: bool) -> String {
        serde_json::json!({
            "e": "kline",
            "E": ts + 59_999,
            "s": "BTCUSDT",
            "k": {
                "t": ts,
                "T": ts + 59_999,
                "s": "BTCUSDT",
                "i": "1m",
                "o": close.to_string(),
                "h": close.to_string(),
                "l": close.to_string(),
                "c": close.to_string(),
                "v": volume.to_string(),
                "n": 10,
                "x": closed,
                "q": "1000.0",
                "V": "5.0",
                "Q": "500.0"
            }
        })
        .to_string()
    }

    fn sub(source: FeedSource) -> Subscription {
        Subscription {
            symbol: "BTCUSDT".to_string(),
            interval: Interval::Min1,
            source,
        }
    }

    // ---- parse_feed_message ------------------------------------------------

    #[test]
    fn parse_closed_kline_yields_sample() {
        let text = kline_text(1_700_000_000_000, 37_020.5, 123.456, true);
        let parsed = parse_feed_message(&text, FeedSource::Kline).unwrap();
        assert_eq!(
            parsed,
            Inbound::Sample(Sample {
                timestamp: 1_700_000_000_000,
                price: 37_020.5,
                volume: 123.456,
            })
        );
    }

    #[test]
    fn parse_open_kline_is_in_progress() {
        let text = kline_text(1_700_000_000_000, 37_020.5, 123.456, false);
        let parsed = parse_feed_message(&text, FeedSource::Kline).unwrap();
        assert_eq!(parsed, Inbound::InProgress);
    }

    #[test]
    fn parse_agg_trade_yields_sample() {
        let text = r#"{
            "e": "aggTrade", "E": 1672515782136, "s": "BTCUSDT",
            "a": 12345, "p": "0.001", "q": "100",
            "f": 100, "l": 105, "T": 1672515782136, "m": true, "M": true
        }"#;
        let parsed = parse_feed_message(text, FeedSource::AggTrade).unwrap();
        assert_eq!(
            parsed,
            Inbound::Sample(Sample {
                timestamp: 1_672_515_782_136,
                price: 0.001,
                volume: 100.0,
            })
        );
    }

    #[test]
    fn parse_rejects_event_for_other_source() {
        let text = kline_text(0, 1.0, 1.0, true);
        let err = parse_feed_message(&text, FeedSource::AggTrade).unwrap_err();
        assert!(err.to_string().contains("unexpected event type"));
    }

    #[test]
    fn parse_subscribe_ack() {
        let parsed = parse_feed_message(r#"{"result":null,"id":1}"#, FeedSource::Kline).unwrap();
        assert_eq!(parsed, Inbound::Ack);
    }

    #[test]
    fn parse_remote_error_payload() {
        let text = r#"{"error":{"code":2,"msg":"Invalid request"},"id":1}"#;
        match parse_feed_message(text, FeedSource::Kline).unwrap() {
            Inbound::RemoteError(msg) => assert!(msg.contains("Invalid request")),
            other => panic!("expected RemoteError, got {other:?}"),
        }
    }

    #[test]
    fn parse_malformed_json_is_an_error() {
        assert!(parse_feed_message("{not json", FeedSource::Kline).is_err());
    }

    #[test]
    fn parse_missing_close_flag_is_an_error() {
        let text = r#"{"e":"kline","s":"BTCUSDT","k":{"t":0,"c":"1.0","v":"1.0"}}"#;
        let err = parse_feed_message(text, FeedSource::Kline).unwrap_err();
        assert!(err.to_string().contains("k.x"));
    }

    #[test]
    fn parse_accepts_plain_numbers() {
        let text = r#"{"e":"kline","s":"BTCUSDT","k":{"t":5,"c":2.5,"v":7,"x":true}}"#;
        let parsed = parse_feed_message(text, FeedSource::Kline).unwrap();
        assert_eq!(
            parsed,
            Inbound::Sample(Sample {
                timestamp: 5,
                price: 2.5,
                volume: 7.0,
            })
        );
    }

    // ---- FeedSession --------------------------------------------------------

    struct ScriptFeed {
        items: VecDeque<Result<String, FeedError>>,
    }

    impl FeedStream for ScriptFeed {
        async fn next_message(&mut self) -> Option<Result<String, FeedError>> {
            self.items.pop_front()
        }
    }

    struct ScriptConnector {
        feeds: VecDeque<ScriptFeed>,
    }

    impl FeedConnector for ScriptConnector {
        type Feed = ScriptFeed;

        async fn connect(&mut self, _subscription: &Subscription) -> Result<ScriptFeed, FeedError> {
            self.feeds
                .pop_front()
                .ok_or_else(|| FeedError::ConnectionLost("no scripted feed left".to_string()))
        }
    }

    fn script(items: Vec<Result<String, FeedError>>) -> ScriptConnector {
        ScriptConnector {
            feeds: VecDeque::from([ScriptFeed {
                items: items.into(),
            }]),
        }
    }

    #[tokio::test]
    async fn session_appends_and_notifies_only_accepted_samples() {
        let subscription = sub(FeedSource::Kline);
        let mut series = BoundedSeries::new(100);
        let engine = IndicatorEngine::new(IndicatorParams::default());
        let status = ConnectionStatus::new();

        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        let mut on_update: UpdateFn = Box::new(move |_sample, _state| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut connector = script(vec![
            Ok(r#"{"result":null,"id":1}"#.to_string()),
            Ok(kline_text(60_000, 100.0, 10.0, true)),
            Ok("{broken".to_string()),
            Ok(kline_text(120_000, 101.0, 10.0, false)), // in progress
            Ok(kline_text(120_000, 101.5, 10.0, true)),
            Ok(kline_text(60_000, 99.0, 10.0, true)), // out of order
        ]);

        let end = FeedSession::new(&subscription, &mut series, &engine, &mut on_update, &status)
            .run(&mut connector)
            .await;

        assert!(matches!(end, SessionEnd::Closed));
        assert_eq!(series.len(), 2);
        assert_eq!(series.snapshot().closes(), vec![100.0, 101.5]);
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn session_marks_status_open_once_streaming() {
        let subscription = sub(FeedSource::Kline);
        let mut series = BoundedSeries::new(10);
        let engine = IndicatorEngine::new(IndicatorParams::default());
        let status = ConnectionStatus::new();
        let mut on_update: UpdateFn = Box::new(|_, _| {});

        let mut connector = script(vec![]);
        let end = FeedSession::new(&subscription, &mut series, &engine, &mut on_update, &status)
            .run(&mut connector)
            .await;

        assert!(matches!(end, SessionEnd::Closed));
        assert_eq!(
            status.state(),
            crate::market_data::supervisor::ConnectionState::Open
        );
    }

    #[tokio::test]
    async fn session_surfaces_transport_error() {
        let subscription = sub(FeedSource::Kline);
        let mut series = BoundedSeries::new(10);
        let engine = IndicatorEngine::new(IndicatorParams::default());
        let status = ConnectionStatus::new();
        let mut on_update: UpdateFn = Box::new(|_, _| {});

        let mut connector = script(vec![
            Ok(kline_text(60_000, 100.0, 10.0, true)),
            Err(FeedError::ConnectionLost("simulated drop".to_string())),
        ]);

        let end = FeedSession::new(&subscription, &mut series, &engine, &mut on_update, &status)
            .run(&mut connector)
            .await;

        assert!(matches!(end, SessionEnd::Errored(_)));
        assert_eq!(end.reason(), "connection lost: simulated drop");
        assert_eq!(series.len(), 1);
    }

    #[tokio::test]
    async fn failed_connect_never_marks_open() {
        let subscription = sub(FeedSource::Kline);
        let mut series = BoundedSeries::new(10);
        let engine = IndicatorEngine::new(IndicatorParams::default());
        let status = ConnectionStatus::new();
        let mut on_update: UpdateFn = Box::new(|_, _| {});

        // Empty connector: connect itself fails.
        let mut connector = ScriptConnector {
            feeds: VecDeque::new(),
        };

        let end = FeedSession::new(&subscription, &mut series, &engine, &mut on_update, &status)
            .run(&mut connector)
            .await;

        assert!(matches!(end, SessionEnd::Errored(_)));
        assert_ne!(
            status.state(),
            crate::market_data::supervisor::ConnectionState::Open
        );
    }
}
