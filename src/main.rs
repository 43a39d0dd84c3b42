// =============================================================================
// tapewatch — Main Entry Point
// =============================================================================
//
// Thin wrapper: config, logging, the display callback and Ctrl-C shutdown.
// Everything else lives in the library.
// =============================================================================

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tapewatch::config::Config;
use tapewatch::indicators::IndicatorState;
use tapewatch::market_data::{BinanceConnector, ReconnectSupervisor, Sample, UpdateFn};
use tapewatch::signals::SignalEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║             tapewatch — Starting Up                     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 2. Configuration ─────────────────────────────────────────────────
    // An explicitly named config file must exist; the default path may be
    // absent, in which case the built-in defaults apply.
    let mut config = match std::env::var("TAPEWATCH_CONFIG") {
        Ok(path) => Config::load(&path)?,
        Err(_) => Config::load("tapewatch.json").unwrap_or_else(|e| {
            warn!(error = %e, "failed to load config, using defaults");
            Config::default()
        }),
    };
    config.apply_env_overrides()?;
    config.validate()?;

    info!(
        symbol = %config.symbol,
        interval = %config.interval,
        source = %config.source,
        window_capacity = config.window_capacity,
        reconnect_delay_secs = config.reconnect_delay_secs,
        "watching feed"
    );

    // ── 3. Display callback + signal engine ──────────────────────────────
    let mut signal_engine = SignalEngine::new(config.signals.clone());
    let on_update: UpdateFn = Box::new(move |sample, state| {
        display_update(sample, state);

        if let Some(signal) = signal_engine.evaluate(sample, state) {
            info!(
                direction = %signal.direction,
                strength = signal.strength,
                price = signal.price,
                stop_loss = %format!("{:.2}", signal.stop_loss),
                take_profit = %format!("{:.2}", signal.take_profit),
                reasons = ?signal.reasons,
                "trade signal generated"
            );
        }
    });

    // ── 4. Supervised feed ───────────────────────────────────────────────
    let mut supervisor = ReconnectSupervisor::new(&config, BinanceConnector::new(), on_update);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown signal received — stopping gracefully");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("feed supervisor running. Press Ctrl+C to stop.");
    supervisor.run(shutdown_rx).await?;

    info!("tapewatch shut down complete.");
    Ok(())
}

/// Log one accepted sample with every indicator, rendering values that are
/// still warming up explicitly instead of hiding them behind zeros.
fn display_update(sample: &Sample, state: &IndicatorState) {
    let time = chrono::DateTime::from_timestamp_millis(sample.timestamp)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| sample.timestamp.to_string());

    info!(
        time = %time,
        price = sample.price,
        volume = sample.volume,
        rsi = %fmt_indicator(state.rsi),
        sma_short = %fmt_indicator(state.sma_short),
        sma_long = %fmt_indicator(state.sma_long),
        macd = %fmt_indicator(state.macd_line),
        macd_signal = %fmt_indicator(state.macd_signal),
        macd_histogram = %fmt_indicator(state.macd_histogram),
        vwap = %fmt_indicator(state.vwap),
        "tick"
    );
}

fn fmt_indicator(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => "warming up".to_string(),
    }
}
