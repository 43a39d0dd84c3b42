// =============================================================================
// tapewatch — single-feed market watcher with rolling indicators
// =============================================================================
//
// One websocket stream in, a bounded FIFO window of accepted samples, a full
// indicator recompute per sample, rule-based trade signals, and a supervisor
// that reconnects forever on a fixed delay without dropping accumulated
// state. The binary in `main.rs` only wires config, logging, the display
// callback and Ctrl-C shutdown around this library.
// =============================================================================

pub mod config;
pub mod indicators;
pub mod market_data;
pub mod signals;
