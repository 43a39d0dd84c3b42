pub mod binance;
pub mod feed;
pub mod series;
pub mod supervisor;

// Re-export the data-path types for convenient access
// (e.g. `use tapewatch::market_data::Sample`).
pub use binance::BinanceConnector;
pub use feed::{
    FeedConnector, FeedError, FeedSession, FeedStream, SessionEnd, SessionPhase, Subscription,
    UpdateFn,
};
pub use series::{BoundedSeries, OutOfOrderSample, Sample, SeriesSnapshot};
pub use supervisor::{ConnectionState, ConnectionStatus, ReconnectSupervisor};
