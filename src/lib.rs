// Expose the modules
pub mod adaptive;
pub mod book;
pub mod config;
pub mod engine;
pub mod exchange;
pub mod level;
pub mod matching;
pub mod regime;
pub mod sharded;
pub mod snapshot;
pub mod types;

// Re-export key types for easier usage
pub use adaptive::{AdaptiveEngine, discipline_for};
pub use book::{BookFill, BookSide};
pub use config::{ConfigError, EngineConfig, ExchangeConfig};
pub use engine::MatchEngine;
pub use exchange::{ExchangeEngine, ExchangeStatistics};
pub use level::{Discipline, PriceLevel};
pub use regime::{MarketMetrics, RegimeDetector};
pub use sharded::{ShardedAdaptiveEngine, ShardedBookSide, ShardedEngine, ShardedStatistics};
pub use snapshot::{
    BookSnapshot, DepthLevel, EngineStatistics, MetricsSample, RegimeChange, RegimeStatistics,
};
pub use types::{
    MarketRegime, Order, OrderError, OrderKind, Side, Trade, TradingPhase, Validity,
};
