// Engine configuration types. The adaptive engine rebuilds its detector when
// the configuration changes; the exchange engine reads its parameters once at
// construction.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

/// Recoverable configuration errors surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `set_regime_threshold` was called with an unrecognised threshold kind.
    #[error("unknown regime threshold kind: {0}")]
    UnknownThreshold(String),
}

/// Configuration for the adaptive engine and its regime detector.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Run a regime classification every this many observations.
    pub detection_interval: u64,
    /// Capacity of the price/volume/spread windows.
    pub window_size: usize,
    /// Coefficient-of-variation gate for HIGH_VOLATILITY.
    pub volatility_threshold: f64,
    /// Mean-spread gate for ILLIQUID.
    pub spread_threshold: f64,
    /// Volume-imbalance gate for DIRECTIONAL.
    pub imbalance_threshold: f64,
    /// Cancellation-rate gate for HIGH_FREQUENCY.
    pub cancellation_threshold: f64,
    /// When false the engine behaves as the base matching engine.
    pub enable_regime_detection: bool,
    /// When false no metrics-history samples are appended.
    pub enable_metrics_recording: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detection_interval: 100,
            window_size: 100,
            volatility_threshold: 0.05,
            spread_threshold: 0.02,
            imbalance_threshold: 0.5,
            cancellation_threshold: 0.25,
            enable_regime_detection: true,
            enable_metrics_recording: true,
        }
    }
}

impl EngineConfig {
    /// Sets one regime gate by name. Recognised kinds are `volatility`,
    /// `spread`, `imbalance` and `cancellation`; anything else is an error.
    pub fn set_threshold(&mut self, kind: &str, value: f64) -> Result<(), ConfigError> {
        match kind {
            "volatility" => self.volatility_threshold = value,
            "spread" => self.spread_threshold = value,
            "imbalance" => self.imbalance_threshold = value,
            "cancellation" => self.cancellation_threshold = value,
            other => return Err(ConfigError::UnknownThreshold(other.to_string())),
        }
        Ok(())
    }
}

/// Configuration for the exchange-style engine. Percentages are fractions:
/// a `circuit_breaker_pct` of `0.10` halts on a 10% move from the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeConfig {
    /// Trading symbol, informational only.
    pub symbol: String,
    /// Minimum price increment; limit and stop prices are rounded to it.
    pub tick_size: Decimal,
    /// Halt threshold as a fraction of the reference price.
    pub circuit_breaker_pct: Decimal,
    /// Admission band half-width as a fraction of the reference price.
    pub price_band_pct: Decimal,
    /// Enable the background cancellation worker.
    pub async_cancel: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            symbol: "NIFTY".to_string(),
            tick_size: dec!(0.05),
            circuit_breaker_pct: dec!(0.10),
            price_band_pct: dec!(0.20),
            async_cancel: false,
        }
    }
}
