//! Declarative, serializable description of a run: exchanges, portfolios, and strategies,
//! independent of the price data and [`Strategy`](crate::strategy::Strategy) implementations
//! themselves. Round-trips through [`HydraConfig::to_json`] / [`HydraConfig::from_json`].

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::asset::{AssetType, Frequency};
use crate::error::{HydraError, HydraResult};
use crate::risk::{RiskLimits, Tracer};

/// One exchange's static setup: where its asset data comes from and, optionally, which asset
/// anchors beta construction.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExchangeConfig {
    pub id: SmolStr,
    pub asset_type: AssetType,
    pub frequency: Frequency,
    /// Caller-defined location adapters resolve into the dense price matrices described in
    /// the external-interfaces contract; the engine itself does not interpret this string.
    pub source: SmolStr,
    pub datetime_format: SmolStr,
    pub asset_ids: Option<Vec<SmolStr>>,
    pub market_asset: Option<MarketAssetConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MarketAssetConfig {
    pub beta_lookback: usize,
}

/// One portfolio's static setup.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PortfolioConfig {
    pub id: SmolStr,
    pub starting_cash: f64,
    pub frequency: Frequency,
    pub benchmark_strategy: Option<SmolStr>,
}

/// One strategy's registration metadata, independent of its decision logic.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub id: SmolStr,
    pub portfolio: SmolStr,
    pub broker_index: usize,
    pub exchange_id: SmolStr,
    pub target_allocation: f64,
    /// Identifies which concrete [`Strategy`](crate::strategy::Strategy) implementation to
    /// instantiate; interpreted by the caller's strategy registry, not by the engine.
    pub strategy_type: SmolStr,
    pub trading_window: Option<TradingWindowConfig>,
    pub risk_limits: RiskLimitsConfig,
    pub tracers: Vec<Tracer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TradingWindowConfig {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct RiskLimitsConfig {
    pub max_leverage: Option<f64>,
    pub allow_shorting: bool,
}

impl From<RiskLimitsConfig> for RiskLimits {
    fn from(config: RiskLimitsConfig) -> Self {
        RiskLimits::new(config.max_leverage, config.allow_shorting)
    }
}

/// The full persisted document for one run: every exchange, portfolio, and strategy
/// registration the caller supplied to [`Engine::build`](crate::engine::Engine::build).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HydraConfig {
    pub exchanges: Vec<ExchangeConfig>,
    pub portfolios: Vec<PortfolioConfig>,
    pub strategies: Vec<StrategyConfig>,
}

impl HydraConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> HydraResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| HydraError::InvalidIO(e.to_string()))
    }

    pub fn from_json(json: &str) -> HydraResult<Self> {
        serde_json::from_str(json).map_err(|e| HydraError::InvalidIO(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> HydraConfig {
        HydraConfig {
            exchanges: vec![ExchangeConfig {
                id: "EXCH".into(),
                asset_type: AssetType::Equity,
                frequency: Frequency::Day1,
                source: "data/equities".into(),
                datetime_format: "%Y-%m-%d".into(),
                asset_ids: Some(vec!["AAPL".into(), "MSFT".into()]),
                market_asset: Some(MarketAssetConfig { beta_lookback: 20 }),
            }],
            portfolios: vec![PortfolioConfig {
                id: "P".into(),
                starting_cash: 100_000.0,
                frequency: Frequency::Day1,
                benchmark_strategy: None,
            }],
            strategies: vec![StrategyConfig {
                id: "S".into(),
                portfolio: "P".into(),
                broker_index: 0,
                exchange_id: "EXCH".into(),
                target_allocation: 1.0,
                strategy_type: "buy_and_hold".into(),
                trading_window: Some(TradingWindowConfig { start: 34_200, end: 57_600 }),
                risk_limits: RiskLimitsConfig { max_leverage: Some(2.0), allow_shorting: true },
                tracers: vec![Tracer::Nlv, Tracer::Leverage],
            }],
        }
    }

    #[test]
    fn round_trips_through_json() {
        let config = sample_config();
        let json = config.to_json().unwrap();
        let restored = HydraConfig::from_json(&json).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        assert!(HydraConfig::from_json("not json").is_err());
    }

    #[test]
    fn risk_limits_config_converts_to_risk_limits() {
        let config = RiskLimitsConfig { max_leverage: Some(1.5), allow_shorting: false };
        let limits: RiskLimits = config.into();
        assert!(limits.breached(2.0));
        assert!(!limits.breached(1.0));
    }
}
