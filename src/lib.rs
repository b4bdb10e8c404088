#![warn(
    missing_copy_implementations,
    clippy::too_many_arguments,
    rust_2018_idioms
)]

//! # Hydra
//! An event-driven, historical backtesting engine for multi-asset trading strategies.
//! * **Deterministic**: every fill is matched against a published price on a fixed two-leg
//!   (open, close) per-tick sequence; re-running the same configuration against the same data
//!   reproduces the same history bit-for-bit.
//! * **Data-oriented**: assets, orders, positions and trades are plain value types addressed by
//!   dense integer index, not shared pointers.
//! * **Composable**: `Strategy` is the only trait a caller implements; everything else (routing,
//!   matching, risk tracing, statistics) is provided.
//!
//! ## Overview
//! Given one or more time-ordered asset price datasets (grouped into [`Exchange`](exchange::Exchange)s),
//! a set of [`Portfolio`](portfolio::Portfolio)s (capital pools), and a set of
//! [`Strategy`](strategy::Strategy) implementations, [`Engine`](engine::Engine) simulates the
//! passage of market time bar-by-bar:
//!
//! 1. The global clock advances and every exchange steps its local cursor.
//! 2. Each exchange's open-leg order queue is matched against the newly published price.
//! 3. Eligible strategies run in registration order and may emit orders through the
//!    [`Router`](router::Router).
//! 4. The router dispatches pending orders to the exchange that owns their asset.
//! 5. Each exchange's close-leg order queue is matched.
//! 6. Filled orders fan out to their portfolios, which mutate positions and trades.
//! 7. Portfolios evaluate trade exits; risk tracers re-evaluate NLV, leverage, beta and
//!    volatility per strategy, disabling any strategy that breaches its configured limits.
//!
//! A per-tick [`TradingSummaryGenerator`](statistic::TradingSummaryGenerator) accumulates the
//! Sharpe ratio, max drawdown, win rate and profit factor of each portfolio's closed trades.
//!
//! ## Getting Started
//! ```
//! use hydra_backtest::asset::{Asset, AssetType, Frequency};
//! use hydra_backtest::engine::Engine;
//! use hydra_backtest::exchange::Exchange;
//! use hydra_backtest::risk::RiskLimits;
//! use hydra_backtest::statistic::TradingSummaryConfig;
//!
//! let dt: Vec<i64> = (0..3).map(|i| i * 86_400_000_000_000).collect();
//! let data = vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0];
//! let columns = vec![("open".into(), 0), ("close".into(), 1)];
//! let asset = Asset::new(
//!     "AAA", "EXCH", AssetType::Equity, Frequency::Day1, "UTC", 1.0, 0, columns, data, dt,
//! ).unwrap();
//!
//! let mut exchange = Exchange::new("EXCH", AssetType::Equity, Frequency::Day1);
//! exchange.add_asset(asset);
//! exchange.build().unwrap();
//!
//! let mut engine = Engine::new(false);
//! engine.new_exchange(exchange).unwrap();
//! let portfolio = engine.new_portfolio("P", 10_000.0, Frequency::Day1, TradingSummaryConfig::default());
//! let _ = portfolio;
//! engine.build().unwrap();
//! while engine.step().unwrap() {}
//! ```

/// Crate-wide typed error taxonomy consumed by every fallible operation below.
pub mod error;

/// Structured `tracing` initialization for build/step/order lifecycle instrumentation.
pub mod logging;

/// Union-sorted global clock over per-asset datetime vectors.
pub mod time;

/// Incremental (online) covariance estimator shared by asset observers and the exchange map's
/// pairwise matrix.
pub mod covariance;

/// Column-typed asset price series: cursor, warmup, observer notification, beta/volatility
/// column construction.
pub mod asset;

/// Groups aligned assets, matches pending orders against published prices, maintains a market
/// clock, and its ranked snapshot view.
pub mod exchange;

/// Merges every `Exchange`'s datetime vector into one global clock and owns the global
/// asset-index space and cross-asset covariance matrix.
pub mod exchange_map;

/// Plain value type describing order intents, state, and fill outcomes.
pub mod order;

/// Per-(asset, strategy) lot aggregation with average-price accounting, and configurable exit
/// rules.
pub mod trade;

/// Per-asset aggregate position across every strategy trading it within a portfolio.
pub mod position;

/// Single-writer order queue dispatching pending orders to exchanges and fills to portfolios.
pub mod router;

/// Aggregates positions, holds cash, tracks net liquidation value, hosts registered strategies.
pub mod portfolio;

/// Decision unit: consumes exchange views, emits orders, owns per-strategy risk tracers.
pub mod strategy;

/// Incremental risk tracers (NLV, cash, leverage, beta, volatility) and limit-breach detection.
pub mod risk;

/// Derives a trading-performance summary (Sharpe, Sortino, drawdown, win rate, profit factor)
/// from tracer and trade history.
pub mod statistic;

/// Round-trippable persisted description of a run's exchanges, portfolios and strategies.
pub mod config;

/// Drives the per-tick step loop and owns the lifecycle of every exchange, portfolio and
/// strategy.
pub mod engine;

#[macro_use]
extern crate prettytable;
