//! End-to-end scenarios driven entirely through the public API: build exchanges/portfolios/
//! strategies, run the engine, and check the resulting history against hand-computed values.

use approx::assert_relative_eq;

use hydra_backtest::asset::{Asset, AssetType, Frequency};
use hydra_backtest::engine::Engine;
use hydra_backtest::error::{HydraError, HydraResult};
use hydra_backtest::exchange::{Exchange, ExchangeView};
use hydra_backtest::order::{Order, OrderState, OrderType};
use hydra_backtest::risk::RiskLimits;
use hydra_backtest::statistic::TradingSummaryConfig;
use hydra_backtest::strategy::{strategy_allocate, AllocType, Allocation, Strategy, StrategyMeta};
use hydra_backtest::trade::TradeExit;

const DAY_NS: i64 = 86_400_000_000_000;

fn dt_index(n: usize) -> Vec<i64> {
    (0..n as i64).map(|i| i * DAY_NS).collect()
}

/// An asset whose open and close are equal on every bar, so the two-leg matching sequence
/// can't introduce an open-vs-close ambiguity into the expected numbers below.
fn symmetric_asset(id: &str, closes: &[f64]) -> Asset {
    let mut data = Vec::with_capacity(closes.len() * 2);
    for &c in closes {
        data.push(c);
        data.push(c);
    }
    Asset::new(
        id,
        "EXCH",
        AssetType::Equity,
        Frequency::Day1,
        "America/New_York",
        1.0,
        0,
        vec![("open".into(), 0), ("close".into(), 1)],
        data,
        dt_index(closes.len()),
    )
    .unwrap()
}

/// Like [`symmetric_asset`] but typed as a `Future` with a non-1.0 contract size, so P&L/NLV
/// math that forgets the multiplier shows up as a wrong number rather than a coincidentally
/// correct one.
fn symmetric_future_asset(id: &str, closes: &[f64], unit_multiplier: f64) -> Asset {
    let mut data = Vec::with_capacity(closes.len() * 2);
    for &c in closes {
        data.push(c);
        data.push(c);
    }
    Asset::new(
        id,
        "EXCH",
        AssetType::Future,
        Frequency::Day1,
        "America/New_York",
        unit_multiplier,
        0,
        vec![("open".into(), 0), ("close".into(), 1)],
        data,
        dt_index(closes.len()),
    )
    .unwrap()
}

fn default_statistic_config() -> TradingSummaryConfig {
    TradingSummaryConfig { starting_equity: 10_000.0, trading_days_per_year: 252, risk_free_return: 0.0 }
}

/// Buys `units` of the first asset in its view, once, on the first eligible tick. Attaches
/// `exit` (if any) to that single order.
struct BuyOnce {
    meta: StrategyMeta,
    units: f64,
    exit: Option<TradeExit>,
    done: bool,
}

impl Strategy for BuyOnce {
    fn meta(&self) -> &StrategyMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut StrategyMeta {
        &mut self.meta
    }

    fn next(&mut self, view: &ExchangeView, create_time: i64, next_order_id: &mut u64) -> HydraResult<Vec<Order>> {
        if self.done || view.is_empty() {
            return Ok(Vec::new());
        }
        self.done = true;
        let &(asset_index, _) = &view.entries()[0];
        let allocation = vec![Allocation { asset_index, target: self.units }];
        strategy_allocate(
            self.meta.index,
            self.meta.portfolio_index,
            self.meta.broker_index,
            &allocation,
            |_| Some(0.0),
            |_| Some(1.0),
            10_000.0,
            0.0,
            false,
            self.exit.clone(),
            AllocType::Units,
            std::iter::empty(),
            next_order_id,
            create_time,
        )
    }
}

/// Rebalances every asset in its view to a fraction of portfolio NLV, once, on the first
/// eligible tick.
struct AllocateOnce {
    meta: StrategyMeta,
    fraction_per_asset: f64,
    nlv: f64,
    done: bool,
}

impl Strategy for AllocateOnce {
    fn meta(&self) -> &StrategyMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut StrategyMeta {
        &mut self.meta
    }

    fn next(&mut self, view: &ExchangeView, create_time: i64, next_order_id: &mut u64) -> HydraResult<Vec<Order>> {
        if self.done || view.is_empty() {
            return Ok(Vec::new());
        }
        self.done = true;
        let prices: std::collections::HashMap<usize, f64> = view.entries().iter().copied().collect();
        let allocation: Vec<Allocation> = view
            .entries()
            .iter()
            .map(|&(asset_index, _)| Allocation { asset_index, target: self.fraction_per_asset })
            .collect();
        strategy_allocate(
            self.meta.index,
            self.meta.portfolio_index,
            self.meta.broker_index,
            &allocation,
            |_| Some(0.0),
            |asset_index| prices.get(&asset_index).copied(),
            self.nlv,
            0.0,
            false,
            None,
            AllocType::FractionNlv,
            std::iter::empty(),
            next_order_id,
            create_time,
        )
    }
}

/// Places a single fixed-size `MARKET` order directly, bypassing `strategy_allocate`, so the
/// leverage arithmetic below stays exact and transparent.
struct OverleverOnce {
    meta: StrategyMeta,
    units: f64,
    done: bool,
}

impl Strategy for OverleverOnce {
    fn meta(&self) -> &StrategyMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut StrategyMeta {
        &mut self.meta
    }

    fn next(&mut self, view: &ExchangeView, create_time: i64, next_order_id: &mut u64) -> HydraResult<Vec<Order>> {
        if self.done || view.is_empty() {
            return Ok(Vec::new());
        }
        self.done = true;
        let &(asset_index, _) = &view.entries()[0];
        let id = *next_order_id;
        *next_order_id += 1;
        let order = Order::new(
            id,
            OrderType::Market,
            asset_index,
            self.units,
            self.meta.index,
            self.meta.portfolio_index,
            self.meta.broker_index,
            create_time,
            None,
            false,
        )?;
        Ok(vec![order])
    }
}

/// Builds a single-exchange, single-portfolio engine around `closes` and registers `strategy`
/// against it. The strategy's `meta().portfolio_index` must already be `0` (the index of the
/// only portfolio registered here).
fn single_asset_engine(closes: &[f64], strategy: Box<dyn Strategy>, limits: RiskLimits) -> Engine {
    let mut engine = Engine::new(false);
    let mut exchange = Exchange::new("EXCH", AssetType::Equity, Frequency::Day1);
    exchange.add_asset(symmetric_asset("A", closes));
    exchange.build().unwrap();
    engine.new_exchange(exchange).unwrap();

    engine.new_portfolio("P", 10_000.0, Frequency::Day1, default_statistic_config());
    engine.register_strategy(strategy, limits).unwrap();
    engine.build().unwrap();
    engine
}

// S1: buy-and-hold on a single rising asset; NLV tracks cash plus position NLV to the cent.
#[test]
fn s1_buy_and_hold_tracks_unrealized_pl_into_nlv() {
    let closes = [100.0, 101.0, 102.0, 103.0];
    let meta = StrategyMeta::new("S", 0, 0, 0, "EXCH", 1.0);
    let strategy = Box::new(BuyOnce { meta, units: 10.0, exit: None, done: false });
    let mut engine = single_asset_engine(&closes, strategy, RiskLimits::new(None, true));

    engine.step().unwrap();
    let portfolio = engine.portfolio(0).unwrap();
    assert_relative_eq!(portfolio.position(0).unwrap().units(), 10.0);
    assert_relative_eq!(portfolio.position(0).unwrap().average_price(), 100.0);

    engine.step().unwrap();
    engine.step().unwrap();
    let portfolio = engine.portfolio(0).unwrap();
    assert_relative_eq!(portfolio.nlv(), 10_020.0);
    assert_relative_eq!(portfolio.unrealized_pl(), 20.0);

    while engine.step().unwrap() {}
    let portfolio = engine.portfolio(0).unwrap();
    assert_relative_eq!(portfolio.nlv(), 10_030.0);
}

// A future with a non-1.0 contract size scales unrealized_pl and position NLV by that
// multiplier, not just by price * units.
#[test]
fn futures_unit_multiplier_scales_unrealized_pl_and_position_nlv() {
    let closes = [100.0, 101.0, 102.0, 103.0];
    let mut engine = Engine::new(false);
    let mut exchange = Exchange::new("EXCH", AssetType::Future, Frequency::Day1);
    exchange.add_asset(symmetric_future_asset("A", &closes, 50.0));
    exchange.build().unwrap();
    engine.new_exchange(exchange).unwrap();
    engine.new_portfolio("P", 10_000.0, Frequency::Day1, default_statistic_config());

    let meta = StrategyMeta::new("S", 0, 0, 0, "EXCH", 1.0);
    let strategy = Box::new(BuyOnce { meta, units: 2.0, exit: None, done: false });
    engine.register_strategy(strategy, RiskLimits::new(None, true)).unwrap();
    engine.build().unwrap();

    engine.step().unwrap();
    engine.step().unwrap();
    engine.step().unwrap();
    let portfolio = engine.portfolio(0).unwrap();
    // unrealized_pl = (102 - 100) * 2 units * 50 multiplier = 200
    assert_relative_eq!(portfolio.unrealized_pl(), 200.0);
    assert_relative_eq!(portfolio.position(0).unwrap().nlv(), 102.0 * 2.0 * 50.0);
}

// S2: a trade with an ExitBars(2) policy force-closes itself and books the exact realized P&L.
#[test]
fn s2_exit_bars_force_closes_and_books_realized_pl() {
    let closes = [100.0, 101.0, 102.0, 103.0];
    let meta = StrategyMeta::new("S", 0, 0, 0, "EXCH", 1.0);
    let strategy = Box::new(BuyOnce { meta, units: 10.0, exit: Some(TradeExit::bars(2)), done: false });
    let mut engine = single_asset_engine(&closes, strategy, RiskLimits::new(None, true));

    engine.run().unwrap();

    let portfolio = engine.portfolio(0).unwrap();
    assert!(portfolio.position(0).is_none());
    assert_eq!(portfolio.trade_history().len(), 1);
    assert_relative_eq!(portfolio.trade_history()[0].realized_pl(), 20.0);
}

// S3: two assets, FractionNlv allocation splits NLV evenly; final NLV matches hand computation.
#[test]
fn s3_two_asset_fraction_nlv_allocation_matches_expected_final_nlv() {
    let mut engine = Engine::new(false);
    let mut exchange = Exchange::new("EXCH", AssetType::Equity, Frequency::Day1);
    exchange.add_asset(symmetric_asset("A", &[10.0, 11.0, 12.0]));
    exchange.add_asset(symmetric_asset("B", &[20.0, 22.0, 24.0]));
    exchange.build().unwrap();
    engine.new_exchange(exchange).unwrap();

    let portfolio_index = engine.new_portfolio("P", 1_000.0, Frequency::Day1, default_statistic_config());
    let meta = StrategyMeta::new("S", 0, portfolio_index, 0, "EXCH", 1.0);
    let strategy = Box::new(AllocateOnce { meta, fraction_per_asset: 0.5, nlv: 1_000.0, done: false });
    engine.register_strategy(strategy, RiskLimits::new(None, true)).unwrap();
    engine.build().unwrap();

    engine.run().unwrap();

    let portfolio = engine.portfolio(0).unwrap();
    assert_relative_eq!(portfolio.cash(), 0.0, epsilon = 1e-9);
    assert_relative_eq!(portfolio.nlv(), 1_200.0, epsilon = 1e-9);
}

// S6: a strategy that overleverages past max_leverage is disabled and force-closed one tick
// later, on a flat price series so the force-close books zero realized P&L.
#[test]
fn s6_leverage_breach_disables_strategy_and_force_closes_position() {
    let closes = [10.0, 10.0, 10.0, 10.0];
    let meta = StrategyMeta::new("S", 0, 0, 0, "EXCH", 1.0);
    let strategy = Box::new(OverleverOnce { meta, units: 2_000.0, done: false });
    let mut engine = single_asset_engine(&closes, strategy, RiskLimits::new(Some(1.0), true));

    engine.run().unwrap();

    let tracers = engine.risk_tracers(0).unwrap();
    assert_relative_eq!(tracers.net_leverage_ratio(), 2.0, epsilon = 1e-9);

    let portfolio = engine.portfolio(0).unwrap();
    assert!(portfolio.position(0).is_none());
    assert_relative_eq!(portfolio.cash(), 10_000.0, epsilon = 1e-9);
    assert_eq!(portfolio.trade_history().len(), 1);
    assert_relative_eq!(portfolio.trade_history()[0].realized_pl(), 0.0, epsilon = 1e-9);
}

// Invariant: nlv == cash + sum(position.nlv) holds after every completed run, not just at rest.
#[test]
fn invariant_nlv_equals_cash_plus_position_nlv_after_run() {
    let closes = [100.0, 101.0, 99.0, 103.0, 98.0];
    let meta = StrategyMeta::new("S", 0, 0, 0, "EXCH", 1.0);
    let strategy = Box::new(BuyOnce { meta, units: 7.0, exit: None, done: false });
    let mut engine = single_asset_engine(&closes, strategy, RiskLimits::new(None, true));
    engine.run().unwrap();

    let portfolio = engine.portfolio(0).unwrap();
    let position_nlv: f64 = portfolio.positions().map(|p| p.nlv()).sum();
    assert_relative_eq!(portfolio.nlv(), portfolio.cash() + position_nlv, epsilon = 1e-6);
}

// Invariant: every archived order is in a terminal state once a run completes.
#[test]
fn invariant_every_archived_order_is_terminal_after_run() {
    let closes = [100.0, 101.0, 102.0, 103.0];
    let meta = StrategyMeta::new("S", 0, 0, 0, "EXCH", 1.0);
    let strategy = Box::new(BuyOnce { meta, units: 10.0, exit: Some(TradeExit::bars(1)), done: false });
    let mut engine = single_asset_engine(&closes, strategy, RiskLimits::new(None, true));
    engine.run().unwrap();

    let history = engine.order_history();
    assert!(!history.is_empty());
    assert!(history.iter().all(|order| order.state().is_terminal()));
}

// Idempotence: stepping through a run, resetting, and running again reproduces the same
// cash/NLV/trade history.
#[test]
fn reset_then_rerun_reproduces_identical_history() {
    let closes = [100.0, 103.0, 98.0, 101.0];
    let meta = StrategyMeta::new("S", 0, 0, 0, "EXCH", 1.0);
    let strategy = Box::new(BuyOnce { meta, units: 5.0, exit: Some(TradeExit::bars(1)), done: false });
    let mut engine = single_asset_engine(&closes, strategy, RiskLimits::new(None, true));

    engine.run().unwrap();
    let first_cash = engine.portfolio(0).unwrap().cash();
    let first_nlv = engine.portfolio(0).unwrap().nlv();
    let first_realized: Vec<f64> = engine.portfolio(0).unwrap().trade_history().iter().map(|t| t.realized_pl()).collect();

    engine.reset();
    assert_eq!(engine.meta().tick, 0);
    assert_eq!(engine.portfolio(0).unwrap().cash(), 10_000.0);

    engine.run().unwrap();
    assert_relative_eq!(engine.portfolio(0).unwrap().cash(), first_cash);
    assert_relative_eq!(engine.portfolio(0).unwrap().nlv(), first_nlv);
    let second_realized: Vec<f64> = engine.portfolio(0).unwrap().trade_history().iter().map(|t| t.realized_pl()).collect();
    assert_eq!(first_realized.len(), second_realized.len());
    for (a, b) in first_realized.iter().zip(second_realized.iter()) {
        assert_relative_eq!(*a, *b);
    }
}

// Boundary: a feature lookup at an offset beyond the rows seen so far fails OutOfRange rather
// than reading garbage or panicking.
#[test]
fn boundary_feature_offset_beyond_observed_rows_is_out_of_range() {
    let mut asset = symmetric_asset("A", &[10.0, 11.0, 12.0]);
    let col = asset.get_column_index("close").unwrap();
    assert!(matches!(asset.get_asset_feature(col, 0), Err(HydraError::OutOfRange(_))));

    asset.step();
    assert!(asset.get_asset_feature(col, 0).is_ok());
    assert!(matches!(asset.get_asset_feature(col, -1), Err(HydraError::OutOfRange(_))));
}

// Boundary: a still-in-warmup asset contributes nothing to its exchange's view.
#[test]
fn boundary_exchange_view_excludes_assets_still_in_warmup() {
    let dt = dt_index(3);
    let mut data = Vec::new();
    for c in [10.0, 11.0, 12.0] {
        data.push(c);
        data.push(c);
    }
    let warm_asset = Asset::new(
        "A",
        "EXCH",
        AssetType::Equity,
        Frequency::Day1,
        "America/New_York",
        1.0,
        2,
        vec![("open".into(), 0), ("close".into(), 1)],
        data,
        dt,
    )
    .unwrap();

    let mut exchange = Exchange::new("EXCH", AssetType::Equity, Frequency::Day1);
    exchange.add_asset(warm_asset);
    exchange.build().unwrap();

    let view = exchange.get_exchange_view("close", 0, hydra_backtest::exchange::Ranking::Default).unwrap();
    assert!(view.is_empty());
}

// Boundary: a LIMIT order whose limit never crosses stays pending for the whole run and ends
// up Canceled once the run's cancellation sweep runs, never Filled.
#[test]
fn boundary_unreachable_limit_order_ends_canceled_not_filled() {
    let mut engine = Engine::new(false);
    let mut exchange = Exchange::new("EXCH", AssetType::Equity, Frequency::Day1);
    exchange.add_asset(symmetric_asset("A", &[100.0, 101.0, 102.0, 103.0]));
    exchange.build().unwrap();
    engine.new_exchange(exchange).unwrap();
    let portfolio_index = engine.new_portfolio("P", 10_000.0, Frequency::Day1, default_statistic_config());

    struct UnreachableLimit {
        meta: StrategyMeta,
        done: bool,
    }
    impl Strategy for UnreachableLimit {
        fn meta(&self) -> &StrategyMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut StrategyMeta {
            &mut self.meta
        }
        fn next(&mut self, view: &ExchangeView, create_time: i64, next_order_id: &mut u64) -> HydraResult<Vec<Order>> {
            if self.done || view.is_empty() {
                return Ok(Vec::new());
            }
            self.done = true;
            let &(asset_index, _) = &view.entries()[0];
            let id = *next_order_id;
            *next_order_id += 1;
            let mut order = Order::new(
                id,
                OrderType::Limit,
                asset_index,
                10.0,
                self.meta.index,
                self.meta.portfolio_index,
                self.meta.broker_index,
                create_time,
                None,
                false,
            )?;
            order.set_limit(1.0);
            Ok(vec![order])
        }
    }

    let meta = StrategyMeta::new("S", 0, portfolio_index, 0, "EXCH", 1.0);
    engine.register_strategy(Box::new(UnreachableLimit { meta, done: false }), RiskLimits::new(None, true)).unwrap();
    engine.build().unwrap();
    engine.run().unwrap();

    let history = engine.order_history();
    let limit_orders: Vec<&Order> = history.iter().filter(|o| o.order_type() == OrderType::Limit).collect();
    assert_eq!(limit_orders.len(), 1);
    assert_eq!(limit_orders[0].state(), OrderState::Canceled);
}
