//! Lifecycle and per-tick sequencing for a full backtest run.
//!
//! `step()` drives one tick through a fixed sequence: advance the global clock, process the
//! open-leg order queue, run eligible strategies, route their orders, process the close-leg
//! queue, route again, evaluate portfolios, then risk tracers. Orders raised by a strategy or by
//! the engine itself (asset expiry, risk-limit breach) are placed directly on their owning
//! exchange and are matched on the following tick's open leg.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use rayon::prelude::*;
use smol_str::SmolStr;

use crate::error::{HydraError, HydraResult};
use crate::exchange::{Exchange, Ranking};
use crate::exchange_map::ExchangeMap;
use crate::order::{Order, OrderType};
use crate::portfolio::Portfolio;
use crate::risk::{ExposureSample, RiskLimits, RiskTracers, Tracer};
use crate::router::Router;
use crate::statistic::{TradingSummaryConfig, TradingSummaryGenerator};
use crate::strategy::Strategy;
use crate::trade::Trade;

fn seconds_since_midnight(epoch_ns: i64) -> u32 {
    let secs = epoch_ns.div_euclid(1_000_000_000);
    let nanos = epoch_ns.rem_euclid(1_000_000_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(|dt| dt.time().num_seconds_from_midnight())
        .unwrap_or(0)
}

fn current_prices(exchanges: &ExchangeMap) -> HashMap<usize, f64> {
    exchanges
        .exchanges()
        .flat_map(|exchange| exchange.assets().iter())
        .filter_map(|asset| asset.current_price(true).ok().map(|price| (asset.index(), price)))
        .collect()
}

fn unit_multipliers(exchanges: &ExchangeMap) -> HashMap<usize, f64> {
    exchanges
        .exchanges()
        .flat_map(|exchange| exchange.assets().iter())
        .map(|asset| (asset.index(), asset.unit_multiplier()))
        .collect()
}

/// Monotonic id allocator for orders, rewound alongside the rest of the engine on [`Engine::reset`].
#[derive(Debug, Default)]
struct IdAllocator {
    next_order_id: u64,
}

impl IdAllocator {
    fn next_order_id(&mut self) -> u64 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }

    fn reset(&mut self) {
        self.next_order_id = 0;
    }
}

/// Run-scoped counters surfaced for logging/diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineMeta {
    pub tick: usize,
}

struct StrategySlot {
    strategy: Box<dyn Strategy>,
    limits: RiskLimits,
    tracers: RiskTracers,
}

/// Event-driven backtest kernel: owns every [`Exchange`] (via [`ExchangeMap`]), [`Portfolio`],
/// and [`Strategy`], and advances them in lockstep.
///
/// Invariant: at the end of every completed `step()`, for each portfolio,
/// `nlv == cash + sum(position.nlv)` within float tolerance.
pub struct Engine {
    meta: EngineMeta,
    exchanges: ExchangeMap,
    portfolios: Vec<Portfolio>,
    starting_cash: Vec<f64>,
    statistics: Vec<TradingSummaryGenerator>,
    statistic_configs: Vec<TradingSummaryConfig>,
    archived_trade_counts: Vec<usize>,
    strategies: Vec<StrategySlot>,
    router: Router,
    ids: IdAllocator,
    pending_force_close: Vec<(usize, usize, usize, f64)>,
    is_built: bool,
}

impl Engine {
    pub fn new(log_orders: bool) -> Self {
        Self {
            meta: EngineMeta::default(),
            exchanges: ExchangeMap::new(),
            portfolios: Vec::new(),
            starting_cash: Vec::new(),
            statistics: Vec::new(),
            statistic_configs: Vec::new(),
            archived_trade_counts: Vec::new(),
            strategies: Vec::new(),
            router: Router::new(log_orders),
            ids: IdAllocator::default(),
            pending_force_close: Vec::new(),
            is_built: false,
        }
    }

    pub fn new_exchange(&mut self, exchange: Exchange) -> HydraResult<()> {
        self.exchanges.new_exchange(exchange)
    }

    pub fn enable_covariance_matrix(&mut self, window: usize, step_size: usize) {
        self.exchanges.enable_covariance_matrix(window, step_size);
    }

    /// Register a new portfolio, returning the index other calls (`register_strategy`) address
    /// it by.
    pub fn new_portfolio(
        &mut self,
        id: impl Into<SmolStr>,
        starting_cash: f64,
        frequency: crate::asset::Frequency,
        statistic_config: TradingSummaryConfig,
    ) -> usize {
        let index = self.portfolios.len();
        self.portfolios.push(Portfolio::new(id, index, starting_cash, frequency));
        self.starting_cash.push(starting_cash);
        self.statistics.push(TradingSummaryGenerator::new(statistic_config));
        self.statistic_configs.push(statistic_config);
        self.archived_trade_counts.push(0);
        index
    }

    /// Register a strategy against the portfolio named in its [`StrategyMeta`](
    /// crate::strategy::StrategyMeta), returning its strategy index.
    pub fn register_strategy(&mut self, mut strategy: Box<dyn Strategy>, limits: RiskLimits) -> HydraResult<usize> {
        let index = self.strategies.len();
        let portfolio_index = strategy.meta().portfolio_index;
        let portfolio = self
            .portfolios
            .get_mut(portfolio_index)
            .ok_or_else(|| HydraError::InvalidId(format!("unknown portfolio index {portfolio_index}")))?;
        strategy.meta_mut().index = index;
        portfolio.register_strategy(index);
        self.strategies.push(StrategySlot { strategy, limits, tracers: RiskTracers::new() });
        Ok(index)
    }

    pub fn exchanges(&self) -> &ExchangeMap {
        &self.exchanges
    }

    pub fn portfolio(&self, index: usize) -> Option<&Portfolio> {
        self.portfolios.get(index)
    }

    pub fn statistic(&self, portfolio_index: usize) -> Option<&TradingSummaryGenerator> {
        self.statistics.get(portfolio_index)
    }

    pub fn risk_tracers(&self, strategy_index: usize) -> Option<&RiskTracers> {
        self.strategies.get(strategy_index).map(|slot| &slot.tracers)
    }

    pub fn order_history(&self) -> Vec<Order> {
        self.router.order_history()
    }

    pub fn meta(&self) -> EngineMeta {
        self.meta
    }

    /// Derive a [`HydraConfig`](crate::config::HydraConfig) describing this engine's live
    /// exchange/portfolio/strategy registries. `source`/`datetime_format` are left empty, since
    /// a live engine holds already-loaded [`Asset`](crate::asset::Asset) data, not the caller's
    /// original loader parameters.
    pub fn to_snapshot(&self) -> crate::config::HydraConfig {
        use crate::config::{ExchangeConfig, MarketAssetConfig, PortfolioConfig, RiskLimitsConfig, StrategyConfig, TradingWindowConfig};

        let exchanges = self
            .exchanges
            .exchanges()
            .map(|exchange| ExchangeConfig {
                id: exchange.id().clone(),
                asset_type: exchange.asset_type(),
                frequency: exchange.frequency(),
                source: SmolStr::default(),
                datetime_format: SmolStr::default(),
                asset_ids: Some(exchange.assets().iter().map(|asset| asset.id().clone()).collect()),
                market_asset: exchange.beta_lookback().map(|beta_lookback| MarketAssetConfig { beta_lookback }),
            })
            .collect();

        let portfolios = self
            .portfolios
            .iter()
            .map(|portfolio| PortfolioConfig {
                id: portfolio.id().clone(),
                starting_cash: self.starting_cash[portfolio.index()],
                frequency: portfolio.frequency(),
                benchmark_strategy: portfolio
                    .benchmark_strategy()
                    .and_then(|index| self.strategies.get(index))
                    .map(|slot| slot.strategy.meta().id.clone()),
            })
            .collect();

        let strategies = self
            .strategies
            .iter()
            .map(|slot| {
                let meta = slot.strategy.meta();
                StrategyConfig {
                    id: meta.id.clone(),
                    portfolio: self.portfolios[meta.portfolio_index].id().clone(),
                    broker_index: meta.broker_index,
                    exchange_id: meta.exchange_id.clone(),
                    target_allocation: meta.target_allocation,
                    strategy_type: slot.strategy.strategy_type().into(),
                    trading_window: meta
                        .trading_window
                        .map(|w| TradingWindowConfig { start: w.start, end: w.end }),
                    risk_limits: RiskLimitsConfig {
                        max_leverage: slot.limits.max_leverage,
                        allow_shorting: slot.limits.allow_shorting,
                    },
                    tracers: slot.tracers.enabled_tracers(),
                }
            })
            .collect();

        crate::config::HydraConfig { exchanges, portfolios, strategies }
    }

    /// `to_snapshot().to_json()`.
    pub fn to_json(&self) -> HydraResult<String> {
        self.to_snapshot().to_json()
    }

    /// Reconstruct an [`Engine`] from a persisted [`HydraConfig`] plus the same [`Exchange`]s
    /// the caller built for the original run (loading `source`/`datetime_format`/`asset_ids`
    /// into [`Asset`](crate::asset::Asset) data is the caller's responsibility both times) and a
    /// `strategy_for` factory that instantiates the concrete [`Strategy`] tagged by each
    /// `StrategyConfig::strategy_type`. This engine fills in every config-derived registration
    /// field (`portfolio_index`, `broker_index`, `exchange_id`, `target_allocation`,
    /// `trading_window`, risk limits, tracers, benchmark strategy) from `config` before
    /// registering each strategy, so replaying the same exchanges through the restored engine
    /// reproduces the original run's tracer histories bit-for-bit.
    pub fn restore(
        config: &crate::config::HydraConfig,
        exchanges: Vec<Exchange>,
        strategy_for: impl Fn(&crate::config::StrategyConfig) -> HydraResult<Box<dyn Strategy>>,
        log_orders: bool,
    ) -> HydraResult<Self> {
        let mut engine = Engine::new(log_orders);
        for exchange in exchanges {
            engine.new_exchange(exchange)?;
        }

        let mut portfolio_index_by_id: HashMap<SmolStr, usize> = HashMap::new();
        for portfolio_config in &config.portfolios {
            let statistic_config = TradingSummaryConfig {
                starting_equity: portfolio_config.starting_cash,
                trading_days_per_year: 252,
                risk_free_return: 0.0,
            };
            let index = engine.new_portfolio(
                portfolio_config.id.clone(),
                portfolio_config.starting_cash,
                portfolio_config.frequency,
                statistic_config,
            );
            portfolio_index_by_id.insert(portfolio_config.id.clone(), index);
        }

        let mut strategy_index_by_id: HashMap<SmolStr, usize> = HashMap::new();
        for strategy_config in &config.strategies {
            let &portfolio_index = portfolio_index_by_id.get(&strategy_config.portfolio).ok_or_else(|| {
                HydraError::InvalidId(format!(
                    "strategy {} names unknown portfolio {}",
                    strategy_config.id, strategy_config.portfolio
                ))
            })?;

            let mut strategy = strategy_for(strategy_config)?;
            {
                let meta = strategy.meta_mut();
                meta.id = strategy_config.id.clone();
                meta.portfolio_index = portfolio_index;
                meta.broker_index = strategy_config.broker_index;
                meta.exchange_id = strategy_config.exchange_id.clone();
                meta.target_allocation = strategy_config.target_allocation;
                meta.trading_window = strategy_config
                    .trading_window
                    .map(|w| crate::strategy::TradingWindow { start: w.start, end: w.end });
            }

            let limits: RiskLimits = strategy_config.risk_limits.into();
            let strategy_index = engine.register_strategy(strategy, limits)?;
            for &tracer in &strategy_config.tracers {
                engine.strategies[strategy_index].tracers.set(tracer);
            }
            strategy_index_by_id.insert(strategy_config.id.clone(), strategy_index);
        }

        for portfolio_config in &config.portfolios {
            let Some(benchmark_id) = &portfolio_config.benchmark_strategy else { continue };
            let Some(&strategy_index) = strategy_index_by_id.get(benchmark_id) else { continue };
            let &portfolio_index = portfolio_index_by_id.get(&portfolio_config.id).expect("inserted above");
            engine.portfolios[portfolio_index].set_benchmark_strategy(strategy_index);
        }

        Ok(engine)
    }

    /// Resolve the global timeline, align every exchange's assets, and pre-reserve risk-tracer
    /// history buffers to the run length. Must be called once, after every exchange/portfolio/
    /// strategy has been registered, before the first `step()`.
    pub fn build(&mut self) -> HydraResult<()> {
        self.exchanges.build()?;
        let ticks = self.exchanges.len();
        for slot in &mut self.strategies {
            slot.tracers.set(Tracer::Nlv);
            slot.tracers.set(Tracer::Leverage);
            slot.tracers.build(ticks);
        }
        self.is_built = true;
        tracing::info!(
            ticks,
            portfolios = self.portfolios.len(),
            strategies = self.strategies.len(),
            "engine built"
        );
        Ok(())
    }

    /// Advance one tick. Returns `false` once the global clock is exhausted; the caller should
    /// stop calling `step()` at that point.
    pub fn step(&mut self) -> HydraResult<bool> {
        if !self.is_built {
            return Err(HydraError::InvalidState("engine stepped before build()".into()));
        }
        if self.meta.tick >= self.exchanges.len() {
            return Ok(false);
        }

        let expired = self.exchanges.step()?.to_vec();
        let current_time = self.exchanges.current_time().unwrap_or(0);
        let seconds = seconds_since_midnight(current_time);
        tracing::trace!(tick = self.meta.tick, current_time, "engine step");

        self.queue_expired_asset_close(&expired);

        for order in self.exchanges.process_orders(false) {
            self.router.place_order(order);
        }

        self.run_strategies(current_time, seconds)?;

        for fill in self.router.process(&mut self.exchanges)? {
            self.apply_fill(fill)?;
        }

        for order in self.exchanges.process_orders(true) {
            self.router.place_order(order);
        }
        for fill in self.router.process(&mut self.exchanges)? {
            self.apply_fill(fill)?;
        }

        self.evaluate_portfolios();
        self.evaluate_risk();
        self.flush_force_closes(current_time)?;

        self.meta.tick += 1;
        Ok(true)
    }

    /// Step until the global clock is exhausted, then cancel every order still queued on any
    /// exchange so no order survives a completed run in a non-terminal state.
    pub fn run(&mut self) -> HydraResult<()> {
        while self.step()? {}
        let cancel_time = self.exchanges.current_time().unwrap_or(0);
        for order in self.exchanges.cancel_pending_orders(cancel_time) {
            self.router.place_order(order);
        }
        self.router.process(&mut self.exchanges)?;
        Ok(())
    }

    /// Step until the global clock reaches or passes `end_time`.
    pub fn run_to(&mut self, end_time: i64) -> HydraResult<()> {
        loop {
            if self.exchanges.current_time().is_some_and(|t| t >= end_time) {
                break;
            }
            if !self.step()? {
                break;
            }
        }
        Ok(())
    }

    /// Rewind the global cursor to zero and restore every portfolio, the router, every
    /// strategy's enabled state, and every risk tracer's history to their pre-run state.
    pub fn reset(&mut self) {
        self.exchanges.reset();
        self.router.reset();
        self.ids.reset();
        self.meta = EngineMeta::default();
        self.pending_force_close.clear();

        for ((portfolio, &starting_cash), statistic_seen) in
            self.portfolios.iter_mut().zip(self.starting_cash.iter()).zip(self.archived_trade_counts.iter_mut())
        {
            portfolio.reset(starting_cash);
            *statistic_seen = 0;
        }
        for (statistic, config) in self.statistics.iter_mut().zip(self.statistic_configs.iter()) {
            *statistic = TradingSummaryGenerator::new(*config);
        }
        for slot in &mut self.strategies {
            slot.strategy.meta_mut().enable();
            slot.tracers.reset_history();
        }
    }

    fn queue_expired_asset_close(&mut self, expired: &[usize]) {
        for &asset_index in expired {
            for portfolio in &self.portfolios {
                let Some(position) = portfolio.position(asset_index) else { continue };
                for trade in position.trades() {
                    if trade.units() != 0.0 {
                        self.pending_force_close.push((
                            portfolio.index(),
                            trade.strategy_index(),
                            asset_index,
                            trade.units(),
                        ));
                    }
                }
            }
        }
    }

    fn run_strategies(&mut self, create_time: i64, seconds: u32) -> HydraResult<()> {
        for slot in &mut self.strategies {
            let exchange_id = slot.strategy.meta().exchange_id.clone();
            let exchange_stepped = self
                .exchanges
                .exchange(&exchange_id)
                .map(|exchange| exchange.exchange_time() == Some(create_time))
                .unwrap_or(false);

            if !slot.strategy.meta_mut().is_eligible(exchange_stepped, seconds) {
                continue;
            }

            let view = match self.exchanges.exchange(&exchange_id) {
                Some(exchange) => exchange.get_exchange_view("close", 0, Ranking::Default)?,
                None => continue,
            };

            let mut next_id = self.ids.next_order_id;
            let result = slot.strategy.next(&view, create_time, &mut next_id);
            self.ids.next_order_id = next_id;

            match result {
                Ok(orders) => {
                    let apply_beta_hedge = slot.strategy.meta().apply_beta_hedge;
                    for mut order in orders {
                        if apply_beta_hedge {
                            if let Some(child) = self.beta_hedge_for(&order, &exchange_id, create_time) {
                                order.insert_beta_hedge_child(child);
                            }
                        }
                        self.router.place_order(order);
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        strategy = %slot.strategy.meta().id,
                        %error,
                        "strategy step failed, disabling"
                    );
                    slot.strategy.meta_mut().disable();
                }
            }
        }
        Ok(())
    }

    fn beta_hedge_for(&mut self, order: &Order, exchange_id: &SmolStr, create_time: i64) -> Option<Order> {
        let exchange = self.exchanges.exchange(exchange_id)?;
        let market_asset = exchange.assets().iter().find(|asset| asset.is_market_asset())?;
        if order.asset_index() == market_asset.index() {
            return None;
        }
        let asset = exchange.assets().iter().find(|asset| asset.index() == order.asset_index())?;
        let beta = asset.beta()?;
        let asset_price = asset.current_price(true).ok()?;
        let market_price = market_asset.current_price(true).ok()?;
        let market_index = market_asset.index();

        let mut next_id = self.ids.next_order_id;
        let child = crate::strategy::beta_hedge_child_order(
            order,
            market_index,
            beta,
            asset_price,
            market_price,
            &mut next_id,
            create_time,
        )
        .ok();
        self.ids.next_order_id = next_id;
        child
    }

    fn apply_fill(&mut self, fill: crate::router::RoutedFill) -> HydraResult<()> {
        let crate::router::RoutedFill { portfolio_index, mut order } = fill;
        if let Some(price) = order.average_price() {
            order.set_cash_impact(order.units() * price);
        }
        let open_time = order.fill_time().unwrap_or(0);
        let unit_multiplier = self.exchanges.unit_multiplier(order.asset_index()).unwrap_or(1.0);
        let portfolio = self
            .portfolios
            .get_mut(portfolio_index)
            .ok_or_else(|| HydraError::InvalidId(format!("unknown portfolio index {portfolio_index}")))?;
        portfolio.apply_fill(&order, open_time, unit_multiplier)
    }

    /// Re-evaluate every portfolio's positions against this tick's close prices (data-parallel:
    /// portfolios share no state), queue inverse orders for any firing trade exit, then roll
    /// newly-archived trades and equity into each portfolio's [`TradingSummaryGenerator`].
    fn evaluate_portfolios(&mut self) {
        let prices = current_prices(&self.exchanges);
        let multipliers = unit_multipliers(&self.exchanges);

        let exits: Vec<(usize, usize, usize, f64)> = self
            .portfolios
            .par_iter_mut()
            .flat_map(|portfolio| {
                let firing = portfolio.evaluate(
                    |asset_index| prices.get(&asset_index).copied(),
                    |asset_index| multipliers.get(&asset_index).copied().unwrap_or(1.0),
                );
                firing
                    .into_iter()
                    .filter_map(|(asset_index, strategy_index)| {
                        portfolio
                            .trade(asset_index, strategy_index)
                            .map(|trade| (portfolio.index(), strategy_index, asset_index, trade.units()))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        self.pending_force_close.extend(exits);

        for index in 0..self.portfolios.len() {
            let seen = self.archived_trade_counts[index];
            let history_len = self.portfolios[index].trade_history().len();
            if history_len > seen {
                let new_trades: Vec<Trade> = self.portfolios[index].trade_history()[seen..].to_vec();
                for trade in &new_trades {
                    self.statistics[index].update_trade(trade);
                }
                self.archived_trade_counts[index] = history_len;
            }
            self.statistics[index].update_equity(self.portfolios[index].nlv());
        }
    }

    /// Recompute every strategy's risk tracers (data-parallel: strategies share no mutable
    /// state), then disable and queue a force-close for any strategy whose net leverage breaches
    /// its [`RiskLimits`].
    fn evaluate_risk(&mut self) {
        let mut breaches = Vec::new();

        for slot in &mut self.strategies {
            if slot.strategy.meta().is_disabled() {
                continue;
            }
            let portfolio_index = slot.strategy.meta().portfolio_index;
            let strategy_index = slot.strategy.meta().index;
            let target_allocation = slot.strategy.meta().target_allocation;
            let Some(portfolio) = self.portfolios.get(portfolio_index) else { continue };

            let mut trade_units = Vec::new();
            let exposures: Vec<ExposureSample> = portfolio
                .positions()
                .filter_map(|position| {
                    let trade = position.trade(strategy_index)?;
                    trade_units.push((position.asset_index(), trade.units()));
                    Some(ExposureSample {
                        asset_index: position.asset_index(),
                        nlv: trade.nlv(),
                        beta: self.asset_beta(position.asset_index()),
                    })
                })
                .collect();
            let cash = portfolio.cash() * target_allocation;

            slot.tracers.evaluate(cash, &exposures, |a, b| self.exchanges.covariance(a, b));

            if slot.limits.breached(slot.tracers.net_leverage_ratio()) {
                tracing::warn!(
                    strategy = %slot.strategy.meta().id,
                    net_leverage_ratio = slot.tracers.net_leverage_ratio(),
                    "risk limit breached, disabling strategy"
                );
                slot.strategy.meta_mut().disable();
                for (asset_index, units) in trade_units {
                    breaches.push((portfolio_index, strategy_index, asset_index, units));
                }
            }
        }

        self.pending_force_close.extend(breaches);
    }

    fn asset_beta(&self, asset_index: usize) -> Option<f64> {
        let exchange_id = self.exchanges.asset_exchange_id(asset_index)?;
        self.exchanges
            .exchange(exchange_id)?
            .assets()
            .iter()
            .find(|asset| asset.index() == asset_index)?
            .beta()
    }

    /// Submit one inverse `MARKET` order per queued force-close, bypassing the strategy ->
    /// router path since these originate from the engine itself. Orders land directly in the
    /// owning exchange's pending queue and are matched on the next tick's open leg.
    fn flush_force_closes(&mut self, create_time: i64) -> HydraResult<()> {
        let pending = std::mem::take(&mut self.pending_force_close);
        for (portfolio_index, strategy_index, asset_index, units) in pending {
            if units == 0.0 {
                continue;
            }
            let order_id = self.ids.next_order_id();
            let mut order = Order::new(
                order_id,
                OrderType::Market,
                asset_index,
                -units,
                strategy_index,
                portfolio_index,
                0,
                create_time,
                None,
                false,
            )?;
            order.force_close = true;
            self.exchanges.route_order(order)?;
        }
        Ok(())
    }
}
