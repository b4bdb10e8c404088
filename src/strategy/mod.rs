//! Decision unit: consumes exchange views, emits orders, owns risk tracers.

use smol_str::SmolStr;

use crate::error::HydraResult;
use crate::exchange::ExchangeView;
use crate::order::{Order, OrderType};
use crate::trade::TradeExit;

/// Intra-day trading window, in seconds since midnight.
#[derive(Debug, Clone, Copy)]
pub struct TradingWindow {
    pub start: u32,
    pub end: u32,
}

impl TradingWindow {
    pub fn contains(&self, seconds_since_midnight: u32) -> bool {
        seconds_since_midnight >= self.start && seconds_since_midnight <= self.end
    }
}

/// Static registration metadata shared by every [`Strategy`] implementation.
pub struct StrategyMeta {
    pub id: SmolStr,
    pub index: usize,
    pub portfolio_index: usize,
    pub broker_index: usize,
    pub exchange_id: SmolStr,
    /// Fraction of the parent portfolio's starting cash allocated to this strategy.
    pub target_allocation: f64,
    pub trading_window: Option<TradingWindow>,
    /// Call `Strategy::next` every `step_frequency` eligible ticks.
    pub step_frequency: usize,
    pub apply_beta_hedge: bool,
    pub max_leverage: Option<f64>,
    steps_since_last_call: usize,
    disabled: bool,
}

impl StrategyMeta {
    pub fn new(
        id: impl Into<SmolStr>,
        index: usize,
        portfolio_index: usize,
        broker_index: usize,
        exchange_id: impl Into<SmolStr>,
        target_allocation: f64,
    ) -> Self {
        Self {
            id: id.into(),
            index,
            portfolio_index,
            broker_index,
            exchange_id: exchange_id.into(),
            target_allocation,
            trading_window: None,
            step_frequency: 1,
            apply_beta_hedge: false,
            max_leverage: None,
            steps_since_last_call: 0,
            disabled: false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn disable(&mut self) {
        self.disabled = true;
    }

    pub fn enable(&mut self) {
        self.disabled = false;
        self.steps_since_last_call = 0;
    }

    /// Whether this strategy should run this tick, given the exchange stepped, the time-of-day,
    /// and the step-frequency counter. Advances the counter as a side effect.
    pub fn is_eligible(&mut self, exchange_stepped: bool, seconds_since_midnight: u32) -> bool {
        if self.disabled || !exchange_stepped {
            return false;
        }
        if let Some(window) = self.trading_window {
            if !window.contains(seconds_since_midnight) {
                return false;
            }
        }
        self.steps_since_last_call += 1;
        if self.steps_since_last_call < self.step_frequency {
            return false;
        }
        self.steps_since_last_call = 0;
        true
    }
}

/// How an `(asset_index, target)` pair in a [`strategy_allocate`] view is interpreted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AllocType {
    /// `target` is already an absolute unit count.
    Units,
    /// `target` is a dollar notional, converted to units at the asset's current price.
    Dollars,
    /// `target` is a fraction of the strategy's portfolio NLV.
    FractionNlv,
}

/// `Dollars` and `FractionNlv` both convert a notional to a unit count at `price`, which is
/// floored to a whole unit (equities trade in whole shares). `Units` passes `target` through
/// unchanged, since a caller naming an explicit unit count may mean a fractional one.
fn target_units(target: f64, alloc_type: AllocType, price: f64, nlv: f64) -> f64 {
    match alloc_type {
        AllocType::Units => target,
        AllocType::Dollars => (target / price).floor(),
        AllocType::FractionNlv => ((target * nlv) / price).floor(),
    }
}

/// A single entry in a [`strategy_allocate`] target view.
pub struct Allocation {
    pub asset_index: usize,
    pub target: f64,
}

/// Decide the set of `MARKET` orders needed to move `(strategy_index, asset)` positions toward
/// the targets in `view`.
///
/// For each entry, the target unit count is computed per `alloc_type`; if the fractional
/// deviation from the current open units exceeds `epsilon`, a `MARKET` order for the delta is
/// emitted. When `clear_missing` is set, any existing `(strategy_index, asset)` trade absent
/// from `view` emits an inverse-closing order. All emitted orders inherit `exit`.
#[allow(clippy::too_many_arguments)]
pub fn strategy_allocate(
    strategy_index: usize,
    portfolio_index: usize,
    broker_index: usize,
    view: &[Allocation],
    current_units: impl Fn(usize) -> Option<f64>,
    price: impl Fn(usize) -> Option<f64>,
    nlv: f64,
    epsilon: f64,
    clear_missing: bool,
    exit: Option<TradeExit>,
    alloc_type: AllocType,
    existing_asset_indices: impl Iterator<Item = usize>,
    next_order_id: &mut u64,
    create_time: i64,
) -> HydraResult<Vec<Order>> {
    let mut orders = Vec::new();
    let mut touched = std::collections::HashSet::new();

    for allocation in view {
        touched.insert(allocation.asset_index);
        let Some(px) = price(allocation.asset_index) else { continue };
        let target = target_units(allocation.target, alloc_type, px, nlv);
        let current = current_units(allocation.asset_index).unwrap_or(0.0);
        let delta = target - current;

        let significant = if target.abs() > f64::EPSILON {
            (delta / target).abs() > epsilon
        } else {
            delta.abs() > epsilon
        };
        if significant && delta != 0.0 {
            let id = *next_order_id;
            *next_order_id += 1;
            orders.push(Order::new(
                id,
                OrderType::Market,
                allocation.asset_index,
                delta,
                strategy_index,
                portfolio_index,
                broker_index,
                create_time,
                exit.clone(),
                false,
            )?);
        }
    }

    if clear_missing {
        for asset_index in existing_asset_indices {
            if touched.contains(&asset_index) {
                continue;
            }
            if let Some(units) = current_units(asset_index) {
                if units != 0.0 {
                    let id = *next_order_id;
                    *next_order_id += 1;
                    orders.push(Order::new(
                        id,
                        OrderType::Market,
                        asset_index,
                        -units,
                        strategy_index,
                        portfolio_index,
                        broker_index,
                        create_time,
                        None,
                        false,
                    )?);
                }
            }
        }
    }

    Ok(orders)
}

/// Build the beta-hedge child order for `order`: a `MARKET` order against the market asset with
/// units `-beta * units * (asset_price / market_price)`.
pub fn beta_hedge_child_order(
    order: &Order,
    market_asset_index: usize,
    beta: f64,
    asset_price: f64,
    market_price: f64,
    next_order_id: &mut u64,
    create_time: i64,
) -> HydraResult<Order> {
    let hedge_units = -beta * order.units() * (asset_price / market_price);
    let id = *next_order_id;
    *next_order_id += 1;
    Order::new(
        id,
        OrderType::Market,
        market_asset_index,
        hedge_units,
        order.strategy_index(),
        order.portfolio_index(),
        order.broker_index(),
        create_time,
        None,
        order.phantom,
    )
}

/// Decision unit: bound to exactly one exchange, invoked in registration order within its
/// portfolio when eligible.
pub trait Strategy {
    fn meta(&self) -> &StrategyMeta;
    fn meta_mut(&mut self) -> &mut StrategyMeta;

    /// Called when eligible. Implementations read `view` and emit orders via the returned
    /// `Vec<Order>`; the engine submits them to the [`Router`](crate::router::Router).
    fn next(&mut self, view: &ExchangeView, create_time: i64, next_order_id: &mut u64) -> HydraResult<Vec<Order>>;

    /// Tag persisted as `StrategyConfig::strategy_type` when an [`Engine`](crate::engine::Engine)
    /// is snapshotted into a [`HydraConfig`](crate::config::HydraConfig); interpreted by the
    /// caller's own strategy registry on restore, not by the engine. Defaults to the concrete
    /// Rust type name; override for a stable identifier that survives refactors.
    fn strategy_type(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
