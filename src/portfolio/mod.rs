//! Aggregates Positions, holds cash, tracks net liquidation value, and hosts Strategies.

use std::collections::HashMap;

use smol_str::SmolStr;

use crate::asset::Frequency;
use crate::error::{HydraError, HydraResult};
use crate::order::Order;
use crate::position::Position;
use crate::trade::Trade;

/// A capital pool: cash plus every open [`Position`], with a registry of the [`Strategy`](
/// crate::strategy::Strategy) indices trading against it.
///
/// Invariant: `nlv == cash + sum(position.nlv for position in positions)` at the end of every
/// step.
pub struct Portfolio {
    id: SmolStr,
    index: usize,
    cash: f64,
    nlv: f64,
    unrealized_pl: f64,
    /// Bar frequency this portfolio is evaluated/rebalanced at, persisted alongside it.
    frequency: Frequency,
    positions: HashMap<usize, Position>,
    trade_history: Vec<Trade>,
    strategies: Vec<usize>,
    benchmark_strategy: Option<usize>,
    next_trade_id: u64,
}

impl Portfolio {
    pub fn new(id: impl Into<SmolStr>, index: usize, starting_cash: f64, frequency: Frequency) -> Self {
        Self {
            id: id.into(),
            index,
            cash: starting_cash,
            nlv: starting_cash,
            unrealized_pl: 0.0,
            frequency,
            positions: HashMap::new(),
            trade_history: Vec::new(),
            strategies: Vec::new(),
            benchmark_strategy: None,
            next_trade_id: 0,
        }
    }

    pub fn id(&self) -> &SmolStr {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn nlv(&self) -> f64 {
        self.nlv
    }

    pub fn unrealized_pl(&self) -> f64 {
        self.unrealized_pl
    }

    pub fn register_strategy(&mut self, strategy_index: usize) {
        self.strategies.push(strategy_index);
    }

    pub fn set_benchmark_strategy(&mut self, strategy_index: usize) {
        self.benchmark_strategy = Some(strategy_index);
    }

    pub fn benchmark_strategy(&self) -> Option<usize> {
        self.benchmark_strategy
    }

    pub fn strategies(&self) -> &[usize] {
        &self.strategies
    }

    pub fn position(&self, asset_index: usize) -> Option<&Position> {
        self.positions.get(&asset_index)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn trade(&self, asset_index: usize, strategy_index: usize) -> Option<&Trade> {
        self.positions.get(&asset_index).and_then(|p| p.trade(strategy_index))
    }

    /// Apply a filled order to this portfolio: open, increase, reduce, close, or cross-zero the
    /// affected `(asset_index, strategy_index)` trade, and adjust cash by the order's
    /// `cash_impact` (commission/slippage are already folded into `cash_impact` at fill time).
    /// `unit_multiplier` is the filled asset's static contract size (1.0 for equities).
    pub fn apply_fill(&mut self, order: &Order, open_time: i64, unit_multiplier: f64) -> HydraResult<()> {
        let fill_price = order
            .average_price()
            .ok_or_else(|| HydraError::InvalidState("cannot apply an unfilled order".into()))?;

        self.cash -= order.cash_impact();

        let position = self
            .positions
            .entry(order.asset_index())
            .or_insert_with(|| Position::new(order.asset_index()));

        match position.trade_mut(order.strategy_index()) {
            Some(trade) => {
                trade.apply_fill(order.units(), fill_price, unit_multiplier);
            }
            None => {
                let trade_id = self.next_trade_id;
                self.next_trade_id += 1;
                let trade = Trade::open(order, open_time)?.with_id(trade_id);
                position.insert_trade(trade);
            }
        }
        position.recompute();

        if position.is_empty() {
            self.positions.remove(&order.asset_index());
        }
        Ok(())
    }

    /// Re-evaluate every position's trades against `last_price(asset_index)`, accumulate NLV,
    /// and return `(asset_index, strategy_index)` pairs whose trade's exit policy fired.
    /// `unit_multiplier(asset_index)` resolves each position's static contract size.
    pub fn evaluate(
        &mut self,
        last_price: impl Fn(usize) -> Option<f64>,
        unit_multiplier: impl Fn(usize) -> f64,
    ) -> Vec<(usize, usize)> {
        let mut firing = Vec::new();
        let mut closed_trades = Vec::new();
        let mut position_nlv_total = 0.0;
        let mut unrealized_total = 0.0;

        for (&asset_index, position) in self.positions.iter_mut() {
            let Some(price) = last_price(asset_index) else { continue };
            let multiplier = unit_multiplier(asset_index);
            for strategy_index in position.evaluate(price, multiplier) {
                firing.push((asset_index, strategy_index));
            }
            for trade in position.trades() {
                unrealized_total += trade.unrealized_pl();
            }
            position_nlv_total += position.nlv();
        }

        for position in self.positions.values_mut() {
            closed_trades.extend(position.remove_closed_trades());
        }
        self.trade_history.extend(closed_trades);
        self.positions.retain(|_, p| !p.is_empty());

        self.unrealized_pl = unrealized_total;
        self.nlv = self.cash + position_nlv_total;
        firing
    }

    pub fn trade_history(&self) -> &[Trade] {
        &self.trade_history
    }

    pub fn reset(&mut self, starting_cash: f64) {
        self.cash = starting_cash;
        self.nlv = starting_cash;
        self.unrealized_pl = 0.0;
        self.positions.clear();
        self.trade_history.clear();
        self.next_trade_id = 0;
    }
}
