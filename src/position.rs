//! Per-asset aggregate of all strategies' [`Trade`]s under one portfolio.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::trade::Trade;

/// Aggregates every open [`Trade`] in one asset, across all strategies sharing the same
/// portfolio. A `Position` exists iff its trade map is non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    asset_index: usize,
    average_price: f64,
    last_price: f64,
    nlv: f64,
    bars_held: usize,
    trades: BTreeMap<usize, Trade>,
}

impl Position {
    pub fn new(asset_index: usize) -> Self {
        Self {
            asset_index,
            ..Default::default()
        }
    }

    pub fn asset_index(&self) -> usize {
        self.asset_index
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn units(&self) -> f64 {
        self.trades.values().map(Trade::units).sum()
    }

    pub fn average_price(&self) -> f64 {
        self.average_price
    }

    pub fn nlv(&self) -> f64 {
        self.nlv
    }

    pub fn bars_held(&self) -> usize {
        self.bars_held
    }

    pub fn trade(&self, strategy_index: usize) -> Option<&Trade> {
        self.trades.get(&strategy_index)
    }

    pub fn trade_mut(&mut self, strategy_index: usize) -> Option<&mut Trade> {
        self.trades.get_mut(&strategy_index)
    }

    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.values()
    }

    pub fn insert_trade(&mut self, trade: Trade) {
        self.trades.insert(trade.strategy_index(), trade);
        self.recompute();
    }

    /// Remove a closed trade (`units == 0`) from the position, archiving it elsewhere is the
    /// caller's responsibility (portfolio moves it to `trade_history`).
    pub fn remove_closed_trades(&mut self) -> Vec<Trade> {
        let (closed, open): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.trades).into_values().partition(|t| t.is_closed());
        self.trades = open.into_iter().map(|t| (t.strategy_index(), t)).collect();
        self.recompute();
        closed
    }

    /// Recompute `units`/`average_price`/`nlv` from the current trade set. Called after any
    /// trade mutation.
    pub fn recompute(&mut self) {
        let total_units = self.units();
        if total_units == 0.0 || self.trades.is_empty() {
            self.average_price = 0.0;
        } else {
            let weighted: f64 = self.trades.values().map(|t| t.average_price() * t.units()).sum();
            self.average_price = weighted / total_units;
        }
        self.nlv = self.trades.values().map(Trade::nlv).sum();
    }

    /// Re-evaluate every child trade against `last_price`, returning the strategy indices whose
    /// trade's exit policy fired this tick.
    pub fn evaluate(&mut self, last_price: f64, unit_multiplier: f64) -> Vec<usize> {
        self.last_price = last_price;
        self.bars_held += 1;
        let firing = self
            .trades
            .iter_mut()
            .filter_map(|(strategy_index, trade)| {
                trade.evaluate(last_price, unit_multiplier).then_some(*strategy_index)
            })
            .collect();
        self.recompute();
        firing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Order, OrderType};
    use approx::assert_relative_eq;

    fn trade(strategy_index: usize, units: f64, price: f64) -> Trade {
        let mut order = Order::new(1, OrderType::Market, 0, units, strategy_index, 0, 0, 0, None, false).unwrap();
        order.fill(price, 0).unwrap();
        Trade::open(&order, 0).unwrap()
    }

    #[test]
    fn aggregates_units_and_weighted_average_price_across_strategies() {
        let mut position = Position::new(0);
        position.insert_trade(trade(0, 10.0, 100.0));
        position.insert_trade(trade(1, 5.0, 130.0));

        assert_eq!(position.units(), 15.0);
        assert_relative_eq!(position.average_price(), (100.0 * 10.0 + 130.0 * 5.0) / 15.0);
    }

    #[test]
    fn remove_closed_trades_drops_zero_unit_trades() {
        let mut position = Position::new(0);
        let mut t = trade(0, 10.0, 100.0);
        t.apply_fill(-10.0, 110.0, 1.0);
        position.insert_trade(t);
        position.insert_trade(trade(1, 5.0, 100.0));

        let closed = position.remove_closed_trades();
        assert_eq!(closed.len(), 1);
        assert_eq!(position.units(), 5.0);
    }

    #[test]
    fn position_is_empty_once_all_trades_removed() {
        let mut position = Position::new(0);
        let mut t = trade(0, 10.0, 100.0);
        t.apply_fill(-10.0, 100.0, 1.0);
        position.insert_trade(t);
        position.remove_closed_trades();
        assert!(position.is_empty());
    }
}
