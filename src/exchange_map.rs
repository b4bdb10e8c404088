//! Merges every [`Exchange`]'s datetime vector into one global clock, and owns the global
//! asset-index space plus the cross-asset covariance matrix.

use std::collections::HashMap;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::covariance::IncrementalCovariance;
use crate::error::{HydraError, HydraResult};
use crate::exchange::Exchange;
use crate::order::Order;
use crate::time::TimeIndex;

/// Owns every [`Exchange`], the union-sorted global clock, and the global asset-index space.
/// Assets are assigned a globally-unique index in insertion order as exchanges are built.
pub struct ExchangeMap {
    exchanges: IndexMap<SmolStr, Exchange>,
    dt: Option<TimeIndex>,
    current_index: usize,
    next_asset_index: usize,
    asset_id_to_index: HashMap<SmolStr, usize>,
    asset_to_exchange: HashMap<usize, SmolStr>,

    covariance_enabled: bool,
    covariance_window: usize,
    covariance_step_size: usize,
    ticks_since_covariance_update: usize,
    /// Lower-triangular map keyed by `(min(i,j), max(i,j))`.
    covariance_estimators: HashMap<(usize, usize), IncrementalCovariance>,
    covariance_matrix: HashMap<(usize, usize), f64>,

    expired_this_step: Vec<usize>,
}

impl ExchangeMap {
    pub fn new() -> Self {
        Self {
            exchanges: IndexMap::new(),
            dt: None,
            current_index: 0,
            next_asset_index: 0,
            asset_id_to_index: HashMap::new(),
            asset_to_exchange: HashMap::new(),
            covariance_enabled: false,
            covariance_window: 0,
            covariance_step_size: 1,
            ticks_since_covariance_update: 0,
            covariance_estimators: HashMap::new(),
            covariance_matrix: HashMap::new(),
            expired_this_step: Vec::new(),
        }
    }

    pub fn enable_covariance_matrix(&mut self, window: usize, step_size: usize) {
        self.covariance_enabled = true;
        self.covariance_window = window;
        self.covariance_step_size = step_size.max(1);
    }

    /// Register `exchange`, assigning every one of its assets a globally-unique index (stable
    /// across calls for a given asset id) before it is stored.
    pub fn new_exchange(&mut self, mut exchange: Exchange) -> HydraResult<()> {
        let id = exchange.id().clone();
        if self.exchanges.contains_key(&id) {
            return Err(HydraError::InvalidId(format!("exchange {id} already registered")));
        }
        for asset in exchange.assets_mut() {
            let index = self.assign_asset_index(asset.id().clone());
            asset.set_index(index);
        }
        self.exchanges.insert(id, exchange);
        Ok(())
    }

    pub fn exchange(&self, id: &str) -> Option<&Exchange> {
        self.exchanges.get(id)
    }

    pub fn exchange_mut(&mut self, id: &str) -> Option<&mut Exchange> {
        self.exchanges.get_mut(id)
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.values()
    }

    pub fn current_time(&self) -> Option<i64> {
        self.dt.as_ref().and_then(|dt| dt.get(self.current_index.saturating_sub(1)))
    }

    pub fn len(&self) -> usize {
        self.dt.as_ref().map(TimeIndex::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Assign a fresh globally-unique index to `asset_id`, registering it in the id->index map.
    pub fn assign_asset_index(&mut self, asset_id: impl Into<SmolStr>) -> usize {
        let id = asset_id.into();
        if let Some(&existing) = self.asset_id_to_index.get(&id) {
            return existing;
        }
        let index = self.next_asset_index;
        self.next_asset_index += 1;
        self.asset_id_to_index.insert(id, index);
        index
    }

    pub fn asset_index(&self, asset_id: &str) -> Option<usize> {
        self.asset_id_to_index.get(asset_id).copied()
    }

    /// Union-sort every exchange's datetime vector into the global clock. Each member exchange
    /// must already have had `build()` called on it.
    pub fn build(&mut self) -> HydraResult<()> {
        if self.exchanges.is_empty() {
            return Err(HydraError::InvalidArgument("exchange map has no exchanges to build".into()));
        }
        let mut all_dt: Vec<i64> = Vec::new();
        for (exchange_id, exchange) in self.exchanges.iter() {
            for asset in exchange.assets() {
                all_dt.extend_from_slice(asset.dt_index());
                self.asset_to_exchange.insert(asset.index(), exchange_id.clone());
            }
        }
        let merged = TimeIndex::merge([all_dt.as_slice()])?;
        self.dt = Some(merged);
        Ok(())
    }

    /// Route a pending order to the exchange that owns its asset.
    pub fn route_order(&mut self, order: crate::order::Order) -> HydraResult<()> {
        let exchange_id = self
            .asset_to_exchange
            .get(&order.asset_index())
            .cloned()
            .ok_or_else(|| HydraError::InvalidId(format!("no exchange owns asset {}", order.asset_index())))?;
        self.exchanges
            .get_mut(&exchange_id)
            .ok_or_else(|| HydraError::InvalidId(format!("exchange {exchange_id} not found")))?
            .place_order(order)
    }

    pub fn asset_exchange_id(&self, asset_index: usize) -> Option<&SmolStr> {
        self.asset_to_exchange.get(&asset_index)
    }

    /// Look up the static `unit_multiplier` (e.g. futures contract size) of `asset_index`,
    /// used by every average-price/realized_pl/unrealized_pl/NLV computation downstream.
    pub fn unit_multiplier(&self, asset_index: usize) -> Option<f64> {
        let exchange_id = self.asset_to_exchange.get(&asset_index)?;
        self.exchanges
            .get(exchange_id)?
            .assets()
            .iter()
            .find(|asset| asset.index() == asset_index)
            .map(|asset| asset.unit_multiplier())
    }

    /// Advance the global cursor by one tick, stepping every exchange whose own clock matches,
    /// and collecting globally-expired asset indices for portfolio cleanup.
    pub fn step(&mut self) -> HydraResult<&[usize]> {
        let dt = self
            .dt
            .as_ref()
            .ok_or_else(|| HydraError::InvalidState("exchange map stepped before build()".into()))?;
        if self.current_index >= dt.len() {
            self.expired_this_step.clear();
            return Ok(&self.expired_this_step);
        }
        let global_time = dt.get(self.current_index).expect("checked bound above");
        self.current_index += 1;
        tracing::trace!(global_time, "exchange map step");

        let mut expired = Vec::new();
        for exchange in self.exchanges.values_mut() {
            let local_expired = exchange.step()?;
            expired.extend(local_expired);
        }
        self.expired_this_step = expired;

        if self.covariance_enabled {
            self.ticks_since_covariance_update += 1;
            if self.ticks_since_covariance_update >= self.covariance_step_size {
                self.ticks_since_covariance_update = 0;
                self.update_covariance_matrix();
            }
        }

        Ok(&self.expired_this_step)
    }

    /// Drain every member exchange's pending-order queue for one leg (`on_close` selects open or
    /// close), returning the combined terminal orders for the caller to route/archive.
    pub fn process_orders(&mut self, on_close: bool) -> Vec<Order> {
        self.exchanges
            .values_mut()
            .flat_map(|exchange| exchange.process_orders(on_close))
            .collect()
    }

    /// Drain and cancel every exchange's remaining pending orders. Called once at the end of a
    /// run so no order is left in a non-terminal state.
    pub fn cancel_pending_orders(&mut self, cancel_time: i64) -> Vec<Order> {
        self.exchanges
            .values_mut()
            .flat_map(|exchange| exchange.cancel_pending_orders(cancel_time))
            .collect()
    }

    fn update_covariance_matrix(&mut self) {
        let prices: HashMap<usize, f64> = self
            .exchanges
            .values()
            .flat_map(|e| e.assets().iter())
            .filter_map(|a| a.current_price(true).ok().map(|p| (a.index(), p)))
            .collect();

        let indices: Vec<usize> = prices.keys().copied().collect();
        for (pos_i, &i) in indices.iter().enumerate() {
            for &j in indices.iter().skip(pos_i + 1) {
                let key = if i < j { (i, j) } else { (j, i) };
                let estimator = self
                    .covariance_estimators
                    .entry(key)
                    .or_insert_with(|| IncrementalCovariance::new(self.covariance_window));
                estimator.step(prices[&i], prices[&j]);
                self.covariance_matrix.insert(key, estimator.covariance());
            }
        }
    }

    pub fn covariance(&self, asset_a: usize, asset_b: usize) -> f64 {
        if asset_a == asset_b {
            return self
                .covariance_estimators
                .values()
                .next()
                .map(|_| 0.0)
                .unwrap_or(0.0);
        }
        let key = if asset_a < asset_b { (asset_a, asset_b) } else { (asset_b, asset_a) };
        self.covariance_matrix.get(&key).copied().unwrap_or(0.0)
    }

    pub fn expired_this_step(&self) -> &[usize] {
        &self.expired_this_step
    }

    pub fn reset(&mut self) {
        self.current_index = 0;
        self.expired_this_step.clear();
        self.ticks_since_covariance_update = 0;
        self.covariance_estimators.clear();
        self.covariance_matrix.clear();
        for exchange in self.exchanges.values_mut() {
            exchange.reset();
        }
    }
}

impl Default for ExchangeMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Asset, AssetType, Frequency};

    fn make_asset(id: &str, index: usize, closes: &[f64]) -> Asset {
        let dt: Vec<i64> = (0..closes.len() as i64).map(|i| i * 86_400_000_000_000).collect();
        let mut data = Vec::with_capacity(closes.len() * 2);
        for &c in closes {
            data.push(c);
            data.push(c);
        }
        let mut asset = Asset::new(
            id,
            "EXCH",
            AssetType::Equity,
            Frequency::Day1,
            "America/New_York",
            1.0,
            0,
            vec![("open".into(), 0), ("close".into(), 1)],
            data,
            dt,
        )
        .unwrap();
        asset.set_index(index);
        asset
    }

    #[test]
    fn build_merges_exchange_timelines_into_global_clock() {
        let mut map = ExchangeMap::new();
        let mut exchange = Exchange::new("A", AssetType::Equity, Frequency::Day1);
        exchange.add_asset(make_asset("X", 0, &[1.0, 2.0, 3.0]));
        exchange.build().unwrap();
        map.new_exchange(exchange).unwrap();
        map.build().unwrap();
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn assign_asset_index_is_stable_and_idempotent() {
        let mut map = ExchangeMap::new();
        let a = map.assign_asset_index("AAA");
        let b = map.assign_asset_index("BBB");
        let a_again = map.assign_asset_index("AAA");
        assert_eq!(a, a_again);
        assert_ne!(a, b);
    }

    #[test]
    fn step_advances_global_cursor_and_collects_expired_assets() {
        let mut map = ExchangeMap::new();
        let mut exchange = Exchange::new("A", AssetType::Equity, Frequency::Day1);
        exchange.add_asset(make_asset("X", 0, &[1.0, 2.0]));
        exchange.build().unwrap();
        map.new_exchange(exchange).unwrap();
        map.build().unwrap();

        map.step().unwrap();
        assert!(map.expired_this_step().is_empty());
        map.step().unwrap();
        assert_eq!(map.expired_this_step(), &[0]);
    }
}
