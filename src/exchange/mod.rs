//! Aligns a group of assets to one datetime vector and runs the order-matching state machine.

pub mod view;

use std::collections::HashMap;

use smol_str::SmolStr;

pub use view::{ExchangeView, Ranking};

use crate::asset::{Asset, AssetType, Frequency};
use crate::error::{HydraError, HydraResult};
use crate::order::{Order, OrderType};
use crate::time::TimeIndex;

/// Groups a set of (global-indexed) assets sharing one datetime vector, matches orders against
/// their published prices, and maintains the exchange-local market clock.
pub struct Exchange {
    id: SmolStr,
    asset_type: AssetType,
    frequency: Frequency,

    assets: Vec<Asset>,
    global_to_local: HashMap<usize, usize>,

    dt: Option<TimeIndex>,
    current_index: usize,
    exchange_time: Option<i64>,

    pending_orders: Vec<Order>,
    filled_orders: Vec<Order>,

    market_asset: Option<usize>,
    beta_lookback: Option<usize>,

    is_built: bool,
}

impl Exchange {
    pub fn new(id: impl Into<SmolStr>, asset_type: AssetType, frequency: Frequency) -> Self {
        Self {
            id: id.into(),
            asset_type,
            frequency,
            assets: Vec::new(),
            global_to_local: HashMap::new(),
            dt: None,
            current_index: 0,
            exchange_time: None,
            pending_orders: Vec::new(),
            filled_orders: Vec::new(),
            market_asset: None,
            beta_lookback: None,
            is_built: false,
        }
    }

    pub fn id(&self) -> &SmolStr {
        &self.id
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub(crate) fn assets_mut(&mut self) -> &mut [Asset] {
        &mut self.assets
    }

    pub fn exchange_time(&self) -> Option<i64> {
        self.exchange_time
    }

    /// The lookback passed to [`Exchange::set_market_asset`], if a market asset is configured.
    pub fn beta_lookback(&self) -> Option<usize> {
        self.beta_lookback
    }

    pub fn add_asset(&mut self, asset: Asset) {
        self.assets.push(asset);
    }

    /// Designate one already-added asset (by global index) as the market asset used for beta
    /// construction. Must be called before [`Exchange::build`].
    pub fn set_market_asset(&mut self, global_asset_index: usize, beta_lookback: usize) -> HydraResult<()> {
        let local = self
            .assets
            .iter()
            .position(|a| a.index() == global_asset_index)
            .ok_or_else(|| HydraError::InvalidId(format!("unknown asset index {global_asset_index}")))?;
        self.market_asset = Some(local);
        self.beta_lookback = Some(beta_lookback);
        self.assets[local].set_market_asset(true);
        Ok(())
    }

    /// Union-sort member assets' datetime vectors into the canonical exchange timeline, compute
    /// per-asset alignment/offset, and build beta/volatility columns when a market asset is set.
    pub fn build(&mut self) -> HydraResult<()> {
        if self.assets.is_empty() {
            return Err(HydraError::InvalidArgument(format!(
                "exchange {} has no assets to build",
                self.id
            )));
        }

        let series: Vec<&[i64]> = self.assets.iter().map(|a| a.dt_index()).collect();
        let merged = TimeIndex::merge(series)?;

        for (local, asset) in self.assets.iter_mut().enumerate() {
            self.global_to_local.insert(asset.index(), local);
            let aligned = asset.dt_index().len() == merged.len();
            asset.set_alignment(aligned);
            let offset = merged
                .position_of(asset.dt_index()[0])
                .ok_or_else(|| HydraError::InvalidState("asset start time missing from merged timeline".into()))?;
            asset.set_exchange_offset(offset);
        }

        if let Some(local_market) = self.market_asset {
            let lookback = self.beta_lookback.unwrap_or(20);
            let market_close = self.assets[local_market].close_series();

            for (local, asset) in self.assets.iter().enumerate() {
                if local == local_market {
                    continue;
                }
                if !self.assets[local_market].encloses(asset) {
                    return Err(HydraError::InvalidArgument(format!(
                        "market asset does not enclose asset {} on exchange {}",
                        asset.id(),
                        self.id
                    )));
                }
            }

            for (local, asset) in self.assets.iter_mut().enumerate() {
                if local == local_market {
                    continue;
                }
                asset.build_beta_column(&market_close, lookback)?;
                asset.build_volatility_column(lookback);
            }
        }

        self.dt = Some(merged);
        self.is_built = true;
        Ok(())
    }

    fn local_index(&self, global_asset_index: usize) -> HydraResult<usize> {
        self.global_to_local
            .get(&global_asset_index)
            .copied()
            .ok_or_else(|| HydraError::InvalidId(format!(
                "asset {global_asset_index} does not belong to exchange {}",
                self.id
            )))
    }

    /// Advance the exchange cursor by one tick. For each owned asset whose local clock matches
    /// the new `exchange_time`, advance that asset (which notifies its observers). Returns the
    /// global indices of assets that expired this tick.
    pub fn step(&mut self) -> HydraResult<Vec<usize>> {
        let dt = self.dt.as_ref().ok_or_else(|| {
            HydraError::InvalidState(format!("exchange {} stepped before build()", self.id))
        })?;
        if self.current_index >= dt.len() {
            return Ok(Vec::new());
        }
        let exchange_time = dt.get(self.current_index).expect("checked bound above");
        self.current_index += 1;
        self.exchange_time = Some(exchange_time);

        let mut expired = Vec::new();
        for asset in self.assets.iter_mut() {
            let local_clock = asset.dt_index().get(asset.current_index()).copied();
            if local_clock == Some(exchange_time) {
                let did_expire = asset.step();
                if did_expire {
                    expired.push(asset.index());
                }
            }
        }
        Ok(expired)
    }

    /// Rewind every member asset's cursor to its warmup row and clear the order queues and
    /// local clock, restoring the state `build()` left the exchange in.
    pub fn reset(&mut self) {
        self.current_index = 0;
        self.exchange_time = None;
        self.pending_orders.clear();
        self.filled_orders.clear();
        for asset in self.assets.iter_mut() {
            asset.reset(None);
        }
    }

    pub fn place_order(&mut self, order: Order) -> HydraResult<()> {
        self.local_index(order.asset_index())?;
        self.pending_orders.push(order);
        Ok(())
    }

    /// Process the pending-order queue for the current tick's leg (`on_close` selects whether
    /// orders are evaluated against `open` or `close`). FIFO within the leg. Orders that match
    /// are filled/rejected and returned for archival/routing; orders that do not match (limit,
    /// stop-loss, take-profit awaiting trigger) remain queued.
    pub fn process_orders(&mut self, on_close: bool) -> Vec<Order> {
        let exchange_time = self.exchange_time.unwrap_or(0);
        let mut still_pending = Vec::new();
        let mut terminal = Vec::new();

        for mut order in std::mem::take(&mut self.pending_orders) {
            order.mark_open();
            match self.try_match(&order, on_close, exchange_time) {
                Ok(Some(fill_price)) => {
                    let _ = order.fill(fill_price, exchange_time);
                    terminal.push(order);
                }
                Ok(None) => still_pending.push(order),
                Err(_) => {
                    let _ = order.reject(exchange_time);
                    terminal.push(order);
                }
            }
        }

        self.pending_orders = still_pending;
        for order in &terminal {
            self.filled_orders.push(order.clone());
        }
        terminal
    }

    /// Drain and cancel every order still queued, regardless of leg. Called once at the end of
    /// a run so no order is left in a non-terminal state.
    pub fn cancel_pending_orders(&mut self, cancel_time: i64) -> Vec<Order> {
        std::mem::take(&mut self.pending_orders)
            .into_iter()
            .map(|mut order| {
                let _ = order.cancel(cancel_time);
                order
            })
            .collect()
    }

    /// Returns `Ok(Some(fill_price))` if `order` matches now, `Ok(None)` if it should stay
    /// queued, `Err` if the order is invalid (asset not streaming).
    fn try_match(&self, order: &Order, on_close: bool, _exchange_time: i64) -> HydraResult<Option<f64>> {
        let local = self.local_index(order.asset_index())?;
        let asset = &self.assets[local];
        if !asset.is_streaming() {
            return Err(HydraError::InvalidState(format!("asset {} not streaming", asset.id())));
        }
        let published = asset.current_price(on_close)?;
        let long = order.units() > 0.0;

        Ok(match order.order_type() {
            OrderType::Market => Some(published),
            OrderType::Limit => {
                let limit = order
                    .limit()
                    .ok_or_else(|| HydraError::InvalidArgument("limit order missing limit price".into()))?;
                let crosses = if long { published <= limit } else { published >= limit };
                crosses.then(|| if long { published.min(limit) } else { published.max(limit) })
            }
            OrderType::StopLoss => {
                let stop = order
                    .limit()
                    .ok_or_else(|| HydraError::InvalidArgument("stop-loss order missing stop price".into()))?;
                let triggered = if long { published <= stop } else { published >= stop };
                triggered.then_some(published)
            }
            OrderType::TakeProfit => {
                let target = order
                    .limit()
                    .ok_or_else(|| HydraError::InvalidArgument("take-profit order missing target price".into()))?;
                let triggered = if long { published >= target } else { published <= target };
                triggered.then_some(published)
            }
        })
    }

    /// Snapshot `col` at `offset` for every visible, warmed-up asset, ranked per `ranking`.
    pub fn get_exchange_view(&self, col: &str, offset: i64, ranking: Ranking) -> HydraResult<ExchangeView> {
        self.get_exchange_view_with(ranking, |asset| asset.get_asset_feature_named(col, offset))
    }

    /// Snapshot produced by applying `f` to every visible, warmed-up asset, ranked per `ranking`.
    pub fn get_exchange_view_with(
        &self,
        ranking: Ranking,
        f: impl Fn(&Asset) -> HydraResult<f64>,
    ) -> HydraResult<ExchangeView> {
        let entries = self
            .assets
            .iter()
            .filter(|a| a.is_in_exchange_view() && a.current_index() > a.warmup())
            .filter_map(|a| f(a).ok().map(|v| (a.index(), v)))
            .collect();
        Ok(ExchangeView::new(entries, ranking))
    }
}
