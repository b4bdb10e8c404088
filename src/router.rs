//! Single-writer queue that dispatches orders to exchanges and fills to portfolios.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::HydraResult;
use crate::exchange_map::ExchangeMap;
use crate::order::{Order, OrderState};

/// Outcome of routing one terminal order, telling the caller which portfolio to hand the fill
/// to (if any).
pub struct RoutedFill {
    pub portfolio_index: usize,
    pub order: Order,
}

/// A concurrent, single-writer-per-tick queue: strategies call [`Router::place_order`]
/// (non-blocking, FIFO); the engine calls [`Router::process`] once per leg to drain it.
///
/// `order_history` is the only shared-mutable structure in the kernel and is guarded by a
/// [`parking_lot::Mutex`].
pub struct Router {
    queue: Mutex<VecDeque<Order>>,
    order_history: Mutex<Vec<Order>>,
    log_orders: bool,
}

impl Router {
    pub fn new(log_orders: bool) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            order_history: Mutex::new(Vec::new()),
            log_orders,
        }
    }

    pub fn place_order(&self, order: Order) {
        self.queue.lock().push_back(order);
    }

    pub fn order_history_len(&self) -> usize {
        self.order_history.lock().len()
    }

    pub fn order_history(&self) -> Vec<Order> {
        self.order_history.lock().clone()
    }

    /// Drain the queue, routing each order by its state, and return fills destined for
    /// portfolios. `PENDING` orders are forwarded to their owning exchange's queue via
    /// `exchanges`; `FILLED`/`CHEAT` orders are returned for the caller to hand to the
    /// destination portfolio. Any beta-hedge child linked to a filled parent is detached and
    /// re-submitted as a new `PENDING` order (inheriting the parent's `phantom` flag).
    pub fn process(&self, exchanges: &mut ExchangeMap) -> HydraResult<Vec<RoutedFill>> {
        let drained: Vec<Order> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };

        let mut fills = Vec::new();
        for mut order in drained {
            match order.state() {
                OrderState::Pending | OrderState::Open => {
                    exchanges.route_order(order)?;
                    continue;
                }
                OrderState::Filled | OrderState::Cheat => {
                    if let Some(mut child) = order.take_beta_hedge_child() {
                        child.phantom = order.phantom;
                        self.place_order(child);
                    }
                    if self.log_orders {
                        tracing::debug!(order_id = order.order_id(), asset_index = order.asset_index(), "order filled");
                    }
                    let portfolio_index = order.portfolio_index();
                    self.order_history.lock().push(order.clone());
                    fills.push(RoutedFill { portfolio_index, order });
                }
                OrderState::Canceled | OrderState::Rejected => {
                    self.order_history.lock().push(order);
                }
            }
        }
        Ok(fills)
    }

    pub fn reset(&self) {
        self.queue.lock().clear();
        self.order_history.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Asset, AssetType, Frequency};
    use crate::exchange::Exchange;
    use crate::order::OrderType;

    fn exchange_map_with_asset() -> ExchangeMap {
        let dt = vec![0i64, 86_400_000_000_000];
        let asset = Asset::new(
            "A",
            "EXCH",
            AssetType::Equity,
            Frequency::Day1,
            "America/New_York",
            1.0,
            0,
            vec![("open".into(), 0), ("close".into(), 1)],
            vec![10.0, 10.0, 11.0, 11.0],
            dt,
        )
        .unwrap();
        let mut exchange = Exchange::new("EXCH", AssetType::Equity, Frequency::Day1);
        exchange.add_asset(asset);
        exchange.build().unwrap();

        let mut map = ExchangeMap::new();
        map.new_exchange(exchange).unwrap();
        map.build().unwrap();
        map
    }

    #[test]
    fn pending_orders_route_to_owning_exchange() {
        let router = Router::new(true);
        let mut map = exchange_map_with_asset();
        let order = Order::new(1, OrderType::Market, 0, 10.0, 0, 0, 0, 0, None, false).unwrap();
        router.place_order(order);

        let fills = router.process(&mut map).unwrap();
        assert!(fills.is_empty());
        assert_eq!(map.exchange("EXCH").unwrap().assets().len(), 1);
    }

    #[test]
    fn filled_orders_are_archived_and_returned_as_fills() {
        let router = Router::new(true);
        let mut map = exchange_map_with_asset();
        let mut order = Order::new(1, OrderType::Market, 0, 10.0, 0, 0, 0, 0, None, false).unwrap();
        order.fill(10.0, 0).unwrap();
        router.place_order(order);

        let fills = router.process(&mut map).unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(router.order_history_len(), 1);
    }
}
