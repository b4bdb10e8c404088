//! Orders: plain value types describing trading intents and their outcomes.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::{HydraError, HydraResult};
use crate::trade::TradeExit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Deserialize, Serialize)]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

/// Terminal/non-terminal order states. Transitions are monotone: once an order reaches one of
/// `Filled`, `Canceled`, or `Rejected` it is archived and never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Deserialize, Serialize)]
pub enum OrderState {
    Pending,
    Open,
    Filled,
    Canceled,
    Rejected,
    Cheat,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Canceled | OrderState::Rejected)
    }
}

/// A single order: intent (type, units, optional limit) plus the outcome fields filled in as
/// it moves through [`Exchange`](crate::exchange::Exchange) matching and
/// [`Router`](crate::router::Router) dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    order_id: u64,
    asset_index: usize,
    strategy_index: usize,
    portfolio_index: usize,
    broker_index: usize,

    order_type: OrderType,
    state: OrderState,
    units: f64,
    limit: Option<f64>,

    create_time: i64,
    fill_time: Option<i64>,
    cancel_time: Option<i64>,

    average_price: Option<f64>,
    cash_impact: f64,
    margin_impact: f64,

    exit: Option<TradeExit>,
    beta_hedge_child: Option<Box<Order>>,

    pub phantom: bool,
    pub force_close: bool,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: u64,
        order_type: OrderType,
        asset_index: usize,
        units: f64,
        strategy_index: usize,
        portfolio_index: usize,
        broker_index: usize,
        create_time: i64,
        exit: Option<TradeExit>,
        phantom: bool,
    ) -> HydraResult<Self> {
        if units == 0.0 {
            return Err(HydraError::InvalidArgument("order units must be non-zero".into()));
        }
        Ok(Self {
            order_id,
            asset_index,
            strategy_index,
            portfolio_index,
            broker_index,
            order_type,
            state: OrderState::Pending,
            units,
            limit: None,
            create_time,
            fill_time: None,
            cancel_time: None,
            average_price: None,
            cash_impact: 0.0,
            margin_impact: 0.0,
            exit,
            beta_hedge_child: None,
            phantom,
            force_close: false,
        })
    }

    pub fn order_id(&self) -> u64 {
        self.order_id
    }

    pub fn asset_index(&self) -> usize {
        self.asset_index
    }

    pub fn strategy_index(&self) -> usize {
        self.strategy_index
    }

    pub fn portfolio_index(&self) -> usize {
        self.portfolio_index
    }

    pub fn broker_index(&self) -> usize {
        self.broker_index
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn units(&self) -> f64 {
        self.units
    }

    pub fn limit(&self) -> Option<f64> {
        self.limit
    }

    pub fn set_limit(&mut self, limit: f64) {
        self.limit = Some(limit);
    }

    pub fn average_price(&self) -> Option<f64> {
        self.average_price
    }

    pub fn fill_time(&self) -> Option<i64> {
        self.fill_time
    }

    pub fn cash_impact(&self) -> f64 {
        self.cash_impact
    }

    pub fn set_cash_impact(&mut self, cash_impact: f64) {
        self.cash_impact = cash_impact;
    }

    pub fn margin_impact(&self) -> f64 {
        self.margin_impact
    }

    pub fn set_margin_impact(&mut self, margin_impact: f64) {
        self.margin_impact = margin_impact;
    }

    pub fn take_exit(&mut self) -> Option<TradeExit> {
        self.exit.take()
    }

    pub fn exit_policy(&self) -> Option<&TradeExit> {
        self.exit.as_ref()
    }

    pub fn insert_beta_hedge_child(&mut self, child: Order) {
        self.beta_hedge_child = Some(Box::new(child));
    }

    pub fn take_beta_hedge_child(&mut self) -> Option<Order> {
        self.beta_hedge_child.take().map(|b| *b)
    }

    pub fn is_filled(&self) -> bool {
        self.state == OrderState::Filled
    }

    /// Fill the order at `price`, recording `fill_time` and transitioning to `Filled`.
    pub fn fill(&mut self, price: f64, fill_time: i64) -> HydraResult<()> {
        if self.state.is_terminal() {
            return Err(HydraError::InvalidState(format!(
                "order {} already in terminal state {}",
                self.order_id, self.state
            )));
        }
        self.average_price = Some(price);
        self.fill_time = Some(fill_time);
        self.state = OrderState::Filled;
        Ok(())
    }

    pub fn cancel(&mut self, cancel_time: i64) -> HydraResult<()> {
        if self.state.is_terminal() {
            return Err(HydraError::InvalidState(format!(
                "order {} already in terminal state {}",
                self.order_id, self.state
            )));
        }
        self.cancel_time = Some(cancel_time);
        self.state = OrderState::Canceled;
        Ok(())
    }

    pub fn reject(&mut self, reject_time: i64) -> HydraResult<()> {
        if self.state.is_terminal() {
            return Err(HydraError::InvalidState(format!(
                "order {} already in terminal state {}",
                self.order_id, self.state
            )));
        }
        self.cancel_time = Some(reject_time);
        self.state = OrderState::Rejected;
        Ok(())
    }

    pub fn mark_open(&mut self) {
        if self.state == OrderState::Pending {
            self.state = OrderState::Open;
        }
    }

    pub fn mark_cheat(&mut self) {
        self.state = OrderState::Cheat;
    }

    /// Build the inverse order used to close out a trade entirely (e.g. on exit-policy firing,
    /// asset expiry, or engine shutdown force-close).
    pub fn inverse(
        &self,
        order_id: u64,
        create_time: i64,
        force_close: bool,
    ) -> HydraResult<Order> {
        let mut inverse = Order::new(
            order_id,
            OrderType::Market,
            self.asset_index,
            -self.units,
            self.strategy_index,
            self.portfolio_index,
            self.broker_index,
            create_time,
            None,
            self.phantom,
        )?;
        inverse.force_close = force_close;
        Ok(inverse)
    }
}
