//! Per-`(asset_index, strategy_index)` open lot with average-price accounting, and the
//! [`TradeExit`] policy family that can close a trade automatically.

use serde::{Deserialize, Serialize};

use crate::error::{HydraError, HydraResult};
use crate::order::Order;

/// Boolean combinator used when a [`TradeExit`] chains a `child_exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ExitCombinator {
    And,
    Or,
}

/// A trade-exit policy, evaluated after each [`Trade::evaluate`].
///
/// `Threshold`'s percentages are resolved to absolute prices against the trade's price at the
/// first `build()` call, mirroring the source engine's `ExitThreshold::build`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum TradeExit {
    /// Fires once `bars_held == n`.
    Bars(usize),
    /// Fires when `last_price <= stop_loss` or `>= take_profit`, in absolute price terms.
    /// Construct with [`TradeExit::threshold`]; call [`TradeExit::build`] before first use.
    Threshold {
        stop_loss_pct: Option<f64>,
        take_profit_pct: Option<f64>,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        built: bool,
    },
    /// Fires when `last_price <= lb` or `>= ub`.
    Band { lb: f64, ub: f64 },
    /// Chains two exits with an `And`/`Or` combinator.
    Composite {
        child: Box<TradeExit>,
        next: Box<TradeExit>,
        combinator: ExitCombinator,
    },
}

impl TradeExit {
    pub fn bars(n: usize) -> Self {
        TradeExit::Bars(n)
    }

    pub fn threshold(stop_loss_pct: Option<f64>, take_profit_pct: Option<f64>) -> Self {
        TradeExit::Threshold {
            stop_loss_pct,
            take_profit_pct,
            stop_loss: None,
            take_profit: None,
            built: false,
        }
    }

    pub fn band(lb: f64, ub: f64) -> Self {
        TradeExit::Band { lb, ub }
    }

    pub fn and(self, other: TradeExit) -> Self {
        TradeExit::Composite {
            child: Box::new(self),
            next: Box::new(other),
            combinator: ExitCombinator::And,
        }
    }

    pub fn or(self, other: TradeExit) -> Self {
        TradeExit::Composite {
            child: Box::new(self),
            next: Box::new(other),
            combinator: ExitCombinator::Or,
        }
    }

    /// Resolve `Threshold` percentages against `open_price`. Called once, on first evaluation
    /// of the owning trade.
    pub fn build(&mut self, open_price: f64) {
        match self {
            TradeExit::Threshold {
                stop_loss_pct,
                take_profit_pct,
                stop_loss,
                take_profit,
                built,
            } => {
                if !*built {
                    *stop_loss = stop_loss_pct.map(|pct| (1.0 + pct) * open_price);
                    *take_profit = take_profit_pct.map(|pct| (1.0 + pct) * open_price);
                    *built = true;
                }
            }
            TradeExit::Composite { child, next, .. } => {
                child.build(open_price);
                next.build(open_price);
            }
            TradeExit::Bars(_) | TradeExit::Band { .. } => {}
        }
    }

    /// Does this policy fire given the trade's current `last_price` and `bars_held`?
    pub fn should_exit(&self, last_price: f64, bars_held: usize) -> bool {
        match self {
            TradeExit::Bars(n) => bars_held == *n,
            TradeExit::Threshold { stop_loss, take_profit, .. } => {
                stop_loss.is_some_and(|sl| last_price <= sl)
                    || take_profit.is_some_and(|tp| last_price >= tp)
            }
            TradeExit::Band { lb, ub } => last_price <= *lb || last_price >= *ub,
            TradeExit::Composite { child, next, combinator } => {
                let a = child.should_exit(last_price, bars_held);
                let b = next.should_exit(last_price, bars_held);
                match combinator {
                    ExitCombinator::And => a && b,
                    ExitCombinator::Or => a || b,
                }
            }
        }
    }
}

/// An open lot in one asset under one strategy, tracked with volume-weighted average-price
/// accounting across increases, and realized P&L accrual on reductions/closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    trade_id: u64,
    asset_index: usize,
    strategy_index: usize,
    portfolio_index: usize,

    units: f64,
    average_price: f64,
    last_price: f64,
    unrealized_pl: f64,
    realized_pl: f64,
    nlv: f64,

    open_time: i64,
    bars_held: usize,

    exit: Option<TradeExit>,
}

impl Trade {
    /// Open a new trade from a freshly-filled order with no prior position.
    pub fn open(order: &Order, open_time: i64) -> HydraResult<Self> {
        let fill_price = order
            .average_price()
            .ok_or_else(|| HydraError::InvalidState("cannot open a trade from an unfilled order".into()))?;
        let mut exit = order.exit_policy().cloned();
        if let Some(exit) = exit.as_mut() {
            exit.build(fill_price);
        }
        Ok(Self {
            trade_id: 0,
            asset_index: order.asset_index(),
            strategy_index: order.strategy_index(),
            portfolio_index: order.portfolio_index(),
            units: order.units(),
            average_price: fill_price,
            last_price: fill_price,
            unrealized_pl: 0.0,
            realized_pl: 0.0,
            nlv: 0.0,
            open_time,
            bars_held: 0,
            exit,
        })
    }

    pub fn with_id(mut self, trade_id: u64) -> Self {
        self.trade_id = trade_id;
        self
    }

    pub fn trade_id(&self) -> u64 {
        self.trade_id
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

    pub fn units(&self) -> f64 {
        self.units
    }

    pub fn average_price(&self) -> f64 {
        self.average_price
    }

    pub fn unrealized_pl(&self) -> f64 {
        self.unrealized_pl
    }

    pub fn realized_pl(&self) -> f64 {
        self.realized_pl
    }

    pub fn nlv(&self) -> f64 {
        self.nlv
    }

    pub fn bars_held(&self) -> usize {
        self.bars_held
    }

    pub fn is_closed(&self) -> bool {
        self.units == 0.0
    }

    /// Apply a fill of `(qty, price)` against this trade, implementing the increase / reduce /
    /// close / cross-zero-adjust state machine. `qty` carries the sign of the fill (same sign as
    /// existing units increases, opposite sign reduces/closes).
    pub fn apply_fill(&mut self, qty: f64, price: f64, unit_multiplier: f64) {
        if qty == 0.0 {
            return;
        }
        let same_sign = self.units.signum() == qty.signum();

        if same_sign {
            // Increase
            let new_units = self.units + qty;
            self.average_price = (self.average_price * self.units + price * qty) / new_units;
            self.units = new_units;
            return;
        }

        if qty.abs() < self.units.abs() {
            // Reduce
            self.realized_pl += (price - self.average_price) * (-qty) * unit_multiplier;
            self.units += qty;
            return;
        }

        if qty.abs() == self.units.abs() {
            // Close: the closing leg's signed quantity is -self.units, so -(-self.units) = self.units.
            self.realized_pl += (price - self.average_price) * self.units * unit_multiplier;
            self.units = 0.0;
            return;
        }

        // Adjust / cross-zero: close existing leg (full -self.units, regardless of qty's
        // overshoot), then open the remainder at `price`.
        self.realized_pl += (price - self.average_price) * self.units * unit_multiplier;
        let remainder = qty + self.units;
        self.units = remainder;
        self.average_price = price;
    }

    /// Re-evaluate `unrealized_pl`/`nlv` against the latest published price and increment
    /// `bars_held`. Returns whether the trade's exit policy (if any) now fires.
    pub fn evaluate(&mut self, last_price: f64, unit_multiplier: f64) -> bool {
        self.last_price = last_price;
        self.unrealized_pl = (last_price - self.average_price) * self.units * unit_multiplier;
        self.nlv = last_price * self.units * unit_multiplier;
        self.bars_held += 1;

        self.exit
            .as_ref()
            .is_some_and(|exit| exit.should_exit(self.last_price, self.bars_held))
    }
}
