//! One-pass trading performance summary: Sharpe/Sortino ratios, max drawdown, win rate, and
//! profit factor, derived from closed trades and the portfolio equity curve.

pub mod algorithm;

use prettytable::{row, Row, Table};
use serde::{Deserialize, Serialize};

use crate::statistic::algorithm::WelfordOnline;
use crate::trade::Trade;

/// One-pass mean/variance accumulator (Welford's algorithm), reused for both the full trade
/// return series and the losses-only subseries feeding the Sortino ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    count: usize,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let prev_mean = self.mean;
        self.mean = WelfordOnline::calculate_mean(self.mean, value, self.count as f64);
        self.m2 = WelfordOnline::calculate_recurrence_relation_m(self.m2, prev_mean, value, self.mean);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        WelfordOnline::calculate_sample_variance(self.m2, self.count as f64).sqrt()
    }
}

/// Configuration for a [`TradingSummaryGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TradingSummaryConfig {
    pub starting_equity: f64,
    pub trading_days_per_year: usize,
    pub risk_free_return: f64,
}

/// Accumulates performance statistics over a run, one closed [`Trade`] and one equity sample at
/// a time. Every update is O(1); no trade history needs to be retained.
#[derive(Debug, Clone)]
pub struct TradingSummaryGenerator {
    config: TradingSummaryConfig,
    trade_returns: RunningStats,
    loss_returns: RunningStats,
    wins: usize,
    losses: usize,
    gross_profit: f64,
    gross_loss: f64,
    equity_peak: f64,
    max_drawdown: f64,
}

impl TradingSummaryGenerator {
    pub fn new(config: TradingSummaryConfig) -> Self {
        Self {
            config,
            trade_returns: RunningStats::default(),
            loss_returns: RunningStats::default(),
            wins: 0,
            losses: 0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            equity_peak: config.starting_equity,
            max_drawdown: 0.0,
        }
    }

    /// Feed one closed trade's realized P&L, expressed as a return against starting equity.
    pub fn update_trade(&mut self, trade: &Trade) {
        let pnl = trade.realized_pl();
        let pnl_return = pnl / self.config.starting_equity;
        self.trade_returns.update(pnl_return);

        if pnl.is_sign_negative() {
            self.losses += 1;
            self.gross_loss += pnl;
            self.loss_returns.update(pnl_return);
        } else {
            self.wins += 1;
            self.gross_profit += pnl;
        }
    }

    /// Feed one tick's portfolio NLV, updating the running equity peak and max drawdown.
    pub fn update_equity(&mut self, nlv: f64) {
        if nlv > self.equity_peak {
            self.equity_peak = nlv;
        }
        let drawdown = (self.equity_peak - nlv) / self.equity_peak;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
    }

    /// Daily Sharpe ratio: mean trade return in excess of the risk-free rate, divided by the
    /// trade-return standard deviation, annualized by `sqrt(trading_days_per_year)`.
    pub fn sharpe_ratio(&self) -> f64 {
        let std_dev = self.trade_returns.std_dev();
        if std_dev == 0.0 {
            return 0.0;
        }
        ((self.trade_returns.mean() - self.config.risk_free_return) / std_dev) * (self.config.trading_days_per_year as f64).sqrt()
    }

    /// Like [`sharpe_ratio`](Self::sharpe_ratio) but the denominator is the standard deviation of
    /// losing-trade returns only.
    pub fn sortino_ratio(&self) -> f64 {
        let std_dev = self.loss_returns.std_dev();
        if std_dev == 0.0 {
            return 0.0;
        }
        ((self.trade_returns.mean() - self.config.risk_free_return) / std_dev) * (self.config.trading_days_per_year as f64).sqrt()
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn win_rate(&self) -> f64 {
        let total = self.wins + self.losses;
        if total == 0 {
            0.0
        } else {
            self.wins as f64 / total as f64
        }
    }

    /// Gross profit divided by gross loss (absolute). `f64::INFINITY` if there have been no
    /// losing trades yet.
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss == 0.0 {
            return f64::INFINITY;
        }
        self.gross_profit / self.gross_loss.abs()
    }

    pub fn trade_count(&self) -> usize {
        self.trade_returns.count()
    }

    pub fn print(&self) {
        let mut table = Table::new();
        let titles = vec![
            "",
            "Trades",
            "Wins",
            "Losses",
            "Win Rate",
            "Profit Factor",
            "Sharpe",
            "Sortino",
            "Max Drawdown",
        ];
        table.add_row(row![
            "Total",
            self.trade_count(),
            self.wins,
            self.losses,
            format!("{:.3}", self.win_rate()),
            format!("{:.3}", self.profit_factor()),
            format!("{:.3}", self.sharpe_ratio()),
            format!("{:.3}", self.sortino_ratio()),
            format!("{:.3}", self.max_drawdown()),
        ]);
        table.set_titles(Row::from(titles));
        table.printstd();
    }
}
