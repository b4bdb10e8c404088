//! Per-strategy risk tracers (NLV, cash, leverage, beta, portfolio volatility) and limits.

use serde::{Deserialize, Serialize};

/// Selects which series a [`RiskTracers`] accumulates. Mirrors a fixed-size bitset: cheap to
/// copy, cheap to test membership of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[repr(usize)]
pub enum Tracer {
    Nlv = 0,
    Cash = 1,
    Leverage = 2,
    Beta = 3,
    Volatility = 4,
}

const TRACER_COUNT: usize = 5;
const ALL_TRACERS: [Tracer; TRACER_COUNT] =
    [Tracer::Nlv, Tracer::Cash, Tracer::Leverage, Tracer::Beta, Tracer::Volatility];

impl Tracer {
    /// Every variant, in bitset order. Used to enumerate a [`RiskTracers`]' enabled set when
    /// persisting it into a `StrategyConfig::tracers` list.
    pub fn all() -> [Tracer; TRACER_COUNT] {
        ALL_TRACERS
    }
}

/// A single open position's contribution to a strategy's risk snapshot this tick.
pub struct ExposureSample {
    pub asset_index: usize,
    pub nlv: f64,
    pub beta: Option<f64>,
}

/// Accumulates per-tick NLV/cash/leverage/beta/volatility for one strategy, gated by which
/// [`Tracer`]s are enabled. History buffers are pre-reserved to the run length on [`build`](
/// RiskTracers::build) so `evaluate` never reallocates mid-run.
#[derive(Debug, Default, Clone)]
pub struct RiskTracers {
    enabled: [bool; TRACER_COUNT],

    nlv: f64,
    cash: f64,
    net_beta: f64,
    net_leverage_ratio: f64,
    portfolio_volatility: f64,

    nlv_history: Vec<f64>,
    cash_history: Vec<f64>,
    leverage_history: Vec<f64>,
    beta_history: Vec<f64>,
    volatility_history: Vec<f64>,
}

impl RiskTracers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracers(opts: &[Tracer]) -> Self {
        let mut tracers = Self::new();
        for &opt in opts {
            tracers.set(opt);
        }
        tracers
    }

    pub fn has(&self, tracer: Tracer) -> bool {
        self.enabled[tracer as usize]
    }

    /// Every tracer currently enabled, in bitset order.
    pub fn enabled_tracers(&self) -> Vec<Tracer> {
        Tracer::all().into_iter().filter(|&t| self.has(t)).collect()
    }

    pub fn set(&mut self, tracer: Tracer) {
        self.enabled[tracer as usize] = true;
    }

    pub fn clear(&mut self, tracer: Tracer) {
        self.enabled[tracer as usize] = false;
    }

    /// Pre-reserve history buffers for a run of `n` ticks, for every enabled tracer.
    pub fn build(&mut self, n: usize) {
        if self.has(Tracer::Nlv) {
            self.nlv_history.reserve(n);
        }
        if self.has(Tracer::Cash) {
            self.cash_history.reserve(n);
        }
        if self.has(Tracer::Leverage) {
            self.leverage_history.reserve(n);
        }
        if self.has(Tracer::Beta) {
            self.beta_history.reserve(n);
        }
        if self.has(Tracer::Volatility) {
            self.volatility_history.reserve(n);
        }
    }

    /// Recompute this tick's snapshot from `cash` and the strategy's open exposures, and append
    /// to every enabled history buffer. `covariance(a, b)` supplies the ExchangeMap's pairwise
    /// covariance for the portfolio-volatility calculation.
    pub fn evaluate(&mut self, cash: f64, exposures: &[ExposureSample], covariance: impl Fn(usize, usize) -> f64) {
        self.cash = cash;
        let position_nlv: f64 = exposures.iter().map(|e| e.nlv).sum();
        self.nlv = cash + position_nlv;

        self.net_beta = if self.nlv.abs() > f64::EPSILON {
            exposures.iter().filter_map(|e| e.beta.map(|b| e.nlv * b)).sum::<f64>() / self.nlv
        } else {
            0.0
        };

        self.net_leverage_ratio = if self.nlv.abs() > f64::EPSILON {
            exposures.iter().map(|e| e.nlv.abs()).sum::<f64>() / self.nlv
        } else {
            0.0
        };

        self.portfolio_volatility = if self.nlv.abs() > f64::EPSILON {
            portfolio_volatility(exposures, self.nlv, &covariance)
        } else {
            0.0
        };

        if self.has(Tracer::Nlv) {
            self.nlv_history.push(self.nlv);
        }
        if self.has(Tracer::Cash) {
            self.cash_history.push(self.cash);
        }
        if self.has(Tracer::Leverage) {
            self.leverage_history.push(self.net_leverage_ratio);
        }
        if self.has(Tracer::Beta) {
            self.beta_history.push(self.net_beta);
        }
        if self.has(Tracer::Volatility) {
            self.volatility_history.push(self.portfolio_volatility);
        }
    }

    pub fn nlv(&self) -> f64 {
        self.nlv
    }

    pub fn net_leverage_ratio(&self) -> f64 {
        self.net_leverage_ratio
    }

    pub fn net_beta(&self) -> f64 {
        self.net_beta
    }

    pub fn portfolio_volatility(&self) -> f64 {
        self.portfolio_volatility
    }

    pub fn nlv_history(&self) -> &[f64] {
        &self.nlv_history
    }

    pub fn reset_history(&mut self) {
        self.nlv_history.clear();
        self.cash_history.clear();
        self.leverage_history.clear();
        self.beta_history.clear();
        self.volatility_history.clear();
        self.nlv = 0.0;
        self.cash = 0.0;
        self.net_beta = 0.0;
        self.net_leverage_ratio = 0.0;
        self.portfolio_volatility = 0.0;
    }
}

/// `sqrt(w^T * Sigma * w)` where `w[i] = exposures[i].nlv / total_nlv` and `Sigma` is supplied by
/// `covariance`.
fn portfolio_volatility(exposures: &[ExposureSample], total_nlv: f64, covariance: &impl Fn(usize, usize) -> f64) -> f64 {
    let mut variance = 0.0;
    for a in exposures {
        let wa = a.nlv / total_nlv;
        for b in exposures {
            let wb = b.nlv / total_nlv;
            let cov = if a.asset_index == b.asset_index {
                covariance(a.asset_index, a.asset_index).max(0.0)
            } else {
                covariance(a.asset_index, b.asset_index)
            };
            variance += wa * wb * cov;
        }
    }
    variance.max(0.0).sqrt()
}

/// Caps enforced on a [`Strategy`](crate::strategy::Strategy) before its orders are allowed to
/// reach the Router.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskLimits {
    pub max_leverage: Option<f64>,
    pub allow_shorting: bool,
}

impl RiskLimits {
    pub fn new(max_leverage: Option<f64>, allow_shorting: bool) -> Self {
        Self { max_leverage, allow_shorting }
    }

    /// Whether `net_leverage_ratio` breaches `max_leverage`. A strategy breaching its limit is
    /// disabled by the engine for the remainder of the run.
    pub fn breached(&self, net_leverage_ratio: f64) -> bool {
        match self.max_leverage {
            Some(max) => net_leverage_ratio.abs() > max,
            None => false,
        }
    }
}

/// Scale a proposed `new_allocation` (fraction of NLV) so that, combined with `existing_nlv_fraction`
/// already carried by a strategy, the resulting portfolio volatility targets `tau`. Caller supplies
/// the already-computed current volatility `sigma`; the scale is clamped so the resulting leverage
/// never exceeds `max_leverage` when set.
pub fn vol_target(tau: f64, sigma: f64, new_allocation: f64, existing_nlv_fraction: f64, max_leverage: Option<f64>) -> f64 {
    if sigma.abs() < f64::EPSILON {
        return new_allocation;
    }
    let scale = tau / sigma;
    let mut scaled = new_allocation * scale;
    if let Some(max) = max_leverage {
        let projected_leverage = (existing_nlv_fraction + scaled).abs();
        if projected_leverage > max {
            let headroom = (max - existing_nlv_fraction.abs()).max(0.0);
            scaled = scaled.signum() * headroom;
        }
    }
    scaled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nlv_equals_cash_plus_exposure_sum() {
        let mut tracers = RiskTracers::with_tracers(&[Tracer::Nlv]);
        let exposures = vec![
            ExposureSample { asset_index: 0, nlv: 500.0, beta: Some(1.2) },
            ExposureSample { asset_index: 1, nlv: -200.0, beta: Some(0.8) },
        ];
        tracers.evaluate(1_000.0, &exposures, |_, _| 0.0);
        assert_eq!(tracers.nlv(), 1_300.0);
        assert_eq!(tracers.nlv_history(), &[1_300.0]);
    }

    #[test]
    fn net_leverage_ratio_is_sum_of_abs_exposure_over_nlv() {
        let mut tracers = RiskTracers::with_tracers(&[Tracer::Leverage]);
        let exposures = vec![
            ExposureSample { asset_index: 0, nlv: 600.0, beta: None },
            ExposureSample { asset_index: 1, nlv: -400.0, beta: None },
        ];
        tracers.evaluate(1_000.0, &exposures, |_, _| 0.0);
        assert!((tracers.net_leverage_ratio() - (1_000.0 / 1_200.0)).abs() < 1e-9);
    }

    #[test]
    fn risk_limits_flag_breach_over_max_leverage() {
        let limits = RiskLimits::new(Some(2.0), true);
        assert!(!limits.breached(1.5));
        assert!(limits.breached(2.5));
    }

    #[test]
    fn vol_target_scales_allocation_toward_tau_over_sigma() {
        let scaled = vol_target(0.1, 0.2, 1.0, 0.0, None);
        assert!((scaled - 0.5).abs() < 1e-9);
    }

    #[test]
    fn vol_target_clamps_to_leverage_headroom() {
        let scaled = vol_target(0.3, 0.1, 1.0, 0.5, Some(1.0));
        assert!((scaled - 0.5).abs() < 1e-9);
    }
}
