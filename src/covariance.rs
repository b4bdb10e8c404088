//! Incremental (rolling-window) covariance estimator, shared by [`crate::asset::observer`] (a
//! single named observer attached to one [`Asset`](crate::asset::Asset)) and
//! [`crate::exchange_map::ExchangeMap`] (the dense lower-triangular covariance matrix across all
//! assets).

use std::collections::VecDeque;

/// Maintains `sum_a, sum_b, sum_ab, sum_aa, sum_bb` over a trailing window of `N` paired samples.
///
/// Before `N - 1` steps the covariance is defined as `0.0`. Once the window fills, each `step`
/// subtracts the leaving sample's contribution before adding the entering one, so the running
/// sums always describe exactly the last `N` pairs.
#[derive(Debug, Clone)]
pub struct IncrementalCovariance {
    window: usize,
    samples: VecDeque<(f64, f64)>,
    sum_a: f64,
    sum_b: f64,
    sum_ab: f64,
    sum_aa: f64,
    sum_bb: f64,
    steps: usize,
}

impl IncrementalCovariance {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            samples: VecDeque::with_capacity(window),
            sum_a: 0.0,
            sum_b: 0.0,
            sum_ab: 0.0,
            sum_aa: 0.0,
            sum_bb: 0.0,
            steps: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Feed the next paired sample into the rolling window.
    pub fn step(&mut self, a: f64, b: f64) {
        if self.samples.len() == self.window {
            if let Some((la, lb)) = self.samples.pop_front() {
                self.sum_a -= la;
                self.sum_b -= lb;
                self.sum_ab -= la * lb;
                self.sum_aa -= la * la;
                self.sum_bb -= lb * lb;
            }
        }
        self.samples.push_back((a, b));
        self.sum_a += a;
        self.sum_b += b;
        self.sum_ab += a * b;
        self.sum_aa += a * a;
        self.sum_bb += b * b;
        self.steps += 1;
    }

    /// Sample covariance of the trailing window, or `0.0` if fewer than `N - 1` steps have run.
    pub fn covariance(&self) -> f64 {
        if self.steps < self.window {
            return 0.0;
        }
        let n = self.window as f64;
        (self.sum_ab - self.sum_a * self.sum_b / n) / (n - 1.0)
    }

    /// Sample variance of series `a` over the trailing window.
    pub fn variance_a(&self) -> f64 {
        if self.steps < self.window {
            return 0.0;
        }
        let n = self.window as f64;
        (self.sum_aa - self.sum_a * self.sum_a / n) / (n - 1.0)
    }

    /// Sample variance of series `b` over the trailing window.
    pub fn variance_b(&self) -> f64 {
        if self.steps < self.window {
            return 0.0;
        }
        let n = self.window as f64;
        (self.sum_bb - self.sum_b * self.sum_b / n) / (n - 1.0)
    }
}
