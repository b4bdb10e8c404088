//! Named observers attached to an [`Asset`](super::Asset), notified in insertion order after
//! each cursor advance.

use serde::{Deserialize, Serialize};

/// A single named observer attached to an [`Asset`](super::Asset).
///
/// Every variant reads only the owning asset's own close series; cross-asset statistics (e.g.
/// covariance between two assets) are computed at the [`ExchangeMap`](crate::exchange_map::ExchangeMap)
/// level instead, since an `Asset` does not itself hold references to its siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssetObserver {
    Mean(MeanObserver),
}

impl AssetObserver {
    pub fn on_step(&mut self, close: f64) {
        match self {
            AssetObserver::Mean(obs) => obs.step(close),
        }
    }

    pub fn reset(&mut self) {
        match self {
            AssetObserver::Mean(obs) => obs.reset(),
        }
    }

    pub fn mean(&self) -> Option<f64> {
        match self {
            AssetObserver::Mean(obs) => Some(obs.mean()),
        }
    }
}

/// Rolling mean of the owning asset's close series over a trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanObserver {
    window: usize,
    samples: std::collections::VecDeque<f64>,
    sum: f64,
}

impl MeanObserver {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: std::collections::VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    fn step(&mut self, value: f64) {
        if self.samples.len() == self.window {
            if let Some(leaving) = self.samples.pop_front() {
                self.sum -= leaving;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.sum = 0.0;
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mean_observer_tracks_rolling_average() {
        let mut obs = MeanObserver::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            obs.step(v);
        }
        assert_relative_eq!(obs.mean(), 3.0); // (2+3+4)/3
    }

    #[test]
    fn asset_observer_mean_variant_delegates_to_mean_observer() {
        let mut obs = AssetObserver::Mean(MeanObserver::new(2));
        obs.on_step(1.0);
        obs.on_step(3.0);
        assert_relative_eq!(obs.mean().unwrap(), 2.0);
        obs.reset();
        assert_relative_eq!(obs.mean().unwrap(), 0.0);
    }
}
