//! Snapshot query over an [`Exchange`](super::Exchange)'s currently visible assets.

use serde::{Deserialize, Serialize};

/// How to down-select an [`ExchangeView`] after it is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Ranking {
    /// Keep every asset queried.
    Default,
    /// Keep the `k` largest values.
    NLargest(usize),
    /// Keep the `k` smallest values.
    NSmallest(usize),
    /// Keep the `k/2` largest and `k/2` smallest values.
    NExtreme(usize),
}

/// A `(asset_index, value)` snapshot of every asset visible on an exchange, optionally
/// down-selected by a [`Ranking`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeView {
    entries: Vec<(usize, f64)>,
}

impl ExchangeView {
    pub fn new(mut entries: Vec<(usize, f64)>, ranking: Ranking) -> Self {
        match ranking {
            Ranking::Default => {}
            Ranking::NLargest(k) => {
                entries.sort_by(|a, b| b.1.total_cmp(&a.1));
                entries.truncate(k);
            }
            Ranking::NSmallest(k) => {
                entries.sort_by(|a, b| a.1.total_cmp(&b.1));
                entries.truncate(k);
            }
            Ranking::NExtreme(k) => {
                entries.sort_by(|a, b| a.1.total_cmp(&b.1));
                let half = k / 2;
                let n = entries.len();
                if n > k {
                    let mut extreme = entries[..half.min(n)].to_vec();
                    extreme.extend_from_slice(&entries[n.saturating_sub(half)..]);
                    entries = extreme;
                }
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    pub fn value(&self, asset_index: usize) -> Option<f64> {
        self.entries.iter().find(|(idx, _)| *idx == asset_index).map(|(_, v)| *v)
    }
}
