//! Merged global datetime index utilities.
//!
//! Both [`Exchange`](crate::exchange::Exchange) (merging its member [`Asset`](crate::asset::Asset)
//! timelines) and [`ExchangeMap`](crate::exchange_map::ExchangeMap) (merging its member Exchange
//! timelines) need the same union-sort-dedup operation, just at a different level of the tree.

use crate::error::HydraError;

/// A strictly increasing vector of nanosecond-epoch timestamps, with helpers for the
/// union-sort-dedup merge used throughout the kernel to build a shared clock from several
/// independently timestamped series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeIndex {
    dt: Vec<i64>,
}

impl TimeIndex {
    /// Construct a [`TimeIndex`] from an already strictly-increasing vector of timestamps.
    pub fn new(dt: Vec<i64>) -> Result<Self, HydraError> {
        if dt.is_empty() {
            return Err(HydraError::InvalidArgument(
                "datetime vector must not be empty".into(),
            ));
        }
        if !dt.windows(2).all(|w| w[0] < w[1]) {
            return Err(HydraError::InvalidArgument(
                "datetime vector must be strictly increasing".into(),
            ));
        }
        Ok(Self { dt })
    }

    /// Union-sort-dedup merge of several timestamp vectors into one canonical timeline.
    pub fn merge<'a, I>(series: I) -> Result<Self, HydraError>
    where
        I: IntoIterator<Item = &'a [i64]>,
    {
        let mut merged: Vec<i64> = series.into_iter().flatten().copied().collect();
        if merged.is_empty() {
            return Err(HydraError::InvalidArgument(
                "cannot merge zero non-empty datetime vectors".into(),
            ));
        }
        merged.sort_unstable();
        merged.dedup();
        Self::new(merged)
    }

    pub fn len(&self) -> usize {
        self.dt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dt.is_empty()
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.dt
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        self.dt.get(index).copied()
    }

    /// Binary search for the position of `ts`, used to compute `exchange_offset` alignment
    /// between a member series and this merged timeline.
    pub fn position_of(&self, ts: i64) -> Option<usize> {
        self.dt.binary_search(&ts).ok()
    }
}
