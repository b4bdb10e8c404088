//! Column-typed OHLC-like asset series with cursor, observers, and warmup policy.

pub mod observer;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{HydraError, HydraResult};
pub use observer::AssetObserver;

/// Bar frequency an [`Asset`]'s rows are sampled at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Frequency {
    Tick,
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour4,
    Day1,
}

impl Frequency {
    /// Bars-per-year scalar used to annualize a rolling volatility estimate.
    pub fn bars_per_year(&self) -> f64 {
        match self {
            Frequency::Tick => 1.0,
            Frequency::Minute1 => 252.0 * 390.0,
            Frequency::Minute5 => 252.0 * 78.0,
            Frequency::Minute15 => 252.0 * 26.0,
            Frequency::Minute30 => 252.0 * 13.0,
            Frequency::Hour1 => 252.0 * 7.0,
            Frequency::Hour4 => 252.0 * 2.0,
            Frequency::Day1 => 252.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AssetType {
    Equity,
    Future,
}

/// A column-typed, time-aligned price series with a cursor, an observer registry, and a
/// warmup window below which feature lookups are rejected.
///
/// Data is stored as a dense row-major matrix of `rows x columns` doubles, paired with a
/// strictly increasing vector of nanosecond-epoch timestamps and a column-name index that
/// must contain at least `"open"` and `"close"`.
#[derive(Debug, Clone)]
pub struct Asset {
    id: SmolStr,
    index: usize,
    exchange_id: SmolStr,
    asset_type: AssetType,
    frequency: Frequency,
    tz: SmolStr,
    unit_multiplier: f64,
    warmup: usize,

    rows: usize,
    columns: usize,
    data: Vec<f64>,
    dt: Vec<i64>,
    headers: IndexMap<SmolStr, usize>,
    open_col: usize,
    close_col: usize,

    current_index: usize,
    exchange_offset: usize,
    is_aligned: bool,
    is_streaming: bool,
    is_expired: bool,
    is_in_exchange_view: bool,
    is_market_asset: bool,

    beta: Option<Vec<f64>>,
    volatility: Option<Vec<f64>>,

    last_trade_date: Option<i64>,

    observers: IndexMap<SmolStr, AssetObserver>,
}

impl Asset {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<SmolStr>,
        exchange_id: impl Into<SmolStr>,
        asset_type: AssetType,
        frequency: Frequency,
        tz: impl Into<SmolStr>,
        unit_multiplier: f64,
        warmup: usize,
        columns: Vec<(SmolStr, usize)>,
        data: Vec<f64>,
        dt: Vec<i64>,
    ) -> HydraResult<Self> {
        if dt.is_empty() {
            return Err(HydraError::InvalidArgument(
                "asset datetime index must not be empty".into(),
            ));
        }
        if !dt.windows(2).all(|w| w[0] < w[1]) {
            return Err(HydraError::InvalidArgument(
                "asset datetime index must be strictly increasing".into(),
            ));
        }
        let headers: IndexMap<SmolStr, usize> = columns.into_iter().collect();
        let open_col = *headers
            .get("open")
            .ok_or_else(|| HydraError::InvalidColumns("missing required column: open".into()))?;
        let close_col = *headers
            .get("close")
            .ok_or_else(|| HydraError::InvalidColumns("missing required column: close".into()))?;

        let rows = dt.len();
        let columns = headers.len();
        if data.len() != rows * columns {
            return Err(HydraError::InvalidArgument(format!(
                "data matrix length {} does not match rows*columns {}*{}",
                data.len(),
                rows,
                columns
            )));
        }

        Ok(Self {
            id: id.into(),
            index: 0,
            exchange_id: exchange_id.into(),
            asset_type,
            frequency,
            tz: tz.into(),
            unit_multiplier,
            warmup,
            rows,
            columns,
            data,
            dt,
            headers,
            open_col,
            close_col,
            current_index: 0,
            exchange_offset: 0,
            is_aligned: false,
            is_streaming: false,
            is_expired: false,
            is_in_exchange_view: true,
            is_market_asset: false,
            beta: None,
            volatility: None,
            last_trade_date: None,
            observers: IndexMap::new(),
        })
    }

    pub fn id(&self) -> &SmolStr {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn exchange_id(&self) -> &SmolStr {
        &self.exchange_id
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn unit_multiplier(&self) -> f64 {
        self.unit_multiplier
    }

    pub fn warmup(&self) -> usize {
        self.warmup
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired
    }

    pub fn is_in_exchange_view(&self) -> bool {
        self.is_in_exchange_view
    }

    pub fn is_market_asset(&self) -> bool {
        self.is_market_asset
    }

    pub fn set_in_exchange_view(&mut self, visible: bool) {
        self.is_in_exchange_view = visible;
    }

    pub fn dt_index(&self) -> &[i64] {
        &self.dt
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub(crate) fn set_exchange_offset(&mut self, offset: usize) {
        self.exchange_offset = offset;
    }

    pub(crate) fn set_alignment(&mut self, aligned: bool) {
        self.is_aligned = aligned;
    }

    pub fn is_aligned(&self) -> bool {
        self.is_aligned
    }

    pub(crate) fn set_market_asset(&mut self, is_market: bool) {
        self.is_market_asset = is_market;
    }

    /// Assign a contract expiry, resolved by the caller against a trading calendar keyed by
    /// instrument family and contract code. A [`Future`](AssetType::Future) asset with a
    /// `last_trade_date` expires as soon as its current row's timestamp reaches it, regardless
    /// of how many rows remain in its underlying data.
    pub fn set_last_trade_date(&mut self, last_trade_date: i64) {
        self.last_trade_date = Some(last_trade_date);
    }

    pub fn last_trade_date(&self) -> Option<i64> {
        self.last_trade_date
    }

    /// Whether this asset carries a contract expiry distinct from simply running out of rows.
    pub fn expirable(&self) -> bool {
        self.last_trade_date.is_some()
    }

    pub fn get_column_index(&self, name: &str) -> HydraResult<usize> {
        self.headers
            .get(name)
            .copied()
            .ok_or_else(|| HydraError::InvalidColumns(format!("unknown column: {name}")))
    }

    /// Whether the cursor is still inside the asset's warmup window.
    fn in_warmup(&self) -> bool {
        if self.current_index == 0 {
            return true;
        }
        (self.current_index - 1) < self.warmup
    }

    fn valid_row(&self, offset: i64) -> bool {
        self.current_index > 0 && offset.unsigned_abs() as usize <= self.current_index - 1
    }

    /// Row lookup by `(column, offset)`, `offset <= 0` referring to the current or prior rows.
    ///
    /// Fails with [`HydraError::OutOfRange`] when `current_index - 1 < |offset|` or the asset is
    /// still in warmup.
    pub fn get_asset_feature(&self, col: usize, offset: i64) -> HydraResult<f64> {
        if self.in_warmup() {
            return Err(HydraError::OutOfRange(format!(
                "asset {} still in warmup at index {}",
                self.id, self.current_index
            )));
        }
        if !self.valid_row(offset) {
            return Err(HydraError::OutOfRange(format!(
                "offset {} invalid at current_index {}",
                offset, self.current_index
            )));
        }
        let row = (self.current_index as i64 - 1 + offset) as usize;
        Ok(self.data[row * self.columns + col])
    }

    pub fn get_asset_feature_named(&self, col: &str, offset: i64) -> HydraResult<f64> {
        let idx = self.get_column_index(col)?;
        self.get_asset_feature(idx, offset)
    }

    /// Current published price: `open` when `on_close == false`, `close` otherwise.
    pub fn current_price(&self, on_close: bool) -> HydraResult<f64> {
        let col = if on_close { self.close_col } else { self.open_col };
        self.get_asset_feature(col, 0)
    }

    pub fn current_time(&self) -> Option<i64> {
        if self.current_index == 0 {
            None
        } else {
            self.dt.get(self.current_index - 1).copied()
        }
    }

    /// Does this asset's datetime range enclose `other`'s, making it eligible as a market
    /// asset for beta construction against `other`.
    pub fn encloses(&self, other: &Asset) -> bool {
        match (other.dt.first(), other.dt.last(), self.dt.first(), self.dt.last()) {
            (Some(ob_t0), Some(ob_t1), Some(t0), Some(t1)) => t0 <= ob_t0 && t1 >= ob_t1,
            _ => false,
        }
    }

    /// Advance the cursor by one row. Returns `true` if this tick reached the last row
    /// (the asset has expired).
    pub fn step(&mut self) -> bool {
        if self.current_index >= self.rows {
            self.is_streaming = false;
            self.is_expired = true;
            return true;
        }
        self.current_index += 1;
        self.is_streaming = true;
        let reached_last_row = self.current_index == self.rows;
        let reached_last_trade_date = self
            .last_trade_date
            .is_some_and(|ltd| self.current_time().is_some_and(|t| t >= ltd));
        let expired = reached_last_row || reached_last_trade_date;
        if expired {
            self.is_expired = true;
            self.is_streaming = false;
        }
        self.notify_observers();
        expired
    }

    /// Reset the cursor to row 0 (or to the row aligned with `t0` when supplied) and clear
    /// expiry/streaming flags. Observers are reset along with the cursor.
    pub fn reset(&mut self, t0: Option<i64>) {
        self.current_index = match t0 {
            Some(ts) => self.dt.iter().position(|&d| d >= ts).unwrap_or(0),
            None => 0,
        };
        self.is_streaming = false;
        self.is_expired = false;
        for observer in self.observers.values_mut() {
            observer.reset();
        }
    }

    pub fn add_observer(&mut self, name: impl Into<SmolStr>, observer: AssetObserver) {
        self.observers.entry(name.into()).or_insert(observer);
    }

    pub fn remove_observer(&mut self, name: &str) {
        self.observers.shift_remove(name);
    }

    pub fn clear_observers(&mut self) {
        self.observers.clear();
    }

    pub fn observer(&self, name: &str) -> Option<&AssetObserver> {
        self.observers.get(name)
    }

    /// Notify observers in insertion order after the cursor has advanced, feeding each the
    /// asset's own current close.
    fn notify_observers(&mut self) {
        if self.observers.is_empty() {
            return;
        }
        let Ok(close) = self.current_price(true) else { return };
        for observer in self.observers.values_mut() {
            observer.on_step(close);
        }
    }

    pub fn beta_column(&self) -> Option<&[f64]> {
        self.beta.as_deref()
    }

    pub fn volatility_column(&self) -> Option<&[f64]> {
        self.volatility.as_deref()
    }

    pub fn beta(&self) -> Option<f64> {
        self.beta
            .as_ref()
            .and_then(|v| v.get(self.current_index.saturating_sub(1)))
            .copied()
            .filter(|b| !b.is_nan())
    }

    /// Build the rolling-beta column against `market`, from simple returns of `close` over a
    /// window of `lookback` bars. Bars before `lookback` samples are `NaN`.
    pub fn build_beta_column(&mut self, market: &[f64], lookback: usize) -> HydraResult<()> {
        let close = self.close_column();
        if market.len() != close.len() {
            return Err(HydraError::InvalidArgument(
                "market asset does not enclose this asset's timeline".into(),
            ));
        }
        let returns_a = simple_returns(&close);
        let returns_b = simple_returns(market);
        let mut beta = vec![f64::NAN; close.len()];

        let mut est = crate::covariance::IncrementalCovariance::new(lookback);
        for i in 0..returns_a.len() {
            est.step(returns_a[i], returns_b[i]);
            let var_b = est.variance_b();
            beta[i + 1] = if var_b.abs() < f64::EPSILON {
                f64::NAN
            } else {
                est.covariance() / var_b
            };
        }
        self.beta = Some(beta);
        Ok(())
    }

    /// Build the rolling annualized volatility column from simple returns of `close` over a
    /// window of `lookback` bars, scaled by `sqrt(bars_per_year)`.
    pub fn build_volatility_column(&mut self, lookback: usize) {
        let close = self.close_column();
        let returns = simple_returns(&close);
        let scale = self.frequency.bars_per_year().sqrt();
        let mut vol = vec![f64::NAN; close.len()];

        for i in lookback..=returns.len() {
            let window = &returns[i - lookback..i];
            let mean = window.iter().sum::<f64>() / lookback as f64;
            let var = window.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (lookback as f64 - 1.0);
            vol[i] = var.sqrt() * scale;
        }
        self.volatility = Some(vol);
    }

    /// The full `close` column, independent of the cursor. Used by the owning
    /// [`Exchange`](crate::exchange::Exchange) to build beta/volatility columns against a
    /// designated market asset.
    pub fn close_series(&self) -> Vec<f64> {
        self.close_column()
    }

    fn close_column(&self) -> Vec<f64> {
        (0..self.rows).map(|r| self.data[r * self.columns + self.close_col]).collect()
    }
}

fn simple_returns(series: &[f64]) -> Vec<f64> {
    series.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_asset(closes: &[f64]) -> Asset {
        let dt: Vec<i64> = (0..closes.len() as i64).map(|i| i * 86_400_000_000_000).collect();
        let mut data = Vec::with_capacity(closes.len() * 2);
        for &c in closes {
            data.push(c); // open
            data.push(c); // close
        }
        Asset::new(
            "TEST",
            "EXCH",
            AssetType::Equity,
            Frequency::Day1,
            "America/New_York",
            1.0,
            1,
            vec![("open".into(), 0), ("close".into(), 1)],
            data,
            dt,
        )
        .unwrap()
    }

    #[test]
    fn feature_lookup_fails_during_warmup_and_on_bad_offset() {
        let mut asset = make_asset(&[10.0, 11.0, 12.0, 13.0]);
        assert!(asset.get_asset_feature(1, 0).is_err());

        asset.step();
        assert!(asset.get_asset_feature(1, 0).is_err(), "warmup=1 still blocks row 0");

        asset.step();
        assert_eq!(asset.get_asset_feature(1, 0).unwrap(), 11.0);
        assert!(asset.get_asset_feature(1, -5).is_err());
    }

    #[test]
    fn step_reports_expiry_on_last_row() {
        let mut asset = make_asset(&[1.0, 2.0, 3.0]);
        assert!(!asset.step());
        assert!(!asset.step());
        assert!(asset.step());
        assert!(asset.is_expired());
    }

    #[test]
    fn last_trade_date_expires_contract_before_final_row() {
        let mut asset = make_asset(&[1.0, 2.0, 3.0, 4.0]);
        asset.set_last_trade_date(86_400_000_000_000); // row index 1's timestamp
        assert!(asset.expirable());
        asset.step();
        assert!(!asset.is_expired(), "row 0 precedes the last trade date");
        assert!(asset.step(), "row 1 reaches the last trade date and expires early");
        assert!(asset.is_expired());
        assert_eq!(asset.current_index(), 2, "two rows of the four-row series were consumed");
    }

    #[test]
    fn reset_clears_cursor_and_flags() {
        let mut asset = make_asset(&[1.0, 2.0, 3.0]);
        asset.step();
        asset.step();
        asset.reset(None);
        assert_eq!(asset.current_index(), 0);
        assert!(!asset.is_expired());
        assert!(!asset.is_streaming());
    }

    #[test]
    fn current_price_selects_open_or_close() {
        let mut asset = make_asset(&[10.0, 20.0]);
        asset.step();
        assert_eq!(asset.current_price(false).unwrap(), 10.0);
        assert_eq!(asset.current_price(true).unwrap(), 10.0);
    }
}
