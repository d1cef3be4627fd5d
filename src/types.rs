//! Core data types for the allocation engine.

use crate::error::{AllocationError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Tolerance used when checking that a weight vector sums to one.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Adjusted closing prices indexed by date, one column per asset.
///
/// Dates are strictly increasing and every row carries one finite, strictly
/// positive price per asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    assets: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

impl PriceTable {
    /// Create a price table from row-major data.
    pub fn new(assets: Vec<String>, dates: Vec<NaiveDate>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if assets.is_empty() {
            return Err(AllocationError::invalid("Price table needs at least one asset"));
        }

        let mut seen = HashSet::new();
        for asset in &assets {
            if !seen.insert(asset.as_str()) {
                return Err(AllocationError::InvalidInput(format!(
                    "Duplicate asset in price table: {}",
                    asset
                )));
            }
        }

        if dates.len() != rows.len() {
            return Err(AllocationError::InvalidInput(format!(
                "Date index has {} entries but there are {} price rows",
                dates.len(),
                rows.len()
            )));
        }

        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AllocationError::invalid(
                "Price table dates must be strictly increasing",
            ));
        }

        for (date, row) in dates.iter().zip(rows.iter()) {
            if row.len() != assets.len() {
                return Err(AllocationError::InvalidInput(format!(
                    "Row {} has {} prices, expected {}",
                    date,
                    row.len(),
                    assets.len()
                )));
            }
            if let Some(pos) = row.iter().position(|p| !p.is_finite() || *p <= 0.0) {
                return Err(AllocationError::InvalidInput(format!(
                    "Invalid price {} for {} on {}",
                    row[pos], assets[pos], date
                )));
            }
        }

        Ok(Self {
            assets,
            dates,
            rows,
        })
    }

    /// Create a price table from one price column per asset.
    pub fn from_columns(dates: Vec<NaiveDate>, columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        for (asset, column) in &columns {
            if column.len() != dates.len() {
                return Err(AllocationError::InvalidInput(format!(
                    "Column {} has {} prices, expected {}",
                    asset,
                    column.len(),
                    dates.len()
                )));
            }
        }

        let rows = (0..dates.len())
            .map(|t| columns.iter().map(|(_, c)| c[t]).collect())
            .collect();
        let assets = columns.into_iter().map(|(a, _)| a).collect();

        Self::new(assets, dates, rows)
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Number of dates.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_assets(&self) -> usize {
        self.assets.len()
    }

    /// Position of an asset in the column ordering.
    pub fn asset_index(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    /// Price series of one asset.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[index]).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Rows whose date falls within `[start, end]`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Self {
        let (dates, rows): (Vec<_>, Vec<_>) = self
            .dates
            .iter()
            .zip(self.rows.iter())
            .filter(|(d, _)| **d >= start && **d <= end)
            .map(|(d, r)| (*d, r.clone()))
            .unzip();

        Self {
            assets: self.assets.clone(),
            dates,
            rows,
        }
    }

    /// Subset of columns in the requested order.
    pub fn select(&self, assets: &[String]) -> Result<Self> {
        let indices = assets
            .iter()
            .map(|a| {
                self.asset_index(a)
                    .ok_or_else(|| AllocationError::Unavailable(format!("No prices for {}", a)))
            })
            .collect::<Result<Vec<_>>>()?;

        let rows = self
            .rows
            .iter()
            .map(|r| indices.iter().map(|&i| r[i]).collect())
            .collect();

        Self::new(assets.to_vec(), self.dates.clone(), rows)
    }
}

/// Period-over-period returns derived from a [`PriceTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    assets: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

impl ReturnSeries {
    pub fn from_parts(assets: Vec<String>, dates: Vec<NaiveDate>, rows: Vec<Vec<f64>>) -> Self {
        Self {
            assets,
            dates,
            rows,
        }
    }

    /// Build a single-column series, e.g. a benchmark.
    pub fn single(asset: impl Into<String>, points: Vec<(NaiveDate, f64)>) -> Self {
        let (dates, values): (Vec<_>, Vec<_>) = points.into_iter().unzip();
        Self {
            assets: vec![asset.into()],
            dates,
            rows: values.into_iter().map(|v| vec![v]).collect(),
        }
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[index]).collect()
    }

    /// All columns, asset-major.
    pub fn columns(&self) -> Vec<Vec<f64>> {
        (0..self.assets.len()).map(|i| self.column(i)).collect()
    }

    /// (date, value) pairs of one column.
    pub fn dated_column(&self, index: usize) -> Vec<(NaiveDate, f64)> {
        self.dates
            .iter()
            .zip(self.rows.iter())
            .map(|(d, r)| (*d, r[index]))
            .collect()
    }
}

/// Portfolio weights aligned 1:1 with a price table's asset ordering.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weights(Vec<f64>);

impl Weights {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Equal weight across `n` assets.
    pub fn uniform(n: usize) -> Self {
        if n == 0 {
            return Self(Vec::new());
        }
        Self(vec![1.0 / n as f64; n])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.0.iter()
    }

    /// Whether the weights sum to one within `tolerance`.
    pub fn is_normalized(&self, tolerance: f64) -> bool {
        let sum = self.sum();
        sum.is_finite() && (sum - 1.0).abs() <= tolerance
    }

    /// Whether every weight lies in `[0, 1]` (within `tolerance`).
    pub fn is_long_only(&self, tolerance: f64) -> bool {
        self.0
            .iter()
            .all(|&w| w >= -tolerance && w <= 1.0 + tolerance)
    }

    /// Rescale so the weights sum to one.
    pub fn normalized(&self) -> Result<Self> {
        let sum = self.sum();
        if !sum.is_finite() || sum.abs() < f64::EPSILON {
            return Err(AllocationError::InvalidWeights { sum });
        }
        Ok(Self(self.0.iter().map(|w| w / sum).collect()))
    }

    /// Dot product with a vector of the same length.
    pub fn dot(&self, other: &[f64]) -> f64 {
        self.0.iter().zip(other.iter()).map(|(w, x)| w * x).sum()
    }
}

impl From<Vec<f64>> for Weights {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

impl std::ops::Index<usize> for Weights {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

/// One point of a portfolio value series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// A user-entered position: ticker and target weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub weight: f64,
}

impl Holding {
    pub fn new(ticker: impl Into<String>, weight: f64) -> Self {
        Self {
            ticker: ticker.into(),
            weight,
        }
    }
}

impl fmt::Display for Holding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.ticker, self.weight)
    }
}

impl FromStr for Holding {
    type Err = AllocationError;

    /// Parse `TICKER=WEIGHT`; a trailing `%` divides the weight by 100.
    fn from_str(s: &str) -> Result<Self> {
        let (ticker, weight) = s
            .split_once('=')
            .ok_or_else(|| AllocationError::InvalidInput(format!("Expected TICKER=WEIGHT, got '{}'", s)))?;

        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(AllocationError::InvalidInput(format!("Missing ticker in '{}'", s)));
        }

        let weight = weight.trim();
        let (number, scale) = match weight.strip_suffix('%') {
            Some(pct) => (pct.trim(), 100.0),
            None => (weight, 1.0),
        };
        let weight: f64 = number
            .parse()
            .map_err(|_| AllocationError::InvalidInput(format!("Invalid weight in '{}'", s)))?;

        Ok(Self::new(ticker, weight / scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_price_table_validation() {
        let table = PriceTable::new(
            vec!["A".into(), "B".into()],
            vec![date(1), date(2)],
            vec![vec![10.0, 20.0], vec![11.0, 21.0]],
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column(1), vec![20.0, 21.0]);

        let unsorted = PriceTable::new(
            vec!["A".into()],
            vec![date(2), date(1)],
            vec![vec![10.0], vec![11.0]],
        );
        assert!(unsorted.is_err());

        let ragged = PriceTable::new(
            vec!["A".into(), "B".into()],
            vec![date(1)],
            vec![vec![10.0]],
        );
        assert!(ragged.is_err());

        let negative = PriceTable::new(vec!["A".into()], vec![date(1)], vec![vec![-1.0]]);
        assert!(negative.is_err());

        let duplicate = PriceTable::new(
            vec!["A".into(), "A".into()],
            vec![date(1)],
            vec![vec![1.0, 2.0]],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_select_and_between() {
        let table = PriceTable::from_columns(
            vec![date(1), date(2), date(3)],
            vec![
                ("A".into(), vec![1.0, 2.0, 3.0]),
                ("B".into(), vec![4.0, 5.0, 6.0]),
            ],
        )
        .unwrap();

        let swapped = table.select(&["B".to_string(), "A".to_string()]).unwrap();
        assert_eq!(swapped.rows()[0], vec![4.0, 1.0]);

        let missing = table.select(&["C".to_string()]);
        assert!(matches!(missing, Err(AllocationError::Unavailable(_))));

        let window = table.between(date(2), date(3));
        assert_eq!(window.len(), 2);
        assert_eq!(window.first_date(), Some(date(2)));
    }

    #[test]
    fn test_weights() {
        let w = Weights::new(vec![0.2, 0.3, 0.5]);
        assert!(w.is_normalized(WEIGHT_TOLERANCE));
        assert!(w.is_long_only(0.0));

        let off = Weights::new(vec![0.5, 0.48]);
        assert!(!off.is_normalized(WEIGHT_TOLERANCE));

        let scaled = Weights::new(vec![2.0, 2.0]).normalized().unwrap();
        assert_eq!(scaled.as_slice(), &[0.5, 0.5]);

        assert!(Weights::new(vec![1.0, -1.0]).normalized().is_err());
        assert_eq!(Weights::uniform(4).as_slice(), &[0.25; 4]);
    }

    #[test]
    fn test_holding_parse() {
        let h: Holding = "aapl=0.4".parse().unwrap();
        assert_eq!(h, Holding::new("AAPL", 0.4));

        let pct: Holding = "MSFT = 60%".parse().unwrap();
        assert!((pct.weight - 0.6).abs() < 1e-12);

        assert!("AAPL".parse::<Holding>().is_err());
        assert!("=0.5".parse::<Holding>().is_err());
        assert!("AAPL=abc".parse::<Holding>().is_err());
    }
}
