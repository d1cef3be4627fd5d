//! Historical price retrieval and loading.
//!
//! [`PriceSource`] is the seam between the engine and wherever prices come
//! from. [`InMemoryPriceSource`] serves prices loaded from CSV files (or
//! inserted directly) and aligns the requested tickers on their common dates.

use crate::error::{AllocationError, Result};
use crate::types::PriceTable;
use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Dated prices of one ticker, sorted by date.
pub type DatedSeries = Vec<(NaiveDate, f64)>;

/// Source of adjusted closing prices.
pub trait PriceSource {
    /// Prices for `assets` over `[start, end]`, aligned on common dates and
    /// in the requested column order.
    ///
    /// A ticker the source does not know is [`AllocationError::Unavailable`].
    fn fetch_prices(&self, assets: &[String], start: NaiveDate, end: NaiveDate) -> Result<PriceTable>;
}

impl<S: PriceSource + ?Sized> PriceSource for &S {
    fn fetch_prices(&self, assets: &[String], start: NaiveDate, end: NaiveDate) -> Result<PriceTable> {
        (**self).fetch_prices(assets, start, end)
    }
}

/// CSV loading options.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string tried before the built-in formats.
    pub date_format: Option<String>,
    /// CSV delimiter character. If None, delimiter is auto-detected.
    pub delimiter: Option<u8>,
    /// Skip rows with unparseable dates instead of failing.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            delimiter: None,
            skip_invalid: true,
        }
    }
}

/// Detect the CSV delimiter from the first few lines of the file.
///
/// Picks the candidate that yields the same field count (at least two) on
/// every sampled line, preferring more fields.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().take(5).filter_map(|l| l.ok()).collect();

    if lines.is_empty() {
        return Ok(b',');
    }

    let delimiters = [b',', b'\t', b';', b'|'];
    let mut best_delimiter = b',';
    let mut best_score = 0;

    for &delim in &delimiters {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.as_bytes().iter().filter(|&&b| b == delim).count() + 1)
            .collect();

        let first_count = counts[0];
        if first_count >= 2 && counts.iter().all(|&c| c == first_count) && first_count > best_score {
            best_score = first_count;
            best_delimiter = delim;
        }
    }

    debug!(
        "Detected delimiter {:?} with {} fields",
        best_delimiter as char, best_score
    );
    Ok(best_delimiter)
}

/// Parse a date string with multiple format attempts.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();

    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    let date_formats = [
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%d-%b-%Y",  // 15-Jan-2024
        "%d %b %Y",  // 15 Jan 2024
        "%b %d, %Y", // Jan 15, 2024
    ];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.fZ",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    Err(AllocationError::InvalidInput(format!(
        "Could not parse date: '{}'",
        s
    )))
}

/// Sort by date and drop repeated dates (first occurrence wins).
fn sort_dedup(series: &mut DatedSeries, name: &str) {
    series.sort_by_key(|(d, _)| *d);
    let original_len = series.len();
    series.dedup_by_key(|(d, _)| *d);
    if series.len() < original_len {
        warn!(
            "Removed {} duplicate dates for {}",
            original_len - series.len(),
            name
        );
    }
}

fn is_date_header(name: &str) -> bool {
    matches!(
        name.trim().to_lowercase().as_str(),
        "date" | "datetime" | "timestamp" | "time"
    )
}

/// Load a wide price file: a date column followed by one column per ticker.
///
/// ```text
/// Date,AAPL,MSFT
/// 2024-01-02,185.6,370.9
/// ```
///
/// Empty or non-numeric cells are skipped, so tickers may cover different
/// dates. Tickers are returned in header order.
pub fn load_price_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<(String, DatedSeries)>> {
    let path = path.as_ref();
    info!("Loading prices from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let date_col = headers.iter().position(is_date_header).unwrap_or(0);
    let tickers: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != date_col && !h.is_empty())
        .map(|(i, h)| (i, h.to_uppercase()))
        .collect();

    if tickers.is_empty() {
        return Err(AllocationError::InvalidInput(format!(
            "{} has no price columns",
            path.display()
        )));
    }

    let mut series: Vec<(String, DatedSeries)> =
        tickers.iter().map(|(_, t)| (t.clone(), Vec::new())).collect();
    let mut skipped = 0;

    for (row_num, record) in reader.records().enumerate() {
        let record = record?;
        let raw_date = record.get(date_col).unwrap_or("");
        let date = match parse_date(raw_date, config.date_format.as_deref()) {
            Ok(d) => d,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        for (slot, (col, _)) in tickers.iter().enumerate() {
            let Some(cell) = record.get(*col) else { continue };
            if cell.is_empty() {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(price) if price.is_finite() && price > 0.0 => series[slot].1.push((date, price)),
                _ => debug!("Ignoring cell '{}' on {}", cell, date),
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} rows with invalid dates", skipped);
    }

    for (ticker, s) in series.iter_mut() {
        sort_dedup(s, ticker);
    }

    info!(
        "Loaded {} tickers: {}",
        series.len(),
        series
            .iter()
            .map(|(t, s)| format!("{} ({} rows)", t, s.len()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(series)
}

/// Load a single series from a `Date,Close` style file.
///
/// The price column is `Adj Close` when present, else `Close`, else the
/// first non-date column.
pub fn load_series_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<DatedSeries> {
    let path = path.as_ref();
    info!("Loading series from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let date_col = headers.iter().position(is_date_header).unwrap_or(0);
    let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let price_col = find("Adj Close")
        .or_else(|| find("Close"))
        .or_else(|| (0..headers.len()).find(|&i| i != date_col))
        .ok_or_else(|| {
            AllocationError::InvalidInput(format!("{} has no price column", path.display()))
        })?;

    let mut series = DatedSeries::new();
    for record in reader.records() {
        let record = record?;
        let date = match parse_date(record.get(date_col).unwrap_or(""), config.date_format.as_deref()) {
            Ok(d) => d,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };
        if let Some(Ok(price)) = record.get(price_col).map(str::parse::<f64>) {
            if price.is_finite() && price > 0.0 {
                series.push((date, price));
            }
        }
    }

    sort_dedup(&mut series, &path.display().to_string());
    if series.is_empty() {
        return Err(AllocationError::InvalidInput(format!(
            "{} contains no prices",
            path.display()
        )));
    }

    Ok(series)
}

/// Inner join of dated series into a [`PriceTable`].
///
/// Only dates present in every series are kept. A series with no points is
/// rejected.
pub fn align_series(series: &[(&str, &[(NaiveDate, f64)])]) -> Result<PriceTable> {
    if series.is_empty() {
        return Err(AllocationError::invalid("No series to align"));
    }

    if let Some((name, _)) = series.iter().find(|(_, s)| s.is_empty()) {
        return Err(AllocationError::InvalidInput(format!(
            "No prices for {}",
            name
        )));
    }

    let maps: Vec<HashMap<NaiveDate, f64>> = series
        .iter()
        .map(|(_, s)| s.iter().copied().collect())
        .collect();

    let mut dates: Vec<NaiveDate> = series[0]
        .1
        .iter()
        .map(|(d, _)| *d)
        .filter(|d| maps.iter().all(|m| m.contains_key(d)))
        .collect();
    dates.sort();
    dates.dedup();

    let rows = dates
        .iter()
        .map(|d| maps.iter().map(|m| m[d]).collect())
        .collect();

    let assets = series.iter().map(|(name, _)| name.to_string()).collect();
    PriceTable::new(assets, dates, rows)
}

/// Price source backed by series held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceSource {
    series: HashMap<String, DatedSeries>,
}

impl InMemoryPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a ticker's prices.
    pub fn insert(&mut self, ticker: impl Into<String>, mut prices: DatedSeries) {
        let ticker = ticker.into();
        sort_dedup(&mut prices, &ticker);
        self.series.insert(ticker, prices);
    }

    /// Add every column of a price table.
    pub fn insert_table(&mut self, table: &PriceTable) {
        for (i, asset) in table.assets().iter().enumerate() {
            let prices = table.dates().iter().copied().zip(table.column(i)).collect();
            self.insert(asset.clone(), prices);
        }
    }

    /// Load every ticker of a wide price file.
    pub fn from_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Self> {
        let mut source = Self::new();
        for (ticker, prices) in load_price_csv(path, config)? {
            source.insert(ticker, prices);
        }
        Ok(source)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.series.contains_key(ticker)
    }

    pub fn tickers(&self) -> Vec<&String> {
        let mut tickers: Vec<&String> = self.series.keys().collect();
        tickers.sort();
        tickers
    }

    /// Latest date covered by any ticker.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.series
            .values()
            .filter_map(|s| s.last().map(|(d, _)| *d))
            .max()
    }
}

impl PriceSource for InMemoryPriceSource {
    fn fetch_prices(&self, assets: &[String], start: NaiveDate, end: NaiveDate) -> Result<PriceTable> {
        let windows: Vec<(&str, DatedSeries)> = assets
            .iter()
            .map(|asset| {
                let series = self
                    .series
                    .get(asset)
                    .ok_or_else(|| AllocationError::Unavailable(format!("No prices for {}", asset)))?;
                let window = series
                    .iter()
                    .copied()
                    .filter(|(d, _)| *d >= start && *d <= end)
                    .collect();
                Ok((asset.as_str(), window))
            })
            .collect::<Result<_>>()?;

        let refs: Vec<(&str, &[(NaiveDate, f64)])> = windows
            .iter()
            .map(|(name, s)| (*name, s.as_slice()))
            .collect();

        let table = align_series(&refs)?;
        debug!(
            "Fetched {} aligned rows for {} tickers between {} and {}",
            table.len(),
            assets.len(),
            start,
            end
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = date(2024, 1, 15);
        assert_eq!(parse_date("2024-01-15", None).unwrap(), expected);
        assert_eq!(parse_date("2024/01/15", None).unwrap(), expected);
        assert_eq!(parse_date("15-Jan-2024", None).unwrap(), expected);
        assert_eq!(parse_date("2024-01-15 16:00:00", None).unwrap(), expected);
        assert_eq!(parse_date("01/15/2024", Some("%m/%d/%Y")).unwrap(), expected);
        assert!(parse_date("yesterday", None).is_err());
    }

    #[test]
    fn test_load_wide_csv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Date,aapl,MSFT").unwrap();
        writeln!(file, "2024-01-03,101.0,201.0").unwrap();
        writeln!(file, "2024-01-02,100.0,200.0").unwrap();
        writeln!(file, "2024-01-04,,202.0").unwrap();
        writeln!(file, "not-a-date,1.0,1.0").unwrap();
        file.flush().unwrap();

        let series = load_price_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].0, "AAPL");
        assert_eq!(series[0].1, vec![(date(2024, 1, 2), 100.0), (date(2024, 1, 3), 101.0)]);
        assert_eq!(series[1].1.len(), 3);
    }

    #[test]
    fn test_load_semicolon_csv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Date;A;B").unwrap();
        writeln!(file, "2024-01-02;1.5;2.5").unwrap();
        writeln!(file, "2024-01-03;1.6;2.6").unwrap();
        file.flush().unwrap();

        let series = load_price_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(series[1].1[1], (date(2024, 1, 3), 2.6));
    }

    #[test]
    fn test_load_series_prefers_adj_close() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Date,Open,Close,Adj Close").unwrap();
        writeln!(file, "2024-01-02,1,10,9.5").unwrap();
        writeln!(file, "2024-01-03,1,11,10.5").unwrap();
        file.flush().unwrap();

        let series = load_series_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(series, vec![(date(2024, 1, 2), 9.5), (date(2024, 1, 3), 10.5)]);
    }

    #[test]
    fn test_align_inner_join() {
        let a = vec![(date(2024, 1, 1), 1.0), (date(2024, 1, 2), 2.0), (date(2024, 1, 3), 3.0)];
        let b = vec![(date(2024, 1, 2), 20.0), (date(2024, 1, 3), 30.0), (date(2024, 1, 4), 40.0)];
        let table = align_series(&[("A", &a), ("B", &b)]).unwrap();

        assert_eq!(table.dates(), &[date(2024, 1, 2), date(2024, 1, 3)]);
        assert_eq!(table.rows()[0], vec![2.0, 20.0]);

        let empty: Vec<(NaiveDate, f64)> = Vec::new();
        assert!(matches!(
            align_series(&[("A", &a), ("C", &empty)]),
            Err(AllocationError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_in_memory_source() {
        let mut source = InMemoryPriceSource::new();
        source.insert("A", vec![(date(2024, 1, 3), 3.0), (date(2024, 1, 1), 1.0), (date(2024, 1, 2), 2.0)]);
        source.insert("B", vec![(date(2024, 1, 1), 10.0), (date(2024, 1, 2), 20.0), (date(2024, 1, 3), 30.0)]);

        let table = source
            .fetch_prices(&["B".to_string(), "A".to_string()], date(2024, 1, 2), date(2024, 1, 31))
            .unwrap();
        assert_eq!(table.assets(), &["B".to_string(), "A".to_string()]);
        assert_eq!(table.rows(), &[vec![20.0, 2.0], vec![30.0, 3.0]]);
        assert_eq!(source.last_date(), Some(date(2024, 1, 3)));

        let missing = source.fetch_prices(&["Z".to_string()], date(2024, 1, 1), date(2024, 1, 3));
        assert!(matches!(missing, Err(AllocationError::Unavailable(_))));

        let outside = source.fetch_prices(&["A".to_string()], date(2023, 1, 1), date(2023, 2, 1));
        assert!(matches!(outside, Err(AllocationError::InvalidInput(_))));
    }
}
