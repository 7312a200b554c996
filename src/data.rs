//! Price data access and CSV loading.
//!
//! The engine reads prices only through [`PriceSource`]. Fetching and
//! caching live outside the engine; [`InMemoryPriceSource`] covers
//! preloaded series and CSV files on disk.

use crate::error::{LeverError, Result};
use crate::types::AssetSeries;
use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Price lookups consumed by the backtest driver.
pub trait PriceSource {
    /// Ordered prices for `symbol` within `[start, end]`.
    fn series(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Option<AssetSeries>;

    /// Last positive price on or before `date`.
    fn price_on_or_before(&self, symbol: &str, date: NaiveDate) -> Option<f64>;
}

/// Preloaded price series keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceSource {
    series: BTreeMap<String, AssetSeries>,
}

impl InMemoryPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the series for its symbol.
    pub fn insert(&mut self, series: AssetSeries) {
        self.series.insert(series.symbol().to_string(), series);
    }

    pub fn with_series(mut self, series: AssetSeries) -> Self {
        self.insert(series);
        self
    }

    /// Load every file in `dir` matching `pattern`, one symbol per file.
    pub fn from_dir(dir: impl AsRef<Path>, pattern: &str, config: &PriceCsvConfig) -> Result<Self> {
        Ok(Self {
            series: load_dir(dir, pattern, config)?,
        })
    }

    pub fn get(&self, symbol: &str) -> Option<&AssetSeries> {
        self.series.get(symbol)
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.series.keys().map(String::as_str).collect()
    }
}

impl PriceSource for InMemoryPriceSource {
    fn series(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Option<AssetSeries> {
        self.series.get(symbol).map(|s| s.window(start, end))
    }

    fn price_on_or_before(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.series.get(symbol)?.price_on_or_before(date)
    }
}

/// CSV parsing options.
#[derive(Debug, Clone)]
pub struct PriceCsvConfig {
    /// Explicit date format, tried before the built-in formats.
    pub date_format: Option<String>,
    pub has_headers: bool,
    pub delimiter: u8,
    /// Skip invalid rows instead of failing.
    pub skip_invalid: bool,
}

impl Default for PriceCsvConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: b',',
            skip_invalid: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(alias = "Date", alias = "DATE", alias = "timestamp", alias = "Timestamp")]
    date: String,
    #[serde(alias = "Close", alias = "price", alias = "Price", alias = "adj_close")]
    close: f64,
}

fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();
    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%b-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%SZ"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    Err(LeverError::DataError(format!("Unrecognised date: {}", s)))
}

fn read_prices<R: Read>(reader: R, symbol: &str, config: &PriceCsvConfig) -> Result<AssetSeries> {
    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(config.delimiter)
        .flexible(true)
        .from_reader(reader);

    let mut rows: Vec<(NaiveDate, f64)> = Vec::new();
    let mut skipped = 0;

    for (i, result) in reader.deserialize::<PriceRow>().enumerate() {
        let row_num = i + 1;
        let parsed = result
            .map_err(LeverError::from)
            .and_then(|row| Ok((parse_date(&row.date, config.date_format.as_deref())?, row.close)));
        match parsed {
            Ok((date, close)) if close.is_finite() && close > 0.0 => rows.push((date, close)),
            Ok(_) if config.skip_invalid => {
                debug!("Skipping row {}: non-positive price", row_num);
                skipped += 1;
            }
            Ok(_) => {
                return Err(LeverError::DataError(format!(
                    "Non-positive price at row {}",
                    row_num
                )))
            }
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num, e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows for {}", skipped, symbol);
    }

    // Stable sort keeps file order among equal dates; the last one wins.
    rows.sort_by_key(|(date, _)| *date);
    let original_len = rows.len();
    let mut deduped: Vec<(NaiveDate, f64)> = Vec::with_capacity(rows.len());
    for (date, close) in rows {
        match deduped.last_mut() {
            Some(last) if last.0 == date => last.1 = close,
            _ => deduped.push((date, close)),
        }
    }
    if deduped.len() < original_len {
        warn!(
            "Removed {} duplicate dates for {}",
            original_len - deduped.len(),
            symbol
        );
    }

    let (dates, prices) = deduped.into_iter().unzip();
    AssetSeries::new(symbol, dates, prices)
}

/// Load a `date,close` CSV file into a series for `symbol`.
pub fn load_price_csv(
    path: impl AsRef<Path>,
    symbol: &str,
    config: &PriceCsvConfig,
) -> Result<AssetSeries> {
    let path = path.as_ref();
    info!("Loading {} prices from: {}", symbol, path.display());
    let file = std::fs::File::open(path)?;
    let series = read_prices(file, symbol, config)?;
    if series.is_empty() {
        return Err(LeverError::NoData);
    }
    info!("Loaded {} prices for {}", series.len(), symbol);
    Ok(series)
}

/// Parse CSV content held in memory.
pub fn parse_price_csv(content: &str, symbol: &str, config: &PriceCsvConfig) -> Result<AssetSeries> {
    read_prices(content.as_bytes(), symbol, config)
}

/// Load all files in `dir` matching `pattern` (e.g. `"*.csv"`).
///
/// The symbol is the file stem. Files that fail to load are logged and
/// skipped; an error is returned only if nothing loads.
pub fn load_dir(
    dir: impl AsRef<Path>,
    pattern: &str,
    config: &PriceCsvConfig,
) -> Result<BTreeMap<String, AssetSeries>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(LeverError::DataError(format!(
            "Not a directory: {}",
            dir.display()
        )));
    }

    let glob_pattern = dir.join(pattern);
    let glob_pattern_str = glob_pattern.to_string_lossy();
    info!("Loading files matching: {}", glob_pattern_str);

    let paths = glob::glob(&glob_pattern_str).map_err(|e| {
        LeverError::DataError(format!("Invalid glob pattern '{}': {}", pattern, e))
    })?;

    let mut result = BTreeMap::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Unreadable path: {}", e);
                continue;
            }
        };
        let Some(symbol) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            warn!("Could not extract symbol from path: {}", path.display());
            continue;
        };
        match load_price_csv(&path, &symbol, config) {
            Ok(series) => {
                result.insert(symbol, series);
            }
            Err(e) => warn!("Failed to load {}: {}", path.display(), e),
        }
    }

    if result.is_empty() {
        return Err(LeverError::NoData);
    }
    Ok(result)
}
