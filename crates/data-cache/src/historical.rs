use std::path::PathBuf;

use chrono::NaiveDate;
use portfolio_core::{PortfolioError, PriceBar, Result, Ticker};
use serde::{Deserialize, Serialize};

/// One row of the per-ticker historical CSV file under
/// `{root}/{TICKER}.csv`, sorted by date ascending with no duplicates.
#[derive(Debug, Serialize, Deserialize)]
struct HistoricalRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    adj_close: f64,
    volume: f64,
}

impl From<&PriceBar> for HistoricalRow {
    fn from(b: &PriceBar) -> Self {
        Self {
            date: b.date,
            open: b.open,
            high: b.high,
            low: b.low,
            close: b.close,
            adj_close: b.adj_close,
            volume: b.volume,
        }
    }
}

impl From<HistoricalRow> for PriceBar {
    fn from(r: HistoricalRow) -> Self {
        PriceBar {
            date: r.date,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            adj_close: r.adj_close,
            volume: r.volume,
        }
    }
}

/// The full-history, per-ticker columnar store. CSV is used in place of
/// parquet/arrow: no dependency in this workspace's stack pulls in a
/// columnar binary format, and `csv` is already used elsewhere in the
/// surrounding codebase for tabular data.
pub struct HistoricalStore {
    root: PathBuf,
}

impl HistoricalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, ticker: &Ticker) -> PathBuf {
        self.root.join(format!("{}.csv", ticker.as_str()))
    }

    /// Returns `None` when no file exists for the ticker at all (distinct
    /// from `Some(vec![])`, which means the file exists but has no bars in
    /// the requested range).
    pub fn read_range(
        &self,
        ticker: &Ticker,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Vec<PriceBar>>> {
        let path = self.path_for(ticker);
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        let mut bars = Vec::new();
        for record in reader.deserialize::<HistoricalRow>() {
            let row = record
                .map_err(|e| PortfolioError::DataIntegrity(format!("malformed historical row: {e}")))?;
            if row.date >= start && row.date < end {
                bars.push(PriceBar::from(row));
            }
        }
        Ok(Some(bars))
    }

    /// Overwrites the ticker's historical file with `bars`, sorted by date
    /// ascending. Used by maintenance tooling to seed/refresh the store; not
    /// on the `get_prices` hot path.
    pub fn write_all(&self, ticker: &Ticker, bars: &[PriceBar]) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        let mut sorted: Vec<&PriceBar> = bars.iter().collect();
        sorted.sort_by_key(|b| b.date);
        let path = self.path_for(ticker);
        let mut writer =
            csv::Writer::from_path(&path).map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        for bar in sorted {
            writer
                .serialize(HistoricalRow::from(bar))
                .map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bar(date: NaiveDate, close: f64) -> PriceBar {
        PriceBar {
            date,
            open: close,
            high: close,
            low: close,
            close,
            adj_close: close,
            volume: 100.0,
        }
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap();
        assert!(store
            .read_range(&Ticker::new("AAPL"), start, end)
            .unwrap()
            .is_none());
    }

    #[test]
    fn roundtrip_filters_half_open_range() {
        let dir = tempdir().unwrap();
        let store = HistoricalStore::new(dir.path());
        let ticker = Ticker::new("AAPL");
        let d1 = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2020, 1, 3).unwrap();
        store
            .write_all(&ticker, &[bar(d2, 11.0), bar(d1, 10.0), bar(d3, 12.0)])
            .unwrap();

        let bars = store.read_range(&ticker, d1, d3).unwrap().unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, d1);
        assert_eq!(bars[1].date, d2);
    }
}
