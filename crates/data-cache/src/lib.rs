//! Tiered, point-in-time price and fundamentals retrieval.
//!
//! Resolution order per [`DataCache::get_prices`] / [`DataCache::get_fundamentals`]:
//! historical on-disk store -> consolidated per-ticker cache -> live source,
//! with the live result written back to the consolidated cache.

mod historical;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use portfolio_core::{
    FundamentalsSource, PortfolioError, PriceBar, PriceSource, RateLimiter, Result, RetryPolicy,
    Ticker,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

pub use historical::HistoricalStore;

/// The consolidated per-ticker cache blob, `data/cache/ticker_{TICKER}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTickerBlob {
    pub write_time: DateTime<Utc>,
    pub prices: Vec<PriceBar>,
    pub fundamentals: Option<portfolio_core::FundamentalsSnapshot>,
}

/// Cache maintenance metadata, `data/cache/meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub version: u32,
    pub last_maintenance: Option<DateTime<Utc>>,
}

impl Default for CacheMeta {
    fn default() -> Self {
        Self {
            version: 1,
            last_maintenance: None,
        }
    }
}

pub struct DataCache {
    cache_dir: PathBuf,
    historical: HistoricalStore,
    live_prices: Option<Arc<dyn PriceSource>>,
    live_fundamentals: Option<Arc<dyn FundamentalsSource>>,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    consolidated_ttl: chrono::Duration,
    #[allow(dead_code)]
    fundamentals_ttl: chrono::Duration,
    locks: DashMap<Ticker, Arc<AsyncMutex<()>>>,
}

pub struct DataCacheBuilder {
    cache_dir: PathBuf,
    historical_dir: PathBuf,
    live_prices: Option<Arc<dyn PriceSource>>,
    live_fundamentals: Option<Arc<dyn FundamentalsSource>>,
    rate_limit_per_min: u32,
    max_retries: u32,
    cache_ttl_hours: i64,
    fundamentals_ttl_days: i64,
}

impl DataCacheBuilder {
    pub fn new(cache_dir: impl Into<PathBuf>, historical_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            historical_dir: historical_dir.into(),
            live_prices: None,
            live_fundamentals: None,
            rate_limit_per_min: 60,
            max_retries: 5,
            cache_ttl_hours: 24,
            fundamentals_ttl_days: 90,
        }
    }

    pub fn with_price_source(mut self, source: Arc<dyn PriceSource>) -> Self {
        self.live_prices = Some(source);
        self
    }

    pub fn with_fundamentals_source(mut self, source: Arc<dyn FundamentalsSource>) -> Self {
        self.live_fundamentals = Some(source);
        self
    }

    pub fn with_rate_limit_per_min(mut self, n: u32) -> Self {
        self.rate_limit_per_min = n;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_cache_ttl_hours(mut self, hours: i64) -> Self {
        self.cache_ttl_hours = hours;
        self
    }

    pub fn with_fundamentals_ttl_days(mut self, days: i64) -> Self {
        self.fundamentals_ttl_days = days;
        self
    }

    pub fn build(self) -> Result<DataCache> {
        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        Ok(DataCache {
            cache_dir: self.cache_dir,
            historical: HistoricalStore::new(self.historical_dir),
            live_prices: self.live_prices,
            live_fundamentals: self.live_fundamentals,
            rate_limiter: RateLimiter::new(
                self.rate_limit_per_min as usize,
                StdDuration::from_secs(60),
            ),
            retry_policy: RetryPolicy::new(self.max_retries),
            consolidated_ttl: chrono::Duration::hours(self.cache_ttl_hours),
            fundamentals_ttl: chrono::Duration::days(self.fundamentals_ttl_days),
            locks: DashMap::new(),
        })
    }
}

impl DataCache {
    fn blob_path(&self, ticker: &Ticker) -> PathBuf {
        self.cache_dir.join(format!("ticker_{}.json", ticker.as_str()))
    }

    fn meta_path(&self) -> PathBuf {
        self.cache_dir.join("meta.json")
    }

    async fn lock_for(&self, ticker: &Ticker) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(ticker.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn read_blob(&self, ticker: &Ticker) -> Result<Option<CachedTickerBlob>> {
        let path = self.blob_path(ticker);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        let blob: CachedTickerBlob = serde_json::from_str(&raw)
            .map_err(|e| PortfolioError::DataIntegrity(format!("corrupt cache blob: {e}")))?;
        Ok(Some(blob))
    }

    /// Atomic write: temp file then rename, so concurrent readers never see
    /// a torn write.
    fn write_blob_atomic(&self, ticker: &Ticker, blob: &CachedTickerBlob) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        let path = self.blob_path(ticker);
        let tmp_path = self.cache_dir.join(format!(
            "ticker_{}.json.tmp-{}",
            ticker.as_str(),
            std::process::id()
        ));
        let serialized = serde_json::to_vec_pretty(blob)
            .map_err(|e| PortfolioError::DataIntegrity(e.to_string()))?;
        std::fs::write(&tmp_path, serialized)
            .map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        Ok(())
    }

    /// Public write-back entrypoint matching the spec's `set(ticker, blob)`.
    pub async fn set(&self, ticker: &Ticker, blob: CachedTickerBlob) -> Result<()> {
        let lock = self.lock_for(ticker).await;
        let _guard = lock.lock().await;
        self.write_blob_atomic(ticker, &blob)
    }

    fn blob_is_fresh(&self, blob: &CachedTickerBlob) -> bool {
        Utc::now() - blob.write_time < self.consolidated_ttl
    }

    /// `get_prices(ticker, start, end) -> [PriceBar]`: bars with `start <= date < end`.
    pub async fn get_prices(
        &self,
        ticker: &Ticker,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        let today = Utc::now().date_naive();

        if end <= today {
            if let Some(bars) = self.historical.read_range(ticker, start, end)? {
                if !bars.is_empty() {
                    return Ok(bars);
                }
            }
        }

        if let Some(blob) = self.read_blob(ticker)? {
            if self.blob_is_fresh(&blob) {
                let bars: Vec<PriceBar> = blob
                    .prices
                    .iter()
                    .copied()
                    .filter(|b| b.date >= start && b.date < end)
                    .collect();
                if !bars.is_empty() {
                    return Ok(bars);
                }
            }
        }

        let source = self.live_prices.clone().ok_or_else(|| {
            PortfolioError::NotFound(format!("no price coverage for {ticker} and no live source"))
        })?;
        let lock = self.lock_for(ticker).await;
        let _guard = lock.lock().await;

        let rate_limiter = self.rate_limiter.clone();
        let bars = portfolio_core::retry(self.retry_policy, || {
            let source = source.clone();
            let rate_limiter = rate_limiter.clone();
            async move {
                rate_limiter.acquire().await;
                source.get_history(ticker, start, end).await
            }
        })
        .await?;

        // Defense in depth: never trust a live source to honor the
        // requested window itself. A bar at or after `end` here would be a
        // look-ahead leak, not a data-availability hiccup, so it aborts the
        // whole call rather than being silently dropped.
        if let Some(leaked) = bars.iter().find(|b| b.date < start || b.date >= end) {
            return Err(PortfolioError::TemporalViolation(format!(
                "live source returned a bar dated {} outside the requested [{start}, {end}) window for {ticker}",
                leaked.date
            )));
        }

        let mut blob = self.read_blob(ticker)?.unwrap_or(CachedTickerBlob {
            write_time: Utc::now(),
            prices: Vec::new(),
            fundamentals: None,
        });
        blob.prices = bars.clone();
        blob.write_time = Utc::now();
        self.write_blob_atomic(ticker, &blob)?;

        Ok(bars)
    }

    /// `get_fundamentals(ticker, as_of) -> FundamentalsSnapshot`: the latest
    /// snapshot with `publication_date < as_of`.
    pub async fn get_fundamentals(
        &self,
        ticker: &Ticker,
        as_of: NaiveDate,
    ) -> Result<portfolio_core::FundamentalsSnapshot> {
        if let Some(blob) = self.read_blob(ticker)? {
            if let Some(f) = blob.fundamentals {
                if f.publication_date < as_of && self.blob_is_fresh(&blob) {
                    return Ok(f);
                }
            }
        }

        let source = self.live_fundamentals.clone().ok_or_else(|| {
            PortfolioError::NotFound(format!(
                "no fundamentals coverage for {ticker} and no live source"
            ))
        })?;
        let lock = self.lock_for(ticker).await;
        let _guard = lock.lock().await;

        let rate_limiter = self.rate_limiter.clone();
        let snap = portfolio_core::retry(self.retry_policy, || {
            let source = source.clone();
            let rate_limiter = rate_limiter.clone();
            async move {
                rate_limiter.acquire().await;
                source.get_latest(ticker, as_of).await
            }
        })
        .await?;

        if snap.publication_date >= as_of {
            return Err(PortfolioError::TemporalViolation(format!(
                "fundamentals for {ticker} published {} on or after as_of {as_of}",
                snap.publication_date
            )));
        }

        let mut blob = self.read_blob(ticker)?.unwrap_or(CachedTickerBlob {
            write_time: Utc::now(),
            prices: Vec::new(),
            fundamentals: None,
        });
        blob.fundamentals = Some(snap);
        blob.write_time = Utc::now();
        self.write_blob_atomic(ticker, &blob)?;

        Ok(snap)
    }

    pub fn read_meta(&self) -> Result<CacheMeta> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok(CacheMeta::default());
        }
        let raw =
            std::fs::read_to_string(&path).map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        serde_json::from_str(&raw)
            .map_err(|e| PortfolioError::DataIntegrity(format!("corrupt meta.json: {e}")))
    }

    /// Explicit maintenance purge: drops any consolidated blob past its TTL.
    /// Historical store entries are never purged here.
    pub fn purge_stale(&self) -> Result<usize> {
        let mut purged = 0;
        if !self.cache_dir.exists() {
            return Ok(0);
        }
        for entry in
            std::fs::read_dir(&self.cache_dir).map_err(|e| PortfolioError::TransientIo(e.to_string()))?
        {
            let entry = entry.map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some("meta.json") {
                continue;
            }
            if let Ok(raw) = std::fs::read_to_string(&path) {
                if let Ok(blob) = serde_json::from_str::<CachedTickerBlob>(&raw) {
                    if !self.blob_is_fresh(&blob) {
                        std::fs::remove_file(&path)
                            .map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
                        purged += 1;
                    }
                }
            }
        }
        let meta = CacheMeta {
            version: 1,
            last_maintenance: Some(Utc::now()),
        };
        let serialized =
            serde_json::to_vec_pretty(&meta).map_err(|e| PortfolioError::DataIntegrity(e.to_string()))?;
        std::fs::write(self.meta_path(), serialized)
            .map_err(|e| PortfolioError::TransientIo(e.to_string()))?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use portfolio_core::FundamentalsSnapshot;
    use tempfile::tempdir;

    fn bar(date: NaiveDate, close: f64) -> PriceBar {
        PriceBar {
            date,
            open: close,
            high: close,
            low: close,
            close,
            adj_close: close,
            volume: 1_000.0,
        }
    }

    struct FakePrices(Vec<PriceBar>);

    #[async_trait]
    impl PriceSource for FakePrices {
        async fn get_history(
            &self,
            _ticker: &Ticker,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<PriceBar>> {
            Ok(self
                .0
                .iter()
                .copied()
                .filter(|b| b.date >= start && b.date < end)
                .collect())
        }
    }

    struct FakeFundamentals(FundamentalsSnapshot);

    #[async_trait]
    impl FundamentalsSource for FakeFundamentals {
        async fn get_latest(
            &self,
            _ticker: &Ticker,
            _as_of: NaiveDate,
        ) -> Result<FundamentalsSnapshot> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn falls_back_to_live_source_and_caches_result() {
        let dir = tempdir().unwrap();
        let d1 = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 1, 10).unwrap();

        let cache = DataCacheBuilder::new(
            dir.path().join("cache"),
            dir.path().join("historical"),
        )
        .with_price_source(Arc::new(FakePrices(vec![bar(d1, 10.0), bar(d2, 11.0)])))
        .build()
        .unwrap();

        let ticker = Ticker::new("AAPL");
        let bars = cache.get_prices(&ticker, d1, end).await.unwrap();
        assert_eq!(bars.len(), 2);

        let blob = cache.read_blob(&ticker).unwrap().unwrap();
        assert_eq!(blob.prices.len(), 2);
    }

    #[tokio::test]
    async fn get_fundamentals_rejects_publication_on_as_of() {
        let dir = tempdir().unwrap();
        let as_of = NaiveDate::from_ymd_opt(2023, 6, 30).unwrap();
        let snap = FundamentalsSnapshot {
            publication_date: as_of,
            free_cash_flow: 1.0,
            ebit: 1.0,
            total_assets: 10.0,
            current_liabilities: 1.0,
            gross_profit: 1.0,
            revenue: 2.0,
            shares_outstanding: 100.0,
            market_capitalization: 1000.0,
        };
        let cache = DataCacheBuilder::new(dir.path().join("cache"), dir.path().join("historical"))
            .with_fundamentals_source(Arc::new(FakeFundamentals(snap)))
            .build()
            .unwrap();

        let result = cache
            .get_fundamentals(&Ticker::new("AAPL"), as_of)
            .await;
        assert!(matches!(result, Err(PortfolioError::TemporalViolation(_))));
    }

    #[tokio::test]
    async fn no_source_and_no_cache_is_not_found() {
        let dir = tempdir().unwrap();
        let cache = DataCacheBuilder::new(dir.path().join("cache"), dir.path().join("historical"))
            .build()
            .unwrap();
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 2, 1).unwrap();
        let result = cache.get_prices(&Ticker::new("ZZZZ"), start, end).await;
        assert!(matches!(result, Err(PortfolioError::NotFound(_))));
    }
}
