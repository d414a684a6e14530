//! Supplies named, curated universes enriched with market cap and sector,
//! as of a date.

mod universes;

use chrono::NaiveDate;
use data_cache::DataCache;
use portfolio_core::{PortfolioError, Result, Ticker, UniverseEntry};

pub use universes::named_universe;

/// Minimal metadata source the provider needs beyond prices/fundamentals:
/// sector classification. Kept separate from `FundamentalsSource` since
/// sector is static reference data, not a point-in-time financial figure.
#[async_trait::async_trait]
pub trait SectorSource: Send + Sync {
    async fn sector_of(&self, ticker: &Ticker) -> Result<String>;
}

pub struct UniverseProvider<'a, S: SectorSource> {
    cache: &'a DataCache,
    sectors: &'a S,
}

impl<'a, S: SectorSource> UniverseProvider<'a, S> {
    pub fn new(cache: &'a DataCache, sectors: &'a S) -> Self {
        Self { cache, sectors }
    }

    /// Resolve a named universe into enriched entries as of `as_of`.
    /// Tickers with a null/unavailable market cap are dropped, per spec.
    pub async fn load(&self, universe_name: &str, as_of: NaiveDate) -> Result<Vec<UniverseEntry>> {
        let tickers = named_universe(universe_name).ok_or_else(|| {
            PortfolioError::ConfigError(format!("unknown universe '{universe_name}'"))
        })?;

        let mut entries = Vec::with_capacity(tickers.len());
        for symbol in tickers {
            let ticker = Ticker::new(symbol);
            let snapshot = match self.cache.get_fundamentals(&ticker, as_of).await {
                Ok(s) => s,
                Err(PortfolioError::NotFound(_)) => {
                    tracing::warn!(%ticker, "dropped from universe: no fundamentals coverage");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if snapshot.market_capitalization <= 0.0 {
                tracing::warn!(%ticker, "dropped from universe: null market cap");
                continue;
            }
            let sector = self.sectors.sector_of(&ticker).await?;
            entries.push(UniverseEntry {
                ticker,
                market_cap: snapshot.market_capitalization,
                sector,
                as_of,
            });
        }
        Ok(entries)
    }
}

/// Select the top `n` entries by market cap descending. Free function since
/// it depends on neither the cache nor the sector source.
pub fn top_n(entries: &[UniverseEntry], n: usize) -> Vec<UniverseEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| {
        b.market_cap
            .partial_cmp(&a.market_cap)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
    sorted.truncate(n);
    sorted
}
