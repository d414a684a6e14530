//! Cross-sectional, point-in-time factor scoring.
//!
//! [`FactorEngine::compute`] is pinned to a single `as_of` date: every fetch
//! it performs is filtered to data strictly before that date, so the whole
//! pipeline downstream of it inherits the no-look-ahead guarantee.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use data_cache::DataCache;
use futures_util::stream::{FuturesUnordered, StreamExt};
use portfolio_core::{
    stats, FactorScores, FactorStat, FactorWeights, PortfolioError, RawFactors, Result,
    StandardizedFactors, Ticker, UniverseStats,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Trading days of price history required per ticker (12-month momentum
/// plus one day: `price(as_of-1) / price(as_of-253)`).
const REQUIRED_TRADING_DAYS: usize = 253;
/// Calendar-day lookback used to fetch enough bars to cover
/// `REQUIRED_TRADING_DAYS`, padded for weekends/holidays.
const PRICE_LOOKBACK_CALENDAR_DAYS: i64 = 420;
const FETCH_BATCH_SIZE: usize = 50;
const FETCH_CONCURRENCY: usize = 8;
const MIN_COVERAGE_FRACTION: f64 = 0.5;

pub struct FactorEngineOutput {
    pub scores: BTreeMap<Ticker, FactorScores>,
    pub universe_stats: UniverseStats,
}

pub struct FactorEngine<'a> {
    cache: &'a DataCache,
    as_of: NaiveDate,
    weights: FactorWeights,
    winsorize_limit: f64,
    cancellation: Option<CancellationToken>,
}

impl<'a> FactorEngine<'a> {
    pub fn new(
        cache: &'a DataCache,
        as_of: NaiveDate,
        weights: FactorWeights,
        winsorize_limit: f64,
    ) -> Self {
        Self {
            cache,
            as_of,
            weights,
            winsorize_limit,
            cancellation: None,
        }
    }

    /// Wires a cancellation token through the fetch worker pool (§5): after
    /// the in-flight batch completes, no further batch is scheduled and
    /// `compute` returns `PortfolioError::Cancelled` instead of a partial
    /// result. In-flight requests are allowed to finish since they are
    /// idempotent reads; nothing already fetched is persisted or returned.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub async fn compute(&self, tickers: &[Ticker]) -> Result<FactorEngineOutput> {
        let requested = tickers.len();
        let fetched = self.fetch_all(tickers).await?;
        let surviving: Vec<(Ticker, RawFactors)> = fetched.into_iter().flatten().collect();

        if requested > 0 && (surviving.len() as f64) < requested as f64 * MIN_COVERAGE_FRACTION {
            return Err(PortfolioError::UniverseTooSparse(format!(
                "only {}/{requested} tickers produced usable factor data",
                surviving.len()
            )));
        }

        let value_raw: Vec<f64> = surviving
            .iter()
            .map(|(_, r)| 0.5 * r.fcf_yield + 0.5 * r.earnings_yield)
            .collect();
        let quality_raw: Vec<f64> = surviving
            .iter()
            .map(|(_, r)| 0.5 * r.roic + 0.5 * r.gross_margin)
            .collect();
        let momentum_raw: Vec<f64> = surviving.iter().map(|(_, r)| r.momentum_12m).collect();

        let value_stat = cross_sectional_stat(&value_raw);
        let quality_stat = cross_sectional_stat(&quality_raw);
        let momentum_stat = cross_sectional_stat(&momentum_raw);

        let mut scored: Vec<(Ticker, RawFactors, StandardizedFactors, f64)> = Vec::new();
        for (i, (ticker, raw)) in surviving.into_iter().enumerate() {
            let value_z = standardize(value_raw[i], &value_stat, self.winsorize_limit);
            let quality_z = standardize(quality_raw[i], &quality_stat, self.winsorize_limit);
            let momentum_z = standardize(momentum_raw[i], &momentum_stat, self.winsorize_limit);
            let standardized = StandardizedFactors {
                value_z,
                quality_z,
                momentum_z,
            };
            let total_score = self.weights.value * value_z
                + self.weights.quality * quality_z
                + self.weights.momentum * momentum_z;
            scored.push((ticker, raw, standardized, total_score));
        }

        scored.sort_by(|a, b| {
            b.3.partial_cmp(&a.3)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let n = scored.len();
        let mut scores = BTreeMap::new();
        for (idx, (ticker, raw, standardized, total_score)) in scored.into_iter().enumerate() {
            let rank = idx + 1;
            let percentile = if n > 1 {
                1.0 - (rank - 1) as f64 / (n - 1) as f64
            } else {
                1.0
            };
            let z_values = [standardized.value_z, standardized.quality_z, standardized.momentum_z];
            let factor_std = stats::std_dev(&z_values);
            scores.insert(
                ticker.clone(),
                FactorScores {
                    ticker,
                    as_of: self.as_of,
                    raw,
                    standardized,
                    total_score,
                    rank,
                    percentile,
                    factor_std,
                },
            );
        }

        Ok(FactorEngineOutput {
            scores,
            universe_stats: UniverseStats {
                value: value_stat,
                quality: quality_stat,
                momentum: momentum_stat,
            },
        })
    }

    async fn fetch_all(&self, tickers: &[Ticker]) -> Result<Vec<Option<(Ticker, RawFactors)>>> {
        let semaphore = Arc::new(Semaphore::new(FETCH_CONCURRENCY));
        let mut results = Vec::with_capacity(tickers.len());

        for batch in tickers.chunks(FETCH_BATCH_SIZE) {
            if let Some(token) = &self.cancellation {
                if token.is_cancelled() {
                    return Err(PortfolioError::Cancelled(
                        "factor engine fetch cancelled before scheduling next batch".to_string(),
                    ));
                }
            }

            let mut in_flight = FuturesUnordered::new();
            for ticker in batch {
                let sem = semaphore.clone();
                let ticker = ticker.clone();
                in_flight.push(async move {
                    let _permit = sem.acquire().await.expect("semaphore never closed");
                    self.fetch_one(&ticker).await
                });
            }
            while let Some(result) = in_flight.next().await {
                results.push(result);
            }
        }
        Ok(results)
    }

    async fn fetch_one(&self, ticker: &Ticker) -> Option<(Ticker, RawFactors)> {
        let snapshot = match self.cache.get_fundamentals(ticker, self.as_of).await {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(%ticker, %err, "dropped from universe: no fundamentals");
                return None;
            }
        };

        let start = self.as_of - Duration::days(PRICE_LOOKBACK_CALENDAR_DAYS);
        let mut bars = match self.cache.get_prices(ticker, start, self.as_of).await {
            Ok(b) => b,
            Err(err) => {
                tracing::warn!(%ticker, %err, "dropped from universe: no price history");
                return None;
            }
        };
        bars.sort_by_key(|b| b.date);

        if bars.len() < REQUIRED_TRADING_DAYS {
            tracing::warn!(
                %ticker,
                available = bars.len(),
                required = REQUIRED_TRADING_DAYS,
                "dropped from universe: insufficient price history"
            );
            return None;
        }

        let last = bars[bars.len() - 1].adj_close;
        let lookback = bars[bars.len() - REQUIRED_TRADING_DAYS].adj_close;
        let momentum_12m = if lookback > 0.0 {
            last / lookback - 1.0
        } else {
            f64::NAN
        };

        let market_cap = snapshot.market_capitalization;
        let fcf_yield = if market_cap > 0.0 {
            snapshot.free_cash_flow / market_cap
        } else {
            f64::NAN
        };
        let earnings_yield = if market_cap > 0.0 {
            snapshot.ebit / market_cap
        } else {
            f64::NAN
        };
        let invested_capital_base = snapshot.total_assets - snapshot.current_liabilities;
        let roic = if invested_capital_base > 0.0 {
            snapshot.ebit / invested_capital_base
        } else {
            f64::NAN
        };
        let gross_margin = if snapshot.revenue > 0.0 {
            snapshot.gross_profit / snapshot.revenue
        } else {
            f64::NAN
        };

        Some((
            ticker.clone(),
            RawFactors {
                fcf_yield,
                earnings_yield,
                roic,
                gross_margin,
                momentum_12m,
            },
        ))
    }
}

fn cross_sectional_stat(values: &[f64]) -> FactorStat {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    FactorStat {
        mean: stats::mean(&finite),
        std: stats::std_dev(&finite),
        count: finite.len(),
    }
}

/// Map a raw value to a winsorized z-score; NaN or non-finite inputs and
/// zero-dispersion cross-sections both map to neutral (0.0), never dropped.
fn standardize(value: f64, stat: &FactorStat, limit: f64) -> f64 {
    if !value.is_finite() || stat.std < f64::EPSILON {
        return 0.0;
    }
    stats::winsorize((value - stat.mean) / stat.std, limit)
}
