//! Walk-forward rebalancing loop (§4.6): at each scheduled date, build a
//! [`FactorEngine`] pinned to that date, run the Black-Litterman optimizer
//! over the top-ranked subset, record the allocation, then simulate the
//! portfolio forward to the next rebalance date using realized returns.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use nalgebra::DMatrix;

use bl_optimizer::{allocate::discrete_allocate, BlackLittermanOptimizer, PortfolioInputs};
use data_cache::DataCache;
use factor_engine::FactorEngine;
use portfolio_core::{AllocationResult, PortfolioError, PriceBar, Regime, Result, Ticker};
use regime_detector::RegimeDetector;
use tokio_util::sync::CancellationToken;
use universe_provider::{SectorSource, UniverseProvider};

use crate::models::{
    annualized_return, annualized_volatility, max_drawdown, sharpe_ratio, turnover,
    BacktestConfig, BacktestResult, EquityPoint, RebalanceRecord,
};
use crate::schedule::rebalance_dates;

/// Minimum number of overlapping trading days across the selected tickers'
/// price histories required to estimate a covariance matrix. Below this the
/// rebalance is abandoned as a `DataIntegrity` failure rather than handed to
/// the optimizer with a degenerate sample.
const MIN_COMMON_TRADING_DAYS: usize = 10;

/// Calendar-day lookback fetched for the benchmark series feeding
/// `RegimeDetector`, generous enough to cover its 200-trading-day SMA plus
/// 63-day volatility window through weekends and holidays.
const REGIME_LOOKBACK_CALENDAR_DAYS: i64 = 400;

/// Equity-exposure scalar applied to the optimizer's weights when
/// `enable_regime_adjustment` is set, per spec.md §4.5 ("scale aggregate
/// equity exposure"). `RISK_ON` keeps full exposure; `CAUTION` and
/// `RISK_OFF` shift the unallocated remainder into cash rather than
/// reallocating it, so a defensive regime is reflected in the equity curve
/// even though the optimizer's own per-asset weights don't change.
fn regime_exposure_scalar(regime: Regime) -> f64 {
    match regime {
        Regime::RiskOn => 1.0,
        Regime::Caution => 0.75,
        Regime::RiskOff => 0.5,
    }
}

struct RebalanceAttempt {
    alloc: AllocationResult,
    latest_prices: BTreeMap<Ticker, f64>,
}

/// Drives one full walk-forward backtest. Borrows the [`DataCache`] and a
/// [`SectorSource`] rather than owning them, so a single cache/sector feed
/// can back multiple concurrent or sequential backtest configurations.
pub struct BacktestEngine<'a, S: SectorSource> {
    cache: &'a DataCache,
    sectors: &'a S,
    config: BacktestConfig,
    cancellation: Option<CancellationToken>,
}

impl<'a, S: SectorSource> BacktestEngine<'a, S> {
    pub fn new(cache: &'a DataCache, sectors: &'a S, config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cache,
            sectors,
            config,
            cancellation: None,
        })
    }

    /// Wires a cancellation token through the per-rebalance fetch pool and
    /// the run loop itself (§5). A cancellation observed between rebalances
    /// discards the whole run rather than returning a partial result, since
    /// only the caller who requested cancellation can decide whether a
    /// partial equity curve is meaningful.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub async fn run(&self) -> Result<BacktestResult> {
        let dates = rebalance_dates(self.config.start, self.config.end, self.config.frequency);
        if dates.is_empty() {
            return Err(PortfolioError::ConfigError(
                "no rebalance dates fall within [start, end)".to_string(),
            ));
        }

        let mut equity_curve = vec![EquityPoint {
            date: dates[0],
            value: self.config.initial_capital,
        }];
        let mut rebalances = Vec::new();
        let mut portfolio_value = self.config.initial_capital;
        let mut current_weights: BTreeMap<Ticker, f64> = BTreeMap::new();
        let mut anchor_prices: BTreeMap<Ticker, f64> = BTreeMap::new();

        for (i, &date) in dates.iter().enumerate() {
            if let Some(token) = &self.cancellation {
                if token.is_cancelled() {
                    return Err(PortfolioError::Cancelled(format!(
                        "backtest cancelled before rebalance at {date}"
                    )));
                }
            }
            let period_end = dates.get(i + 1).copied().unwrap_or(self.config.end);

            match self.rebalance_at(date, portfolio_value).await {
                Ok(attempt) => {
                    let weights = attempt.alloc.weights;
                    let period_turnover = turnover(&current_weights, &weights);
                    let transaction_cost =
                        period_turnover * portfolio_value * self.config.transaction_cost_bps / 10_000.0;
                    let capital_after_cost = (portfolio_value - transaction_cost).max(0.0);
                    let discrete =
                        discrete_allocate(&weights, &attempt.latest_prices, capital_after_cost);

                    rebalances.push(RebalanceRecord {
                        date,
                        weights: weights.clone(),
                        discrete_shares: discrete.shares,
                        expected_return: attempt.alloc.expected_return,
                        volatility: attempt.alloc.volatility,
                        sharpe: attempt.alloc.sharpe,
                        turnover: period_turnover,
                        transaction_cost,
                        portfolio_value_before: portfolio_value,
                        degraded: attempt.alloc.degraded,
                        skipped: false,
                        skip_reason: None,
                    });

                    current_weights = weights;
                    anchor_prices = attempt.latest_prices;
                    portfolio_value = capital_after_cost;
                }
                // A lookahead leak is a correctness bug, not a data-availability
                // hiccup: never silently skip it, abort the whole run. A
                // cancellation is likewise never a per-rebalance skip.
                Err(err @ PortfolioError::TemporalViolation(_)) => return Err(err),
                Err(err @ PortfolioError::Cancelled(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(%date, %err, "rebalance skipped, continuing with prior portfolio");
                    rebalances.push(RebalanceRecord {
                        date,
                        weights: current_weights.clone(),
                        discrete_shares: BTreeMap::new(),
                        expected_return: 0.0,
                        volatility: 0.0,
                        sharpe: 0.0,
                        turnover: 0.0,
                        transaction_cost: 0.0,
                        portfolio_value_before: portfolio_value,
                        degraded: false,
                        skipped: true,
                        skip_reason: Some(err.to_string()),
                    });
                }
            }

            equity_curve.push(EquityPoint {
                date,
                value: portfolio_value,
            });

            if current_weights.is_empty() {
                equity_curve.push(EquityPoint {
                    date: period_end,
                    value: portfolio_value,
                });
                continue;
            }

            let forward_points = self
                .simulate_forward(&current_weights, &anchor_prices, date, period_end, portfolio_value)
                .await?;
            if let Some(last) = forward_points.last() {
                portfolio_value = last.value;
            }
            equity_curve.extend(forward_points);
        }

        Ok(BacktestResult {
            annualized_return: annualized_return(&equity_curve),
            annualized_volatility: annualized_volatility(&equity_curve),
            sharpe: sharpe_ratio(&equity_curve),
            max_drawdown: max_drawdown(&equity_curve),
            equity_curve,
            rebalances,
        })
    }

    /// One rebalance: universe → factor scores → top-N selection →
    /// Black-Litterman allocation. Every fetch here is filtered to
    /// `< date` by construction (`UniverseProvider`/`FactorEngine` both take
    /// `as_of = date`), so this function carries the no-look-ahead guarantee
    /// for the whole loop.
    async fn rebalance_at(&self, date: NaiveDate, capital: f64) -> Result<RebalanceAttempt> {
        let provider = UniverseProvider::new(self.cache, self.sectors);
        let entries = provider.load(&self.config.universe_name, date).await?;
        if entries.is_empty() {
            return Err(PortfolioError::UniverseTooSparse(format!(
                "universe '{}' is empty as of {date}",
                self.config.universe_name
            )));
        }
        self.config
            .portfolio_config
            .validate_against_universe(entries.len())?;

        let market_caps_by_ticker: BTreeMap<Ticker, f64> = entries
            .iter()
            .map(|e| (e.ticker.clone(), e.market_cap))
            .collect();
        let tickers: Vec<Ticker> = entries.into_iter().map(|e| e.ticker).collect();

        let mut factor_engine = FactorEngine::new(
            self.cache,
            date,
            self.config.portfolio_config.factor_weights,
            self.config.portfolio_config.winsorize_limit,
        );
        if let Some(token) = &self.cancellation {
            factor_engine = factor_engine.with_cancellation(token.clone());
        }
        let factor_output = factor_engine.compute(&tickers).await?;

        let mut ranked: Vec<_> = factor_output.scores.values().collect();
        ranked.sort_by_key(|s| s.rank);
        let top_n = self.config.portfolio_config.top_n.min(ranked.len());
        let selected: Vec<Ticker> = ranked.into_iter().take(top_n).map(|s| s.ticker.clone()).collect();

        let lookback_start =
            date - chrono::Duration::days(self.config.portfolio_config.covariance_lookback_days);
        let mut histories: BTreeMap<Ticker, Vec<PriceBar>> = BTreeMap::new();
        for ticker in &selected {
            let bars = self.cache.get_prices(ticker, lookback_start, date).await?;
            histories.insert(ticker.clone(), bars);
        }

        let (daily_returns, latest_prices) = build_returns_matrix(&selected, &histories)?;

        let market_caps: Vec<f64> = selected
            .iter()
            .map(|t| market_caps_by_ticker.get(t).copied().unwrap_or(0.0))
            .collect();
        let factor_scores: BTreeMap<Ticker, _> = selected
            .iter()
            .filter_map(|t| factor_output.scores.get(t).map(|s| (t.clone(), s.clone())))
            .collect();

        let inputs = PortfolioInputs {
            tickers: &selected,
            daily_returns: &daily_returns,
            market_caps: &market_caps,
            factor_scores: &factor_scores,
            latest_prices: &latest_prices,
        };

        let optimizer = BlackLittermanOptimizer::new(&self.config.portfolio_config);
        let mut alloc = optimizer.allocate(&inputs, self.config.objective, capital)?;

        if self.config.portfolio_config.enable_regime_adjustment {
            if let Some(scalar) = self.regime_exposure_scalar_at(date).await? {
                for weight in alloc.weights.values_mut() {
                    *weight *= scalar;
                }
            }
        }

        Ok(RebalanceAttempt { alloc, latest_prices })
    }

    /// Consults `RegimeDetector` on the configured benchmark ticker as of
    /// `date`. Returns `Ok(None)` rather than an error when the benchmark
    /// lacks enough history yet (e.g. near the start of the backtest window)
    /// — regime adjustment is advisory, so missing data degrades to "no
    /// adjustment" instead of aborting the rebalance.
    async fn regime_exposure_scalar_at(&self, date: NaiveDate) -> Result<Option<f64>> {
        let lookback_start = date - chrono::Duration::days(REGIME_LOOKBACK_CALENDAR_DAYS);
        let bars = match self
            .cache
            .get_prices(&self.config.benchmark_ticker, lookback_start, date)
            .await
        {
            Ok(bars) => bars,
            Err(PortfolioError::NotFound(_)) => return Ok(None),
            Err(err @ PortfolioError::TemporalViolation(_)) => return Err(err),
            Err(_) => return Ok(None),
        };

        match RegimeDetector::new().detect(&bars) {
            Ok(result) => Ok(Some(regime_exposure_scalar(result.regime))),
            Err(PortfolioError::DataIntegrity(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Compounds `starting_value` forward over `[window_start, window_end)`
    /// using each held ticker's realized daily return, weighted by its
    /// target fractional weight. Dates missing a bar for a given ticker
    /// (holidays, feed gaps) simply contribute no return for that ticker on
    /// that day rather than aborting the simulation.
    async fn simulate_forward(
        &self,
        weights: &BTreeMap<Ticker, f64>,
        anchor_prices: &BTreeMap<Ticker, f64>,
        window_start: NaiveDate,
        window_end: NaiveDate,
        starting_value: f64,
    ) -> Result<Vec<EquityPoint>> {
        let mut histories: BTreeMap<Ticker, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
        let mut all_dates: BTreeSet<NaiveDate> = BTreeSet::new();

        for ticker in weights.keys() {
            let bars = self
                .cache
                .get_prices(ticker, window_start, window_end)
                .await
                .unwrap_or_default();
            let mut by_date = BTreeMap::new();
            for bar in bars {
                all_dates.insert(bar.date);
                by_date.insert(bar.date, bar.adj_close);
            }
            histories.insert(ticker.clone(), by_date);
        }

        if all_dates.is_empty() {
            return Ok(vec![EquityPoint {
                date: window_end,
                value: starting_value,
            }]);
        }

        let mut last_price = anchor_prices.clone();
        let mut value = starting_value;
        let mut points = Vec::with_capacity(all_dates.len());

        for date in all_dates {
            let mut period_return = 0.0;
            for (ticker, weight) in weights {
                if *weight <= 0.0 {
                    continue;
                }
                if let Some(&price) = histories.get(ticker).and_then(|h| h.get(&date)) {
                    let prev = last_price.get(ticker).copied().unwrap_or(0.0);
                    if prev > 0.0 {
                        period_return += weight * (price / prev - 1.0);
                    }
                    last_price.insert(ticker.clone(), price);
                }
            }
            value *= 1.0 + period_return;
            points.push(EquityPoint { date, value });
        }

        Ok(points)
    }
}

/// Builds the `T x N` daily-return matrix over the dates common to every
/// selected ticker's history, plus the latest (most recent, strictly
/// pre-`as_of`) adjusted close per ticker for discrete allocation pricing.
fn build_returns_matrix(
    tickers: &[Ticker],
    histories: &BTreeMap<Ticker, Vec<PriceBar>>,
) -> Result<(DMatrix<f64>, BTreeMap<Ticker, f64>)> {
    let mut common: Option<BTreeSet<NaiveDate>> = None;
    for ticker in tickers {
        let bars = histories
            .get(ticker)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                PortfolioError::DataIntegrity(format!("no price history for {ticker}"))
            })?;
        let dates: BTreeSet<NaiveDate> = bars.iter().map(|b| b.date).collect();
        common = Some(match common {
            Some(existing) => existing.intersection(&dates).copied().collect(),
            None => dates,
        });
    }
    let mut dates: Vec<NaiveDate> = common.unwrap_or_default().into_iter().collect();
    dates.sort();

    if dates.len() < MIN_COMMON_TRADING_DAYS {
        return Err(PortfolioError::DataIntegrity(format!(
            "only {} overlapping trading day(s) across selected tickers, need at least {MIN_COMMON_TRADING_DAYS}",
            dates.len()
        )));
    }

    let mut price_by_ticker_date: BTreeMap<&Ticker, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for ticker in tickers {
        let by_date: BTreeMap<NaiveDate, f64> = histories[ticker]
            .iter()
            .map(|b| (b.date, b.adj_close))
            .collect();
        price_by_ticker_date.insert(ticker, by_date);
    }

    let n = tickers.len();
    let t = dates.len();
    let mut returns = DMatrix::<f64>::zeros(t - 1, n);
    for (col, ticker) in tickers.iter().enumerate() {
        let prices = &price_by_ticker_date[ticker];
        for row in 0..(t - 1) {
            let p0 = prices[&dates[row]];
            let p1 = prices[&dates[row + 1]];
            returns[(row, col)] = if p0 > 0.0 { p1 / p0 - 1.0 } else { 0.0 };
        }
    }

    let latest_prices: BTreeMap<Ticker, f64> = tickers
        .iter()
        .map(|t| (t.clone(), price_by_ticker_date[t][dates.last().unwrap()]))
        .collect();

    Ok((returns, latest_prices))
}
