//! Black-Litterman portfolio construction: market-implied prior, factor
//! views, posterior combination, constrained mean-variance optimization and
//! discrete share allocation (§4.4).

pub mod allocate;
pub mod covariance;
pub mod optimize;
pub mod posterior;
pub mod prior;
pub mod views;

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use portfolio_core::{AllocationResult, FactorScores, PortfolioConfig, PortfolioError, Result, Ticker};

pub use optimize::Objective;

/// Everything the optimizer needs for one rebalance date. `daily_returns`
/// columns must align with `tickers` in order.
pub struct PortfolioInputs<'a> {
    pub tickers: &'a [Ticker],
    pub daily_returns: &'a DMatrix<f64>,
    pub market_caps: &'a [f64],
    pub factor_scores: &'a BTreeMap<Ticker, FactorScores>,
    pub latest_prices: &'a BTreeMap<Ticker, f64>,
}

pub struct BlackLittermanOptimizer<'a> {
    config: &'a PortfolioConfig,
}

impl<'a> BlackLittermanOptimizer<'a> {
    pub fn new(config: &'a PortfolioConfig) -> Self {
        Self { config }
    }

    pub fn allocate(
        &self,
        inputs: &PortfolioInputs,
        objective: Objective,
        capital: f64,
    ) -> Result<AllocationResult> {
        let n = inputs.tickers.len();
        if n == 0 {
            return Err(PortfolioError::UniverseTooSparse(
                "cannot optimize an empty selection".to_string(),
            ));
        }
        if n == 1 {
            return self.allocate_single(inputs, capital);
        }

        let sample_cov = covariance::sample_covariance_annualized(inputs.daily_returns);
        let (sigma, intensity) = self.shrink_covariance(&sample_cov, inputs.daily_returns)?;
        tracing::debug!(intensity, n, "ledoit-wolf shrinkage applied");

        let market_weights = prior::market_cap_weights(inputs.market_caps);
        let pi = prior::market_implied_returns(&sigma, &market_weights, self.config.risk_aversion);

        let tau_sigma_diag: Vec<f64> = (0..n).map(|i| sigma[(i, i)] * self.config.tau).collect();
        let volatilities: Vec<f64> = (0..n).map(|i| sigma[(i, i)].max(0.0).sqrt()).collect();
        let view_set = views::build_views(
            inputs.tickers,
            inputs.factor_scores,
            &volatilities,
            &tau_sigma_diag,
            self.config,
        );

        let mu_bl = posterior::black_litterman_posterior(
            &pi,
            &sigma,
            self.config.tau,
            &view_set.q,
            &view_set.omega,
        )
        .unwrap_or_else(|| {
            tracing::warn!("posterior combination singular, falling back to market-implied prior");
            pi.clone()
        });

        let outcome = optimize::optimize(&mu_bl, &sigma, objective, self.config.max_position_size);
        self.finish(inputs, &mu_bl, &sigma, outcome, capital)
    }

    fn allocate_single(&self, inputs: &PortfolioInputs, capital: f64) -> Result<AllocationResult> {
        let ticker = inputs.tickers[0].clone();
        let price = *inputs.latest_prices.get(&ticker).ok_or_else(|| {
            PortfolioError::DataIntegrity(format!("missing latest price for {ticker}"))
        })?;

        let mut weights = BTreeMap::new();
        weights.insert(ticker.clone(), 1.0);
        let alloc = allocate::discrete_allocate(&weights, inputs.latest_prices, capital);

        let variance = if inputs.daily_returns.nrows() > 1 {
            let col = inputs.daily_returns.column(0);
            let mean = col.iter().sum::<f64>() / col.len() as f64;
            col.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (col.len() - 1) as f64 * 252.0
        } else {
            0.0
        };
        let volatility = variance.max(0.0).sqrt();
        let expected_return = inputs
            .factor_scores
            .get(&ticker)
            .map(|s| s.total_score * self.config.factor_alpha_scalar)
            .unwrap_or(0.0);
        let sharpe = if volatility > f64::EPSILON {
            expected_return / volatility
        } else {
            0.0
        };

        let _ = price;
        Ok(AllocationResult {
            weights,
            expected_return,
            volatility,
            sharpe,
            discrete_shares: alloc.shares,
            invested_capital: alloc.invested_capital,
            leftover_cash: alloc.leftover_cash,
            degraded: false,
        })
    }

    /// Shrinks `sample_cov` toward its constant-correlation target; if the
    /// shrunk matrix still isn't positive definite, retries at full
    /// shrinkage intensity. If it's still singular even then (e.g. an
    /// all-zero return matrix, whose constant-correlation target is the
    /// zero matrix too) the covariance is genuinely degenerate and §8
    /// requires that to surface rather than be silently patched over.
    fn shrink_covariance(
        &self,
        sample_cov: &DMatrix<f64>,
        daily_returns: &DMatrix<f64>,
    ) -> Result<(DMatrix<f64>, f64)> {
        let (shrunk, intensity) = covariance::ledoit_wolf_shrink(sample_cov, daily_returns, None);
        if covariance::is_positive_definite(&shrunk) {
            return Ok((shrunk, intensity));
        }

        tracing::warn!("shrunk covariance not positive definite, forcing full shrinkage");
        let (fully_shrunk, forced) =
            covariance::ledoit_wolf_shrink(sample_cov, daily_returns, Some(1.0));
        if covariance::is_positive_definite(&fully_shrunk) {
            return Ok((fully_shrunk, forced));
        }

        Err(PortfolioError::SingularCovariance(
            "covariance not positive definite even at full shrinkage intensity".to_string(),
        ))
    }

    fn finish(
        &self,
        inputs: &PortfolioInputs,
        mu_bl: &DVector<f64>,
        sigma: &DMatrix<f64>,
        outcome: optimize::OptimizeOutcome,
        capital: f64,
    ) -> Result<AllocationResult> {
        let mut weights = BTreeMap::new();
        for (i, ticker) in inputs.tickers.iter().enumerate() {
            weights.insert(ticker.clone(), outcome.weights[i]);
        }

        let expected_return = mu_bl.dot(&outcome.weights);
        let variance = (outcome.weights.transpose() * sigma * &outcome.weights)[(0, 0)];
        let volatility = variance.max(0.0).sqrt();
        let sharpe = if volatility > f64::EPSILON {
            expected_return / volatility
        } else {
            0.0
        };

        let alloc = allocate::discrete_allocate(&weights, inputs.latest_prices, capital);

        Ok(AllocationResult {
            weights,
            expected_return,
            volatility,
            sharpe,
            discrete_shares: alloc.shares,
            invested_capital: alloc.invested_capital,
            leftover_cash: alloc.leftover_cash,
            degraded: outcome.degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use portfolio_core::{RawFactors, StandardizedFactors};

    fn synthetic_scores(tickers: &[&str], total_scores: &[f64]) -> BTreeMap<Ticker, FactorScores> {
        tickers
            .iter()
            .zip(total_scores)
            .map(|(t, score)| {
                let ticker = Ticker::new(*t);
                (
                    ticker.clone(),
                    FactorScores {
                        ticker,
                        as_of: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                        raw: RawFactors {
                            fcf_yield: 0.0,
                            earnings_yield: 0.0,
                            roic: 0.0,
                            gross_margin: 0.0,
                            momentum_12m: 0.0,
                        },
                        standardized: StandardizedFactors {
                            value_z: *score,
                            quality_z: 0.0,
                            momentum_z: 0.0,
                        },
                        total_score: *score,
                        rank: 1,
                        percentile: 1.0,
                        factor_std: 1.0,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn universe_of_one_allocates_full_weight() {
        let config = PortfolioConfig::default();
        let optimizer = BlackLittermanOptimizer::new(&config);
        let tickers = vec![Ticker::new("AAA")];
        let returns = DMatrix::from_vec(5, 1, vec![0.01, -0.01, 0.02, -0.02, 0.0]);
        let scores = synthetic_scores(&["AAA"], &[1.0]);
        let mut prices = BTreeMap::new();
        prices.insert(Ticker::new("AAA"), 100.0);

        let inputs = PortfolioInputs {
            tickers: &tickers,
            daily_returns: &returns,
            market_caps: &[1_000_000.0],
            factor_scores: &scores,
            latest_prices: &prices,
        };

        let result = optimizer
            .allocate(&inputs, Objective::MaxSharpe, 10_000.0)
            .unwrap();
        assert!((result.weights[&Ticker::new("AAA")] - 1.0).abs() < 1e-12);
        assert!(!result.degraded);
    }

    #[test]
    fn weights_sum_to_one_for_multi_asset_universe() {
        let mut config = PortfolioConfig::default();
        // 3 tickers need cap >= 1/3 for the box-simplex program to be
        // feasible; the default 0.30 would otherwise trip the degraded
        // equal-weight fallback in optimize().
        config.max_position_size = 0.5;
        let optimizer = BlackLittermanOptimizer::new(&config);
        let tickers = vec![Ticker::new("AAA"), Ticker::new("BBB"), Ticker::new("CCC")];

        let returns = DMatrix::from_row_slice(
            8,
            3,
            &[
                0.01, 0.02, -0.01, -0.01, 0.015, 0.005, 0.02, -0.01, 0.01, -0.015, 0.005, -0.02,
                0.01, -0.02, 0.0, 0.0, 0.01, 0.015, -0.02, 0.005, -0.01, 0.015, -0.005, 0.02,
            ],
        );
        let scores = synthetic_scores(&["AAA", "BBB", "CCC"], &[1.5, 0.2, -1.0]);
        let mut prices = BTreeMap::new();
        prices.insert(Ticker::new("AAA"), 100.0);
        prices.insert(Ticker::new("BBB"), 50.0);
        prices.insert(Ticker::new("CCC"), 25.0);

        let inputs = PortfolioInputs {
            tickers: &tickers,
            daily_returns: &returns,
            market_caps: &[3_000_000.0, 1_000_000.0, 500_000.0],
            factor_scores: &scores,
            latest_prices: &prices,
        };

        let result = optimizer
            .allocate(&inputs, Objective::MaxSharpe, 100_000.0)
            .unwrap();
        let sum: f64 = result.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        for w in result.weights.values() {
            assert!(*w >= -1e-9 && *w <= config.max_position_size + 1e-9);
        }
        assert!(result.leftover_cash < *prices.values().fold(&f64::INFINITY, f64::min));
    }

    #[test]
    fn all_zero_returns_surfaces_singular_covariance() {
        let config = PortfolioConfig::default();
        let optimizer = BlackLittermanOptimizer::new(&config);
        let tickers = vec![Ticker::new("AAA"), Ticker::new("BBB")];
        let returns = DMatrix::from_row_slice(
            6,
            2,
            &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        );
        let scores = synthetic_scores(&["AAA", "BBB"], &[0.5, 0.5]);
        let mut prices = BTreeMap::new();
        prices.insert(Ticker::new("AAA"), 10.0);
        prices.insert(Ticker::new("BBB"), 20.0);

        let inputs = PortfolioInputs {
            tickers: &tickers,
            daily_returns: &returns,
            market_caps: &[1.0, 1.0],
            factor_scores: &scores,
            latest_prices: &prices,
        };

        let result = optimizer.allocate(&inputs, Objective::MaxSharpe, 1_000.0);
        assert!(matches!(
            result,
            Err(PortfolioError::SingularCovariance(_))
        ));
    }

    #[test]
    fn max_position_size_of_one_over_n_yields_exact_equal_weight() {
        let mut config = PortfolioConfig::default();
        config.top_n = 4;
        config.max_position_size = 0.25;
        let optimizer = BlackLittermanOptimizer::new(&config);
        let tickers = vec![
            Ticker::new("AAA"),
            Ticker::new("BBB"),
            Ticker::new("CCC"),
            Ticker::new("DDD"),
        ];
        let returns = DMatrix::from_row_slice(
            6,
            4,
            &[
                0.01, 0.02, -0.01, 0.0, -0.01, 0.015, 0.005, 0.01, 0.02, -0.01, 0.01, -0.02,
                -0.015, 0.005, -0.02, 0.015, 0.01, -0.02, 0.0, -0.01, 0.0, 0.01, 0.015, 0.02,
            ],
        );
        let scores = synthetic_scores(&["AAA", "BBB", "CCC", "DDD"], &[2.0, 1.0, -1.0, -2.0]);
        let mut prices = BTreeMap::new();
        for t in &["AAA", "BBB", "CCC", "DDD"] {
            prices.insert(Ticker::new(*t), 40.0);
        }

        let inputs = PortfolioInputs {
            tickers: &tickers,
            daily_returns: &returns,
            market_caps: &[1.0, 1.0, 1.0, 1.0],
            factor_scores: &scores,
            latest_prices: &prices,
        };

        let result = optimizer
            .allocate(&inputs, Objective::MaxSharpe, 40_000.0)
            .unwrap();
        for w in result.weights.values() {
            assert!((w - 0.25).abs() < 1e-6);
        }
    }
}
