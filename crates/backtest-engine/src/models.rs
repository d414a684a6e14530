//! Data model for the walk-forward backtest (§4.6): the rebalance schedule,
//! per-rebalance records and the summary equity-curve statistics.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use portfolio_core::{PortfolioConfig, Ticker};
use serde::{Deserialize, Serialize};

use bl_optimizer::Objective;

fn default_benchmark_ticker() -> Ticker {
    Ticker::new("SPY")
}

/// Rebalance cadence for the walk-forward schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceFrequency {
    Monthly,
    Quarterly,
}

/// Full configuration for one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub universe_name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub frequency: RebalanceFrequency,
    pub initial_capital: f64,
    /// Transaction cost in basis points of turnover, applied at each
    /// rebalance. `0.0` disables transaction costs entirely.
    pub transaction_cost_bps: f64,
    pub portfolio_config: PortfolioConfig,
    #[serde(skip, default = "default_objective")]
    pub objective: Objective,
    /// Index ticker `RegimeDetector` reads when
    /// `portfolio_config.enable_regime_adjustment` is set. Ignored
    /// otherwise.
    #[serde(default = "default_benchmark_ticker")]
    pub benchmark_ticker: Ticker,
}

fn default_objective() -> Objective {
    Objective::MaxSharpe
}

impl BacktestConfig {
    pub fn validate(&self) -> portfolio_core::Result<()> {
        self.portfolio_config.validate()?;
        if self.end <= self.start {
            return Err(portfolio_core::PortfolioError::ConfigError(
                "backtest end date must be after start date".to_string(),
            ));
        }
        if self.transaction_cost_bps < 0.0 {
            return Err(portfolio_core::PortfolioError::ConfigError(
                "transaction_cost_bps must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// One point on the simulated portfolio equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Outcome of one scheduled rebalance date. `skipped` is set when the
/// rebalance could not be computed at all (e.g. `UniverseTooSparse`) and the
/// driver continued holding the prior portfolio instead; `degraded` is set
/// when the optimizer itself ran but fell back to equal-weight because the
/// convex program was infeasible (spec §7 `InfeasibleOptimization`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceRecord {
    pub date: NaiveDate,
    pub weights: BTreeMap<Ticker, f64>,
    pub discrete_shares: BTreeMap<Ticker, u64>,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe: f64,
    pub turnover: f64,
    pub transaction_cost: f64,
    pub portfolio_value_before: f64,
    pub degraded: bool,
    pub skipped: bool,
    pub skip_reason: Option<String>,
}

/// Aggregate result of a full walk-forward run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub equity_curve: Vec<EquityPoint>,
    pub rebalances: Vec<RebalanceRecord>,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
}

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Turnover between two weight vectors: half the L1 distance, the
/// conventional definition (a full flip from all-A to all-B is turnover 1.0,
/// not 2.0).
pub fn turnover(previous: &BTreeMap<Ticker, f64>, current: &BTreeMap<Ticker, f64>) -> f64 {
    let mut tickers: std::collections::BTreeSet<&Ticker> = previous.keys().collect();
    tickers.extend(current.keys());
    let l1: f64 = tickers
        .into_iter()
        .map(|t| {
            let prev = previous.get(t).copied().unwrap_or(0.0);
            let curr = current.get(t).copied().unwrap_or(0.0);
            (curr - prev).abs()
        })
        .sum();
    0.5 * l1
}

fn daily_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .filter(|w| w[0].value > 0.0)
        .map(|w| w[1].value / w[0].value - 1.0)
        .collect()
}

/// Annualized compound return over the full equity curve.
pub fn annualized_return(equity_curve: &[EquityPoint]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }
    let first = equity_curve.first().unwrap();
    let last = equity_curve.last().unwrap();
    if first.value <= 0.0 {
        return 0.0;
    }
    let total_return = last.value / first.value - 1.0;
    let days = (last.date - first.date).num_days().max(1) as f64;
    let years = days / 365.25;
    if years <= 0.0 {
        return 0.0;
    }
    (1.0 + total_return).powf(1.0 / years) - 1.0
}

/// Annualized volatility of daily returns along the equity curve.
pub fn annualized_volatility(equity_curve: &[EquityPoint]) -> f64 {
    let returns = daily_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    (variance * TRADING_DAYS_PER_YEAR).sqrt()
}

/// Annualized Sharpe ratio of daily returns (zero risk-free rate — the
/// optimizer already works in excess-return space via the BL posterior).
pub fn sharpe_ratio(equity_curve: &[EquityPoint]) -> f64 {
    let returns = daily_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev < f64::EPSILON {
        return 0.0;
    }
    mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Maximum peak-to-trough fractional drawdown along the equity curve, in
/// `[0.0, 1.0]`.
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0;
    for point in equity_curve {
        if point.value > peak {
            peak = point.value;
        }
        if peak > 0.0 {
            let drawdown = (peak - point.value) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(day: u32, value: f64) -> EquityPoint {
        EquityPoint {
            date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(day as i64),
            value,
        }
    }

    #[test]
    fn turnover_of_identical_weights_is_zero() {
        let mut w = BTreeMap::new();
        w.insert(Ticker::new("AAA"), 0.5);
        w.insert(Ticker::new("BBB"), 0.5);
        assert_eq!(turnover(&w, &w), 0.0);
    }

    #[test]
    fn turnover_of_full_flip_is_one() {
        let mut prev = BTreeMap::new();
        prev.insert(Ticker::new("AAA"), 1.0);
        let mut curr = BTreeMap::new();
        curr.insert(Ticker::new("BBB"), 1.0);
        assert!((turnover(&prev, &curr) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn max_drawdown_from_peak() {
        let curve = vec![point(0, 100.0), point(1, 120.0), point(2, 90.0), point(3, 110.0)];
        let dd = max_drawdown(&curve);
        assert!((dd - 0.25).abs() < 1e-9);
    }

    #[test]
    fn flat_curve_has_zero_drawdown_and_volatility() {
        let curve = vec![point(0, 100.0), point(1, 100.0), point(2, 100.0)];
        assert_eq!(max_drawdown(&curve), 0.0);
        assert_eq!(annualized_volatility(&curve), 0.0);
        assert_eq!(sharpe_ratio(&curve), 0.0);
    }
}
