use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// An opaque uppercase equity symbol. Primary key throughout the engine.
///
/// Constructed from any string-like input; normalizes to uppercase so two
/// tickers differing only in case are never treated as distinct.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticker(String);

impl Ticker {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Ticker {
    fn from(s: &str) -> Self {
        Ticker::new(s)
    }
}

impl From<String> for Ticker {
    fn from(s: String) -> Self {
        Ticker::new(s)
    }
}

/// A single adjusted OHLCV bar. `adj_close` is the authoritative return series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: f64,
}

/// A company's latest-reported fundamentals as of a date.
///
/// `publication_date` is the reporting period's public filing date; the
/// point-in-time contract is `publication_date < as_of` for any snapshot
/// used in a computation cut at `as_of`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsSnapshot {
    pub publication_date: NaiveDate,
    pub free_cash_flow: f64,
    pub ebit: f64,
    pub total_assets: f64,
    pub current_liabilities: f64,
    pub gross_profit: f64,
    pub revenue: f64,
    pub shares_outstanding: f64,
    pub market_capitalization: f64,
}

/// A universe member enriched with market cap and sector, as of a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub ticker: Ticker,
    pub market_cap: f64,
    pub sector: String,
    pub as_of: NaiveDate,
}

/// Raw (pre-standardization) per-ticker factor inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFactors {
    pub fcf_yield: f64,
    pub earnings_yield: f64,
    pub roic: f64,
    pub gross_margin: f64,
    pub momentum_12m: f64,
}

/// Cross-sectional z-scores, winsorized to `[-winsorize_limit, +winsorize_limit]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardizedFactors {
    pub value_z: f64,
    pub quality_z: f64,
    pub momentum_z: f64,
}

/// Full per-ticker, per-rebalance-date factor record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorScores {
    pub ticker: Ticker,
    pub as_of: NaiveDate,
    pub raw: RawFactors,
    pub standardized: StandardizedFactors,
    pub total_score: f64,
    pub rank: usize,
    pub percentile: f64,
    /// Std dev of the three z-scores; a dispersion/confidence proxy.
    pub factor_std: f64,
}

/// Cross-sectional mean/std/count used to standardize one raw factor, retained for audit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorStat {
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

/// Per-factor standardization statistics for one rebalance date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniverseStats {
    pub value: FactorStat,
    pub quality: FactorStat,
    pub momentum: FactorStat,
}

/// Composite weights applied to the three standardized factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub value: f64,
    pub quality: f64,
    pub momentum: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            value: 0.4,
            quality: 0.4,
            momentum: 0.2,
        }
    }
}

/// An absolute Black-Litterman view on one ticker's excess return.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub implied_excess_return: f64,
    pub confidence: f64,
}

/// The result of a single optimization run: target weights plus the
/// discrete share conversion for a given capital/price set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationResult {
    pub weights: BTreeMap<Ticker, f64>,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe: f64,
    pub discrete_shares: BTreeMap<Ticker, u64>,
    pub invested_capital: f64,
    pub leftover_cash: f64,
    /// Set when the optimizer fell back to equal-weight because the convex
    /// program was infeasible under the requested constraints.
    pub degraded: bool,
}

/// Market regime classification, §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    RiskOn,
    Caution,
    RiskOff,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Regime::RiskOn => "RISK_ON",
            Regime::Caution => "CAUTION",
            Regime::RiskOff => "RISK_OFF",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_normalizes_case() {
        assert_eq!(Ticker::new("aapl"), Ticker::new("AAPL"));
        assert_eq!(Ticker::new(" msft "), Ticker::new("MSFT"));
    }

    #[test]
    fn default_factor_weights_sum_to_one() {
        let w = FactorWeights::default();
        assert!((w.value + w.quality + w.momentum - 1.0).abs() < 1e-12);
    }
}
