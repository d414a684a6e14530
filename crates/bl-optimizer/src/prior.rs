//! Reverse-optimization (market-implied) prior, §4.4 step 1.

use nalgebra::{DMatrix, DVector};

/// Market-cap weights, normalized to sum to 1.
pub fn market_cap_weights(market_caps: &[f64]) -> DVector<f64> {
    let total: f64 = market_caps.iter().sum();
    if total <= 0.0 {
        return DVector::from_element(market_caps.len(), 1.0 / market_caps.len().max(1) as f64);
    }
    DVector::from_iterator(market_caps.len(), market_caps.iter().map(|c| c / total))
}

/// `pi = delta * Sigma * w_mkt`: the equilibrium excess return implied by
/// the market portfolio under risk aversion `delta`.
pub fn market_implied_returns(
    sigma: &DMatrix<f64>,
    market_weights: &DVector<f64>,
    risk_aversion: f64,
) -> DVector<f64> {
    sigma * market_weights * risk_aversion
}
