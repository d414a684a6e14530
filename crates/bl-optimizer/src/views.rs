//! Builds per-ticker absolute views from factor scores, §4.4 step 2.
//!
//! Every view is a one-hot pick vector (`P = I`), so the view-uncertainty
//! matrix `Omega` is diagonal and the posterior combination in
//! [`crate::posterior`] can skip the general `P` machinery entirely.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use portfolio_core::{FactorScores, PortfolioConfig, Ticker};

pub struct ViewSet {
    /// `n x 1` vector of implied excess returns, one per ticker (in the same
    /// order as the caller's ticker slice).
    pub q: DMatrix<f64>,
    /// `n x n` diagonal view-uncertainty matrix.
    pub omega: DMatrix<f64>,
    /// Idzorek-style confidence used for each view, retained for audit.
    pub confidences: Vec<f64>,
}

/// `q_i = total_score_i * sigma_i * alpha`, with Idzorek confidence
/// `c_i = config.confidence_for_factor_std(factor_std_i)` and
/// `Omega_ii = (1 - c_i) / c_i * (tau * Sigma)_ii`.
pub fn build_views(
    tickers: &[Ticker],
    scores: &BTreeMap<Ticker, FactorScores>,
    volatilities: &[f64],
    tau_sigma_diag: &[f64],
    config: &PortfolioConfig,
) -> ViewSet {
    let n = tickers.len();
    let mut q = vec![0.0; n];
    let mut confidences = vec![0.0; n];
    let mut omega = DMatrix::<f64>::zeros(n, n);

    for (i, ticker) in tickers.iter().enumerate() {
        let total_score = scores.get(ticker).map(|s| s.total_score).unwrap_or(0.0);
        let factor_std = scores.get(ticker).map(|s| s.factor_std).unwrap_or(0.0);

        q[i] = total_score * volatilities[i] * config.factor_alpha_scalar;

        let c = config.confidence_for_factor_std(factor_std).clamp(1e-6, 1.0 - 1e-6);
        confidences[i] = c;
        omega[(i, i)] = ((1.0 - c) / c * tau_sigma_diag[i]).max(1e-12);
    }

    ViewSet {
        q: DMatrix::from_vec(n, 1, q),
        omega,
        confidences,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use portfolio_core::{RawFactors, StandardizedFactors};

    fn score(ticker: &str, total_score: f64, factor_std: f64) -> (Ticker, FactorScores) {
        let t = Ticker::new(ticker);
        (
            t.clone(),
            FactorScores {
                ticker: t,
                as_of: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                raw: RawFactors {
                    fcf_yield: 0.0,
                    earnings_yield: 0.0,
                    roic: 0.0,
                    gross_margin: 0.0,
                    momentum_12m: 0.0,
                },
                standardized: StandardizedFactors {
                    value_z: 0.0,
                    quality_z: 0.0,
                    momentum_z: 0.0,
                },
                total_score,
                rank: 1,
                percentile: 1.0,
                factor_std,
            },
        )
    }

    #[test]
    fn higher_confidence_yields_tighter_omega() {
        let config = PortfolioConfig::default();
        let tickers = vec![Ticker::new("AAA"), Ticker::new("BBB")];
        let mut scores = BTreeMap::new();
        let (t1, s1) = score("AAA", 1.0, 0.1); // tight dispersion -> high confidence
        let (t2, s2) = score("BBB", 1.0, 2.0); // wide dispersion -> low confidence
        scores.insert(t1, s1);
        scores.insert(t2, s2);

        let view_set = build_views(&tickers, &scores, &[0.2, 0.2], &[0.001, 0.001], &config);
        assert!(view_set.confidences[0] > view_set.confidences[1]);
        assert!(view_set.omega[(0, 0)] < view_set.omega[(1, 1)]);
    }
}
