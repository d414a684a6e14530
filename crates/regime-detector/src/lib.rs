//! Classifies market state from an index's price trend and volatility term
//! structure. Output is advisory: the optimizer consults it only when
//! `enable_regime_adjustment` is set.

use portfolio_core::{PortfolioError, PriceBar, Regime, Result};
use serde::{Deserialize, Serialize};

const SMA_WINDOW: usize = 200;
const SHORT_VOL_WINDOW: usize = 21;
const LONG_VOL_WINDOW: usize = 63;
const MIN_BARS: usize = SMA_WINDOW + LONG_VOL_WINDOW;

/// Diagnostic inputs behind a regime call, retained for audit/logging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeMetrics {
    pub sma_200: f64,
    pub price_vs_sma: f64,
    pub short_vol: f64,
    pub long_vol: f64,
    pub vol_term_structure: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegimeDetectionResult {
    pub regime: Regime,
    pub signal_strength: f64,
    pub details: RegimeMetrics,
}

pub struct RegimeDetector;

impl RegimeDetector {
    pub fn new() -> Self {
        Self
    }

    /// `bars` must be sorted ascending by date and end strictly before the
    /// caller's `as_of` (enforced upstream by `AsOfBoundSource`/`DataCache`).
    pub fn detect(&self, bars: &[PriceBar]) -> Result<RegimeDetectionResult> {
        if bars.len() < MIN_BARS {
            return Err(PortfolioError::DataIntegrity(format!(
                "regime detection needs at least {MIN_BARS} bars, got {}",
                bars.len()
            )));
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.adj_close).collect();
        let sma_200 = simple_moving_average(&closes, SMA_WINDOW);
        let last_price = *closes.last().expect("checked non-empty above");
        let price_vs_sma = (last_price - sma_200) / sma_200;

        let returns = daily_returns(&closes);
        let short_vol = realized_vol(&returns, SHORT_VOL_WINDOW);
        let long_vol = realized_vol(&returns, LONG_VOL_WINDOW);
        let vol_term_structure = if long_vol > f64::EPSILON {
            short_vol / long_vol
        } else {
            1.0
        };

        let details = RegimeMetrics {
            sma_200,
            price_vs_sma,
            short_vol,
            long_vol,
            vol_term_structure,
            sample_size: bars.len(),
        };

        let (regime, signal_strength) = classify(&details);

        Ok(RegimeDetectionResult {
            regime,
            signal_strength,
            details,
        })
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn simple_moving_average(values: &[f64], window: usize) -> f64 {
    let slice = &values[values.len() - window..];
    slice.iter().sum::<f64>() / window as f64
}

fn daily_returns(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
}

fn realized_vol(returns: &[f64], window: usize) -> f64 {
    if returns.len() < window {
        return 0.0;
    }
    let slice = &returns[returns.len() - window..];
    let mean = slice.iter().sum::<f64>() / slice.len() as f64;
    let variance = slice.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / slice.len() as f64;
    variance.sqrt()
}

/// Rule-based classification: accumulate points toward RISK_ON/RISK_OFF from
/// trend, vol term structure and price deviation, then compare margins.
fn classify(m: &RegimeMetrics) -> (Regime, f64) {
    let mut risk_on = 0.0;
    let mut risk_off = 0.0;

    if m.price_vs_sma > 0.0 {
        risk_on += 50.0;
    } else {
        risk_off += 50.0;
    }

    if m.vol_term_structure < 0.9 {
        risk_on += 30.0;
    } else if m.vol_term_structure > 1.2 {
        risk_off += 30.0;
    }

    if m.price_vs_sma > 0.03 {
        risk_on += 20.0;
    } else if m.price_vs_sma < -0.03 {
        risk_off += 20.0;
    }

    let margin = risk_on - risk_off;
    let regime = if margin > 30.0 {
        Regime::RiskOn
    } else if margin < -30.0 {
        Regime::RiskOff
    } else {
        Regime::Caution
    };
    let signal_strength = (margin.abs() / 100.0).clamp(0.0, 1.0);
    (regime, signal_strength)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn bars_with_trend(count: usize, start_price: f64, daily_drift: f64) -> Vec<PriceBar> {
        let start_date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        (0..count)
            .map(|i| {
                let price = start_price + i as f64 * daily_drift;
                PriceBar {
                    date: start_date + chrono::Duration::days(i as i64),
                    open: price,
                    high: price + 0.5,
                    low: price - 0.5,
                    close: price,
                    adj_close: price,
                    volume: 1_000_000.0,
                }
            })
            .collect()
    }

    #[test]
    fn insufficient_bars_is_data_integrity_error() {
        let bars = bars_with_trend(10, 100.0, 0.1);
        let result = RegimeDetector::new().detect(&bars);
        assert!(matches!(result, Err(PortfolioError::DataIntegrity(_))));
    }

    #[test]
    fn sustained_uptrend_classifies_risk_on() {
        let bars = bars_with_trend(300, 100.0, 0.3);
        let result = RegimeDetector::new().detect(&bars).unwrap();
        assert_eq!(result.regime, Regime::RiskOn);
        assert!(result.details.price_vs_sma > 0.0);
    }

    #[test]
    fn sustained_downtrend_classifies_risk_off() {
        let bars = bars_with_trend(300, 200.0, -0.3);
        let result = RegimeDetector::new().detect(&bars).unwrap();
        assert_eq!(result.regime, Regime::RiskOff);
        assert!(result.details.price_vs_sma < 0.0);
    }

    #[test]
    fn flat_series_has_zero_volatility() {
        let bars = bars_with_trend(300, 150.0, 0.0);
        let result = RegimeDetector::new().detect(&bars).unwrap();
        assert_relative_eq!(result.details.short_vol, 0.0, epsilon = 1e-9);
        assert_relative_eq!(result.details.long_vol, 0.0, epsilon = 1e-9);
    }
}
