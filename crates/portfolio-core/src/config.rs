use serde::{Deserialize, Serialize};

use crate::error::{PortfolioError, Result};
use crate::types::FactorWeights;

/// The full, centralized configuration surface for the engine. Validated
/// once at construction so every downstream component can assume its fields
/// are internally consistent rather than re-checking them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub factor_weights: FactorWeights,
    pub winsorize_limit: f64,
    pub top_n: usize,
    pub max_position_size: f64,
    pub factor_alpha_scalar: f64,
    pub risk_aversion: f64,
    pub tau: f64,
    pub covariance_lookback_days: i64,
    pub rate_limit_per_min: u32,
    pub cache_ttl_hours: i64,
    pub fundamentals_ttl_days: i64,
    pub max_retries: u32,
    pub enable_regime_adjustment: bool,
    pub enable_macro_tilt: bool,
    pub enable_factor_regimes: bool,
    /// Confidence bands for `factor_std`, ascending: `{0.5, 1.0, 1.5}`.
    /// Index 0 pairs with the highest confidence (0.8), descending from there.
    pub confidence_bands: [f64; 3],
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            factor_weights: FactorWeights::default(),
            winsorize_limit: 3.0,
            top_n: 30,
            max_position_size: 0.30,
            factor_alpha_scalar: 0.02,
            risk_aversion: 2.5,
            tau: 0.05,
            covariance_lookback_days: 504,
            rate_limit_per_min: 60,
            cache_ttl_hours: 24,
            fundamentals_ttl_days: 90,
            max_retries: 5,
            enable_regime_adjustment: false,
            enable_macro_tilt: false,
            enable_factor_regimes: true,
            confidence_bands: [0.5, 1.0, 1.5],
        }
    }
}

impl PortfolioConfig {
    /// Validate invariants that every component relies on without
    /// re-checking: weights sum to 1, caps are in range, `top_n` is sane.
    pub fn validate(&self) -> Result<()> {
        let w = &self.factor_weights;
        let sum = w.value + w.quality + w.momentum;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(PortfolioError::ConfigError(format!(
                "factor_weights must sum to 1.0, got {sum}"
            )));
        }
        if !(0.0..=1.0).contains(&self.max_position_size) || self.max_position_size <= 0.0 {
            return Err(PortfolioError::ConfigError(format!(
                "max_position_size must be in (0, 1], got {}",
                self.max_position_size
            )));
        }
        if self.winsorize_limit <= 0.0 {
            return Err(PortfolioError::ConfigError(
                "winsorize_limit must be positive".to_string(),
            ));
        }
        if self.top_n == 0 {
            return Err(PortfolioError::ConfigError(
                "top_n must be at least 1".to_string(),
            ));
        }
        if self.tau <= 0.0 || self.risk_aversion <= 0.0 {
            return Err(PortfolioError::ConfigError(
                "tau and risk_aversion must be positive".to_string(),
            ));
        }
        if self.rate_limit_per_min == 0 {
            return Err(PortfolioError::ConfigError(
                "rate_limit_per_min must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate a config additionally against the size of a concrete
    /// universe (`top_n` cannot exceed what is available).
    pub fn validate_against_universe(&self, universe_size: usize) -> Result<()> {
        self.validate()?;
        if self.top_n > universe_size {
            return Err(PortfolioError::ConfigError(format!(
                "top_n ({}) exceeds universe size ({universe_size})",
                self.top_n
            )));
        }
        Ok(())
    }

    /// Idzorek-style confidence from a view's `factor_std` dispersion.
    pub fn confidence_for_factor_std(&self, factor_std: f64) -> f64 {
        let [low, mid, high] = self.confidence_bands;
        if factor_std < low {
            0.8
        } else if factor_std < mid {
            0.6
        } else if factor_std < high {
            0.4
        } else {
            0.2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(PortfolioConfig::default().validate().is_ok());
    }

    #[test]
    fn weights_not_summing_to_one_rejected() {
        let mut cfg = PortfolioConfig::default();
        cfg.factor_weights.value = 0.5;
        assert!(matches!(
            cfg.validate(),
            Err(PortfolioError::ConfigError(_))
        ));
    }

    #[test]
    fn top_n_exceeding_universe_rejected() {
        let cfg = PortfolioConfig::default();
        assert!(cfg.validate_against_universe(5).is_err());
        assert!(cfg.validate_against_universe(100).is_ok());
    }

    #[test]
    fn confidence_bands_order() {
        let cfg = PortfolioConfig::default();
        assert_eq!(cfg.confidence_for_factor_std(0.3), 0.8);
        assert_eq!(cfg.confidence_for_factor_std(0.7), 0.6);
        assert_eq!(cfg.confidence_for_factor_std(1.2), 0.4);
        assert_eq!(cfg.confidence_for_factor_std(2.0), 0.2);
    }
}
