//! Cross-sectional statistics shared by factor scoring, regime detection and
//! the optimizer: mean/std, z-scoring, winsorization and percentile ranks.

/// Compute the mean of a data slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample standard deviation. Returns 0.0 for fewer than two observations.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}

/// z-score of `value` against the cross-section `data`. Returns 0.0 when the
/// cross-section has no dispersion rather than dividing by zero.
pub fn z_score_of(value: f64, data: &[f64]) -> f64 {
    let sd = std_dev(data);
    if sd < f64::EPSILON {
        return 0.0;
    }
    (value - mean(data)) / sd
}

/// Clamp a z-score to `[-limit, limit]`. `limit` is expected to be positive
/// (spec default 3.0).
pub fn winsorize(z: f64, limit: f64) -> f64 {
    z.clamp(-limit, limit)
}

/// Percentile rank of `value` within `data`, in `[0.0, 1.0]`. Ties count as
/// half a rank below and half a rank above.
pub fn percentile_rank(value: f64, data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.5;
    }
    let count_below = data.iter().filter(|&&x| x < value).count();
    let count_equal = data
        .iter()
        .filter(|&&x| (x - value).abs() < f64::EPSILON)
        .count();
    (count_below as f64 + 0.5 * count_equal as f64) / data.len() as f64
}
