//! Sample covariance estimation and Ledoit-Wolf shrinkage toward a
//! constant-correlation target.

use nalgebra::DMatrix;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Annualized sample covariance of a `T x N` matrix of daily returns (rows
/// are observations, columns are tickers).
pub fn sample_covariance_annualized(returns: &DMatrix<f64>) -> DMatrix<f64> {
    let t = returns.nrows() as f64;
    let n = returns.ncols();
    let means: Vec<f64> = (0..n)
        .map(|j| returns.column(j).iter().sum::<f64>() / t)
        .collect();

    let mut cov = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            let s: f64 = (0..returns.nrows())
                .map(|k| (returns[(k, i)] - means[i]) * (returns[(k, j)] - means[j]))
                .sum::<f64>()
                / (t - 1.0);
            cov[(i, j)] = s * TRADING_DAYS_PER_YEAR;
        }
    }
    cov
}

/// Ledoit-Wolf shrinkage of the (annualized) sample covariance `sample_cov`
/// toward a constant-correlation target, using demeaned daily `returns` to
/// estimate the shrinkage intensity. Returns `(shrunk_covariance, intensity)`.
///
/// When `force_intensity` is `Some`, that intensity is used directly instead
/// of being estimated — used by the `SingularCovariance` fallback path,
/// which retries at intensity 1.0 (fully shrunk to the target).
pub fn ledoit_wolf_shrink(
    sample_cov: &DMatrix<f64>,
    daily_returns: &DMatrix<f64>,
    force_intensity: Option<f64>,
) -> (DMatrix<f64>, f64) {
    let n = sample_cov.nrows();
    let t = daily_returns.nrows() as f64;

    let std_devs: Vec<f64> = (0..n).map(|i| sample_cov[(i, i)].max(0.0).sqrt()).collect();

    let mut corr_sum = 0.0;
    let mut pair_count = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            if std_devs[i] > f64::EPSILON && std_devs[j] > f64::EPSILON {
                corr_sum += sample_cov[(i, j)] / (std_devs[i] * std_devs[j]);
                pair_count += 1;
            }
        }
    }
    let rho_bar = if pair_count > 0 {
        corr_sum / pair_count as f64
    } else {
        0.0
    };

    let mut target = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            target[(i, j)] = if i == j {
                sample_cov[(i, i)]
            } else {
                rho_bar * std_devs[i] * std_devs[j]
            };
        }
    }

    let intensity = force_intensity.unwrap_or_else(|| {
        estimate_shrinkage_intensity(sample_cov, &target, daily_returns, t)
    });
    let intensity = intensity.clamp(0.0, 1.0);

    let shrunk = &target * intensity + sample_cov * (1.0 - intensity);
    (shrunk, intensity)
}

/// Lightweight Ledoit-Wolf intensity estimator: ratio of the estimated
/// sampling variance of the covariance entries to the squared distance
/// between sample and target, clamped into `[0, 1]`.
fn estimate_shrinkage_intensity(
    sample_cov: &DMatrix<f64>,
    target: &DMatrix<f64>,
    daily_returns: &DMatrix<f64>,
    t: f64,
) -> f64 {
    let n = sample_cov.nrows();
    // Work in daily (unannualized) units since `daily_returns` is daily.
    let daily_cov = sample_cov / 252.0;
    let daily_target = target / 252.0;

    let means: Vec<f64> = (0..n)
        .map(|j| daily_returns.column(j).iter().sum::<f64>() / t)
        .collect();

    let mut pi_hat = 0.0;
    for i in 0..n {
        for j in 0..n {
            let s_ij = daily_cov[(i, j)];
            let var: f64 = (0..daily_returns.nrows())
                .map(|k| {
                    let xi = daily_returns[(k, i)] - means[i];
                    let xj = daily_returns[(k, j)] - means[j];
                    (xi * xj - s_ij).powi(2)
                })
                .sum::<f64>()
                / t;
            pi_hat += var;
        }
    }

    let gamma_hat: f64 = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| (daily_target[(i, j)] - daily_cov[(i, j)]).powi(2))
                .sum::<f64>()
        })
        .sum();

    if gamma_hat < f64::EPSILON {
        return 0.0;
    }
    (pi_hat / t) / gamma_hat
}

/// Whether `m` is (numerically) positive definite, via Cholesky factorization.
pub fn is_positive_definite(m: &DMatrix<f64>) -> bool {
    nalgebra::linalg::Cholesky::new(m.clone()).is_some()
}
