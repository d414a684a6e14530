//! Closed-form Black-Litterman posterior combination, §4.4 step 3.

use nalgebra::{DMatrix, DVector};

/// `mu_bl = [(tau*Sigma)^-1 + Omega^-1]^-1 * [(tau*Sigma)^-1*pi + Omega^-1*q]`.
///
/// Returns `None` if either `tau*Sigma` or `Omega` (or their combination) is
/// singular; the caller falls back to the prior `pi` in that case.
pub fn black_litterman_posterior(
    pi: &DVector<f64>,
    sigma: &DMatrix<f64>,
    tau: f64,
    q: &DMatrix<f64>,
    omega: &DMatrix<f64>,
) -> Option<DVector<f64>> {
    let tau_sigma = sigma * tau;
    let tau_sigma_inv = tau_sigma.try_inverse()?;
    let omega_inv = omega.clone().try_inverse()?;

    let combined_precision = &tau_sigma_inv + &omega_inv;
    let combined_cov = combined_precision.try_inverse()?;

    let q_vec = DVector::from_column_slice(q.as_slice());
    let rhs = &tau_sigma_inv * pi + &omega_inv * &q_vec;

    Some(combined_cov * rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_uncertainty_pulls_posterior_to_views() {
        let sigma = DMatrix::<f64>::identity(2, 2) * 0.04;
        let pi = DVector::from_vec(vec![0.05, 0.05]);
        let q = DMatrix::from_vec(2, 1, vec![0.10, 0.10]);
        // Tiny Omega entries => views dominate the posterior.
        let omega = DMatrix::<f64>::identity(2, 2) * 1e-8;

        let posterior = black_litterman_posterior(&pi, &sigma, 0.05, &q, &omega).unwrap();
        assert!((posterior[0] - 0.10).abs() < 1e-3);
        assert!((posterior[1] - 0.10).abs() < 1e-3);
    }

    #[test]
    fn huge_uncertainty_pulls_posterior_to_prior() {
        let sigma = DMatrix::<f64>::identity(2, 2) * 0.04;
        let pi = DVector::from_vec(vec![0.05, 0.07]);
        let q = DMatrix::from_vec(2, 1, vec![0.50, -0.50]);
        let omega = DMatrix::<f64>::identity(2, 2) * 1e8;

        let posterior = black_litterman_posterior(&pi, &sigma, 0.05, &q, &omega).unwrap();
        assert!((posterior[0] - 0.05).abs() < 1e-3);
        assert!((posterior[1] - 0.07).abs() < 1e-3);
    }

    #[test]
    fn singular_omega_returns_none() {
        let sigma = DMatrix::<f64>::identity(2, 2) * 0.04;
        let pi = DVector::from_vec(vec![0.05, 0.05]);
        let q = DMatrix::from_vec(2, 1, vec![0.1, 0.1]);
        let omega = DMatrix::<f64>::zeros(2, 2);
        assert!(black_litterman_posterior(&pi, &sigma, 0.05, &q, &omega).is_none());
    }
}
