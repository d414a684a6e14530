//! Constrained mean-variance optimization via projected gradient ascent,
//! §4.4 step 4.
//!
//! The feasible set is the simplex intersected with a per-asset box
//! (`0 <= w_i <= max_position_size`, `sum(w) = 1`). There is no closed form
//! for that intersection under an arbitrary objective, so each gradient step
//! is followed by a water-filling projection back onto it.

use nalgebra::{DMatrix, DVector};

const MAX_ITERS: usize = 2_000;
const LEARNING_RATE: f64 = 0.05;
const CONVERGENCE_TOL: f64 = 1e-10;
const PROJECTION_ITERS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Objective {
    MaxSharpe,
    MinVolatility,
    MaxQuadraticUtility(f64),
}

pub struct OptimizeOutcome {
    pub weights: DVector<f64>,
    /// Set when `max_position_size` could not admit any feasible portfolio
    /// over `n` assets (`n * max_position_size < 1`); the solver fell back
    /// to equal weight instead of running.
    pub degraded: bool,
}

pub fn optimize(
    mu: &DVector<f64>,
    sigma: &DMatrix<f64>,
    objective: Objective,
    max_position_size: f64,
) -> OptimizeOutcome {
    let n = mu.len();
    if (n as f64) * max_position_size < 1.0 - 1e-9 {
        return OptimizeOutcome {
            weights: equal_weight(n),
            degraded: true,
        };
    }

    let mut w = project_simplex_box(&equal_weight(n), max_position_size);
    let mut prev_obj = objective_value(mu, sigma, &w, objective);

    for _ in 0..MAX_ITERS {
        let grad = gradient(mu, sigma, &w, objective);
        let step = &w + grad * LEARNING_RATE;
        w = project_simplex_box(&step, max_position_size);

        let obj = objective_value(mu, sigma, &w, objective);
        if (obj - prev_obj).abs() < CONVERGENCE_TOL {
            prev_obj = obj;
            break;
        }
        prev_obj = obj;
    }
    let _ = prev_obj;

    OptimizeOutcome {
        weights: w,
        degraded: false,
    }
}

fn equal_weight(n: usize) -> DVector<f64> {
    DVector::from_element(n, 1.0 / n.max(1) as f64)
}

fn quadratic_form(sigma: &DMatrix<f64>, w: &DVector<f64>) -> f64 {
    (w.transpose() * sigma * w)[(0, 0)]
}

fn gradient(mu: &DVector<f64>, sigma: &DMatrix<f64>, w: &DVector<f64>, objective: Objective) -> DVector<f64> {
    match objective {
        Objective::MaxSharpe => {
            let expected_return = mu.dot(w);
            let variance = quadratic_form(sigma, w).max(1e-18);
            let vol = variance.sqrt();
            let sigma_w = sigma * w;
            mu / vol - &sigma_w * (expected_return / (vol * variance))
        }
        Objective::MinVolatility => -(sigma * w) * 2.0,
        Objective::MaxQuadraticUtility(gamma) => mu - (sigma * w) * gamma,
    }
}

fn objective_value(mu: &DVector<f64>, sigma: &DMatrix<f64>, w: &DVector<f64>, objective: Objective) -> f64 {
    let expected_return = mu.dot(w);
    let variance = quadratic_form(sigma, w);
    match objective {
        Objective::MaxSharpe => {
            let vol = variance.max(0.0).sqrt();
            if vol > f64::EPSILON {
                expected_return / vol
            } else {
                0.0
            }
        }
        Objective::MinVolatility => -variance,
        Objective::MaxQuadraticUtility(gamma) => expected_return - 0.5 * gamma * variance,
    }
}

/// Projects `v` onto `{w : sum(w) = 1, 0 <= w_i <= cap}` by clipping to the
/// box then redistributing the residual mass across assets not yet
/// saturated, iterating until the residual is negligible or assets run out.
fn project_simplex_box(v: &DVector<f64>, cap: f64) -> DVector<f64> {
    let n = v.len();
    let mut w: Vec<f64> = v.iter().map(|x| x.clamp(0.0, cap)).collect();

    for _ in 0..PROJECTION_ITERS {
        let sum: f64 = w.iter().sum();
        let residual = 1.0 - sum;
        if residual.abs() < 1e-12 {
            break;
        }

        let free: Vec<usize> = (0..n)
            .filter(|&i| {
                if residual > 0.0 {
                    w[i] < cap - 1e-15
                } else {
                    w[i] > 1e-15
                }
            })
            .collect();
        if free.is_empty() {
            break;
        }

        let share = residual / free.len() as f64;
        for &i in &free {
            w[i] = (w[i] + share).clamp(0.0, cap);
        }
    }

    DVector::from_vec(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn projection_always_lands_on_simplex_and_within_box(
            raw in proptest::collection::vec(-5.0f64..5.0, 2..12),
            cap_frac in 1.2f64..4.0,
        ) {
            let n = raw.len();
            let cap = (cap_frac / n as f64).min(1.0);
            let v = DVector::from_vec(raw);
            let w = project_simplex_box(&v, cap);
            prop_assert!((w.sum() - 1.0).abs() < 1e-6);
            for wi in w.iter() {
                prop_assert!(*wi >= -1e-9 && *wi <= cap + 1e-9);
            }
        }
    }

    #[test]
    fn cap_equal_to_one_over_n_forces_equal_weight() {
        let n = 4;
        let v = DVector::from_vec(vec![0.9, 0.05, 0.03, 0.02]);
        let w = project_simplex_box(&v, 1.0 / n as f64);
        for wi in w.iter() {
            assert!((wi - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn projection_respects_box_and_simplex() {
        let v = DVector::from_vec(vec![0.9, 0.4, -0.2, 0.1]);
        let w = project_simplex_box(&v, 0.5);
        assert!((w.sum() - 1.0).abs() < 1e-9);
        for wi in w.iter() {
            assert!(*wi >= -1e-9 && *wi <= 0.5 + 1e-9);
        }
    }

    #[test]
    fn infeasible_cap_triggers_degraded_equal_weight() {
        let mu = DVector::from_vec(vec![0.05, 0.06, 0.07, 0.08, 0.09]);
        let sigma = DMatrix::<f64>::identity(5, 5) * 0.04;
        // 5 assets, cap 0.1 => max total weight 0.5 < 1.
        let outcome = optimize(&mu, &sigma, Objective::MaxSharpe, 0.1);
        assert!(outcome.degraded);
        for wi in outcome.weights.iter() {
            assert!((wi - 0.2).abs() < 1e-9);
        }
    }

    #[test]
    fn min_volatility_prefers_lower_variance_asset() {
        let mu = DVector::from_vec(vec![0.05, 0.05]);
        let mut sigma = DMatrix::<f64>::zeros(2, 2);
        sigma[(0, 0)] = 0.01;
        sigma[(1, 1)] = 0.09;
        let outcome = optimize(&mu, &sigma, Objective::MinVolatility, 1.0);
        assert!(outcome.weights[0] > outcome.weights[1]);
    }
}
