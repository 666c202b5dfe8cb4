//! Poisson drift correction.
//!
//! Given a per-state drift g, find a potential ψ with πᵗψ = 0 such that
//!
//!   g(x) + (Pψ)(x) − ψ(x) = ḡ   for every state x,   ḡ = Σ π(x)g(x).
//!
//! Equivalently (I − P)ψ = g − ḡ·1. I − P is singular (P1 = 1), so the solve
//! uses the regularised matrix A = I − P + 1·πᵗ, which is invertible for an
//! irreducible chain and has the same solution once ψ is centered.
//!
//! The Poisson residual ‖(I − P)ψ − (g − ḡ·1)‖∞ is the correctness check.
//! With an exact solve the corrected drift equals ḡ everywhere; any spread in
//! g_corrected measures how inconsistent (P, π, g) are, not a new effect.

use serde::Serialize;

use crate::error::{ChainError, ChainResult};
use crate::kernel::TransitionKernel;
use crate::linalg::{self, SolveMethod, DEFAULT_PIVOT_TOLERANCE};

/// Tolerances for the Poisson solve.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoissonOptions {
    /// Maximum accepted Poisson residual.
    pub residual_tolerance: f64,
    pub pivot_tolerance: f64,
}

impl Default for PoissonOptions {
    fn default() -> Self {
        Self {
            residual_tolerance: 1e-6,
            pivot_tolerance: DEFAULT_PIVOT_TOLERANCE,
        }
    }
}

/// Solution of the Poisson equation plus diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PoissonSolution {
    /// Centered potential (πᵗψ = 0).
    pub psi: Vec<f64>,
    /// g + Pψ − ψ
    pub corrected_drift: Vec<f64>,
    /// ḡ = Σ π(x)g(x)
    pub global_drift: f64,
    pub method: SolveMethod,
    /// ‖(I − P)ψ − (g − ḡ·1)‖∞
    pub residual: f64,
    /// |πᵗψ| after centering.
    pub centering_error: f64,
    /// max_x |g_corrected(x) − ḡ|
    pub corrected_spread: f64,
    pub worst_raw_drift: f64,
    pub worst_corrected_drift: f64,
    /// max ψ − min ψ
    pub psi_range: f64,
    /// States whose corrected drift is still positive.
    pub positive_states: usize,
    /// π-mass of those states.
    pub positive_mass: f64,
}

impl PoissonSolution {
    /// Every corrected drift is strictly negative, i.e. log(n) + ψ(n mod 3^k)
    /// decreases in expectation from every residue class.
    pub fn is_uniformly_negative(&self) -> bool {
        self.worst_corrected_drift < 0.0
    }
}

/// Solve for ψ with default tolerances.
pub fn solve_poisson(
    kernel: &TransitionKernel,
    pi: &[f64],
    drift: &[f64],
) -> ChainResult<PoissonSolution> {
    solve_poisson_with(kernel, pi, drift, &PoissonOptions::default())
}

pub fn solve_poisson_with(
    kernel: &TransitionKernel,
    pi: &[f64],
    drift: &[f64],
    options: &PoissonOptions,
) -> ChainResult<PoissonSolution> {
    let n = kernel.n();
    for len in [pi.len(), drift.len()] {
        if len != n {
            return Err(ChainError::DimensionMismatch {
                expected: n,
                got: len,
            });
        }
    }
    linalg::ensure_finite("stationary probability", pi)?;
    linalg::ensure_finite("drift", drift)?;

    let global_drift = linalg::dot(pi, drift);
    let rhs: Vec<f64> = drift.iter().map(|g| g - global_drift).collect();

    // A = I − P + 1·πᵗ
    let a: Vec<Vec<f64>> = kernel
        .probabilities
        .iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .zip(pi)
                .enumerate()
                .map(|(j, (p, w))| if i == j { 1.0 } else { 0.0 } - p + w)
                .collect()
        })
        .collect();

    let sol = linalg::solve(&a, &rhs, options.pivot_tolerance)?;
    let mut psi = sol.x;

    // Center regardless of which solver ran.
    let shift = linalg::dot(pi, &psi);
    for v in &mut psi {
        *v -= shift;
    }
    let centering_error = linalg::dot(pi, &psi).abs();

    let p_psi = kernel.apply(&psi);
    let defect: Vec<f64> = psi
        .iter()
        .zip(&p_psi)
        .zip(&rhs)
        .map(|((s, ps), r)| s - ps - r)
        .collect();
    let residual = linalg::inf_norm(&defect);
    if residual.is_nan() || residual > options.residual_tolerance {
        return Err(ChainError::PoissonResidual {
            residual,
            tolerance: options.residual_tolerance,
        });
    }

    let corrected_drift: Vec<f64> = drift
        .iter()
        .zip(&p_psi)
        .zip(&psi)
        .map(|((g, ps), s)| g + ps - s)
        .collect();

    let max = |v: &[f64]| v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = |v: &[f64]| v.iter().cloned().fold(f64::INFINITY, f64::min);

    let spread: Vec<f64> = corrected_drift.iter().map(|c| c - global_drift).collect();
    let corrected_spread = linalg::inf_norm(&spread);
    let (positive_states, positive_mass) = corrected_drift
        .iter()
        .zip(pi)
        .filter(|(c, _)| **c > 0.0)
        .fold((0usize, 0.0f64), |(cnt, mass), (_, w)| (cnt + 1, mass + w));

    if sol.method == SolveMethod::LeastSquares {
        log::warn!("Poisson solve for k={} used least squares", kernel.k);
    }
    log::debug!(
        "Poisson k={}: ḡ={global_drift:.6}, residual {residual:.2e}, spread {corrected_spread:.2e}",
        kernel.k
    );

    Ok(PoissonSolution {
        worst_raw_drift: max(drift),
        worst_corrected_drift: max(&corrected_drift),
        psi_range: max(&psi) - min(&psi),
        psi,
        corrected_drift,
        global_drift,
        method: sol.method,
        residual,
        centering_error,
        corrected_spread,
        positive_states,
        positive_mass,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::UnitGroup;
    use crate::kernel::{build_kernel, theoretical_drift, Arithmetic, NumericPolicy};
    use crate::stationary::solve_stationary;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn level(k: u32) -> (TransitionKernel, Vec<f64>) {
        let g = UnitGroup::new(k).unwrap();
        let p = build_kernel(&g, Arithmetic::Float, &NumericPolicy::default()).unwrap();
        let pi = solve_stationary(&p).unwrap().pi;
        (p, pi)
    }

    #[test]
    fn test_constant_drift_gives_zero_potential() {
        let (p, pi) = level(3);
        let g0 = theoretical_drift(p.cycle_length);
        let drift = vec![g0; p.n()];
        let sol = solve_poisson(&p, &pi, &drift).unwrap();
        assert!((sol.global_drift - g0).abs() < 1e-12);
        assert!(sol.psi.iter().all(|v| v.abs() < 1e-10));
        assert!(sol.corrected_spread < 1e-10);
        assert!(sol.is_uniformly_negative());
    }

    #[test]
    fn test_random_drift_residual_and_centering() {
        let mut rng = StdRng::seed_from_u64(0xd21f7);
        for k in 2..=5 {
            let (p, pi) = level(k);
            let drift: Vec<f64> = (0..p.n()).map(|_| rng.gen_range(-1.0..0.5)).collect();
            let sol = solve_poisson(&p, &pi, &drift).unwrap();
            assert_eq!(sol.method, SolveMethod::Direct);
            assert!(sol.residual < 1e-6, "k={k}: residual {}", sol.residual);
            assert!(sol.centering_error < 1e-10);
            // Corrected drift is constant ḡ up to round-off.
            for c in &sol.corrected_drift {
                assert!((c - sol.global_drift).abs() < 1e-6);
            }
            assert_eq!(sol.positive_states == 0, sol.is_uniformly_negative());
        }
    }

    #[test]
    fn test_inconsistent_pi_is_rejected() {
        let (p, _) = level(3);
        let n = p.n();
        // A distribution that is not stationary for P.
        let mut bogus = vec![0.0; n];
        bogus[0] = 1.0;
        let drift: Vec<f64> = (0..n).map(|i| i as f64 * 0.01).collect();
        assert!(matches!(
            solve_poisson(&p, &bogus, &drift),
            Err(ChainError::PoissonResidual { .. })
        ));
    }

    #[test]
    fn test_least_squares_fallback_is_centered() {
        let mut rng = StdRng::seed_from_u64(0x15a);
        let forced = PoissonOptions {
            pivot_tolerance: 2.0,
            ..PoissonOptions::default()
        };
        for k in [3, 4] {
            let (p, pi) = level(k);
            let drift: Vec<f64> = (0..p.n()).map(|_| rng.gen_range(-1.0..0.5)).collect();
            let direct = solve_poisson(&p, &pi, &drift).unwrap();
            let lsq = solve_poisson_with(&p, &pi, &drift, &forced).unwrap();
            assert_eq!(lsq.method, SolveMethod::LeastSquares);
            assert!(lsq.residual < 1e-6, "k={k}: residual {}", lsq.residual);
            assert!(lsq.centering_error < 1e-10);
            for (a, b) in lsq.psi.iter().zip(&direct.psi) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_non_finite_inputs_are_rejected() {
        let (p, pi) = level(3);
        let mut drift = vec![-0.3; p.n()];
        drift[4] = f64::NAN;
        assert!(matches!(
            solve_poisson(&p, &pi, &drift),
            Err(ChainError::NonFinite { what: "drift", index: 4, .. })
        ));

        let mut bad_pi = pi.clone();
        bad_pi[0] = f64::INFINITY;
        assert!(matches!(
            solve_poisson(&p, &bad_pi, &vec![-0.3; p.n()]),
            Err(ChainError::NonFinite { what: "stationary probability", .. })
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let (p, pi) = level(2);
        assert!(matches!(
            solve_poisson(&p, &pi, &[0.0; 3]),
            Err(ChainError::DimensionMismatch { expected: 6, got: 3 })
        ));
    }
}
