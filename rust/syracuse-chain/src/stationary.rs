//! Stationary distribution π of the collapsed kernel.
//!
//! π solves (Pᵗ − I)·π = 0 with Σπ = 1. The homogeneous system has rank
//! n − 1, so its last row is replaced by the all-ones normalization row and
//! the resulting full-rank system is solved directly. π is not assumed to be
//! uniform.
//!
//! Negative entries beyond [`NEGATIVITY_TOLERANCE`] mean the kernel is wrong
//! and are reported, never clamped.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde::Serialize;

use crate::arith::v3;
use crate::error::{ChainError, ChainResult};
use crate::group::UnitGroup;
use crate::kernel::{ExactKernel, TransitionKernel};
use crate::linalg::{self, SolveMethod, DEFAULT_PIVOT_TOLERANCE};

/// Bound on ‖πᵗP − πᵗ‖∞.
pub const STATIONARY_TOLERANCE: f64 = 1e-6;

/// Entries of π below −NEGATIVITY_TOLERANCE are an error.
pub const NEGATIVITY_TOLERANCE: f64 = 1e-10;

/// Stationary distribution of a kernel, indexed by state.
#[derive(Debug, Clone, Serialize)]
pub struct StationaryDistribution {
    pub pi: Vec<f64>,
    pub method: SolveMethod,
    /// ‖πᵗP − πᵗ‖∞ of the float solution.
    pub residual: f64,
    /// Exact π when the kernel was exact.
    #[serde(skip)]
    pub exact: Option<Vec<BigRational>>,
}

/// Tolerances for the float stationary solve. The exact path ignores the
/// pivot tolerance.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StationaryOptions {
    pub residual_tolerance: f64,
    pub pivot_tolerance: f64,
}

impl Default for StationaryOptions {
    fn default() -> Self {
        Self {
            residual_tolerance: STATIONARY_TOLERANCE,
            pivot_tolerance: DEFAULT_PIVOT_TOLERANCE,
        }
    }
}

/// Solve for π. Uses exact elimination when the kernel carries exact weights.
pub fn solve_stationary(kernel: &TransitionKernel) -> ChainResult<StationaryDistribution> {
    solve_stationary_with(kernel, &StationaryOptions::default())
}

pub fn solve_stationary_with(
    kernel: &TransitionKernel,
    options: &StationaryOptions,
) -> ChainResult<StationaryDistribution> {
    match &kernel.exact {
        Some(exact) => solve_exact(kernel, exact, options),
        None => solve_float(kernel, options),
    }
}

fn solve_float(
    kernel: &TransitionKernel,
    options: &StationaryOptions,
) -> ChainResult<StationaryDistribution> {
    let n = kernel.n();
    let mut a = linalg::transpose(&kernel.probabilities);
    for (i, row) in a.iter_mut().enumerate() {
        row[i] -= 1.0;
    }
    a[n - 1] = vec![1.0; n];
    let mut b = vec![0.0f64; n];
    b[n - 1] = 1.0;

    let sol = linalg::solve(&a, &b, options.pivot_tolerance)?;
    if sol.method == SolveMethod::LeastSquares {
        log::warn!("stationary solve for k={} used least squares", kernel.k);
    }
    finalize(kernel, sol.x, sol.method, None, options)
}

fn solve_exact(
    kernel: &TransitionKernel,
    exact: &ExactKernel,
    options: &StationaryOptions,
) -> ChainResult<StationaryDistribution> {
    let n = kernel.n();
    let d = BigInt::from(exact.denominator.clone());

    // D·(Pᵗ − I) has integer entries and the same null space.
    let mut a: Vec<Vec<BigRational>> = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    let mut v = BigInt::from(exact.numerators[j][i].clone());
                    if i == j {
                        v -= &d;
                    }
                    BigRational::from_integer(v)
                })
                .collect()
        })
        .collect();
    a[n - 1] = vec![BigRational::one(); n];
    let mut b = vec![BigRational::zero(); n];
    b[n - 1] = BigRational::one();

    let pi_exact = linalg::solve_exact(a, b)?;
    if let Some((index, v)) = pi_exact.iter().enumerate().find(|(_, v)| v.is_negative()) {
        return Err(ChainError::NegativeProbability {
            index,
            value: v.to_f64().unwrap_or(f64::NEG_INFINITY),
        });
    }
    let pi: Vec<f64> = pi_exact.iter().map(|v| v.to_f64().unwrap_or(0.0)).collect();
    finalize(kernel, pi, SolveMethod::ExactRational, Some(pi_exact), options)
}

/// Re-normalize, check sign and stationarity.
fn finalize(
    kernel: &TransitionKernel,
    mut pi: Vec<f64>,
    method: SolveMethod,
    exact: Option<Vec<BigRational>>,
    options: &StationaryOptions,
) -> ChainResult<StationaryDistribution> {
    if let Some((index, &value)) = pi
        .iter()
        .enumerate()
        .find(|&(_, &v)| v < -NEGATIVITY_TOLERANCE || !v.is_finite())
    {
        return Err(ChainError::NegativeProbability { index, value });
    }
    let total: f64 = pi.iter().sum();
    for v in &mut pi {
        *v /= total;
    }

    let residual = stationarity_residual(kernel, &pi);
    if residual.is_nan() || residual > options.residual_tolerance {
        return Err(ChainError::StationaryResidual {
            residual,
            tolerance: options.residual_tolerance,
        });
    }
    log::debug!(
        "stationary distribution for k={} via {method:?}: residual {residual:.2e}",
        kernel.k
    );

    Ok(StationaryDistribution {
        pi,
        method,
        residual,
        exact,
    })
}

/// ‖πᵗP − πᵗ‖∞
pub fn stationarity_residual(kernel: &TransitionKernel, pi: &[f64]) -> f64 {
    let pi_p = kernel.apply_left(pi);
    let diff: Vec<f64> = pi_p.iter().zip(pi).map(|(a, b)| a - b).collect();
    linalg::inf_norm(&diff)
}

// ---------------------------------------------------------------------------
// Structure of π
// ---------------------------------------------------------------------------

/// Where π puts its mass, grouped by proximity of x to −1 (v₃(x+1)).
#[derive(Debug, Clone, Serialize)]
pub struct StationaryProfile {
    pub argmax_state: u64,
    pub max_mass: f64,
    pub argmin_state: u64,
    pub min_mass: f64,
    /// TV(π, uniform).
    pub tv_from_uniform: f64,
    /// (v₃(x+1), number of states, total π-mass), ascending in valuation.
    pub mass_by_v3: Vec<(u32, usize, f64)>,
}

pub fn profile(group: &UnitGroup, pi: &[f64]) -> StationaryProfile {
    let n = pi.len();
    let uniform = 1.0 / n as f64;
    let (imax, imin) = (0..n).fold((0, 0), |(hi, lo), i| {
        (
            if pi[i] > pi[hi] { i } else { hi },
            if pi[i] < pi[lo] { i } else { lo },
        )
    });

    let mut classes: Vec<(u32, usize, f64)> = Vec::new();
    for (i, &x) in group.states.iter().enumerate() {
        let v = v3(x + 1);
        match classes.iter_mut().find(|c| c.0 == v) {
            Some(c) => {
                c.1 += 1;
                c.2 += pi[i];
            }
            None => classes.push((v, 1, pi[i])),
        }
    }
    classes.sort_by_key(|c| c.0);

    StationaryProfile {
        argmax_state: group.states[imax],
        max_mass: pi[imax],
        argmin_state: group.states[imin],
        min_mass: pi[imin],
        tv_from_uniform: 0.5 * pi.iter().map(|p| (p - uniform).abs()).sum::<f64>(),
        mass_by_v3: classes,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{build_kernel, Arithmetic, NumericPolicy};

    fn stationary(k: u32, arithmetic: Arithmetic) -> (TransitionKernel, StationaryDistribution) {
        let g = UnitGroup::new(k).unwrap();
        let p = build_kernel(&g, arithmetic, &NumericPolicy::default()).unwrap();
        let pi = solve_stationary(&p).unwrap();
        (p, pi)
    }

    #[test]
    fn test_k2_fixed_point_brute_force() {
        let (p, st) = stationary(2, Arithmetic::Exact);
        assert_eq!(st.method, SolveMethod::ExactRational);
        let n = p.n();
        assert_eq!(n, 6);
        assert!((st.pi.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        for j in 0..n {
            let next: f64 = (0..n).map(|i| st.pi[i] * p.probabilities[i][j]).sum();
            assert!((next - st.pi[j]).abs() < 1e-9, "state {j}");
        }
    }

    #[test]
    fn test_exact_pi_is_exact_fixed_point() {
        let (p, st) = stationary(3, Arithmetic::Exact);
        let exact = p.exact.as_ref().unwrap();
        let pi = st.exact.as_ref().unwrap();
        let n = p.n();
        let total: BigRational = pi.iter().cloned().sum();
        assert_eq!(total, BigRational::one());
        for j in 0..n {
            let next: BigRational = (0..n).map(|i| &pi[i] * exact.entry(i, j)).sum();
            assert_eq!(next, pi[j]);
        }
    }

    #[test]
    fn test_float_stationary() {
        for k in 1..=5 {
            let (p, st) = stationary(k, Arithmetic::Float);
            assert_eq!(st.method, SolveMethod::Direct);
            assert!(stationarity_residual(&p, &st.pi) < 1e-6);
            assert!((st.pi.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            assert!(st.pi.iter().all(|&v| v > -NEGATIVITY_TOLERANCE));
        }
    }

    #[test]
    fn test_least_squares_fallback_still_stationary() {
        // A relative pivot tolerance above 1 rejects every LU pivot.
        let forced = StationaryOptions {
            pivot_tolerance: 2.0,
            ..StationaryOptions::default()
        };
        for k in [2, 3, 4] {
            let g = UnitGroup::new(k).unwrap();
            let p = build_kernel(&g, Arithmetic::Float, &NumericPolicy::default()).unwrap();
            let direct = solve_stationary(&p).unwrap();
            let lsq = solve_stationary_with(&p, &forced).unwrap();
            assert_eq!(lsq.method, SolveMethod::LeastSquares);
            assert!(lsq.residual < 1e-6, "k={k}: residual {}", lsq.residual);
            assert!((lsq.pi.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            for (a, b) in lsq.pi.iter().zip(&direct.pi) {
                assert!((a - b).abs() < 1e-8, "k={k}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_stationarity_residual_reports_nan() {
        let (p, st) = stationary(2, Arithmetic::Float);
        let mut pi = st.pi;
        pi[3] = f64::NAN;
        assert!(stationarity_residual(&p, &pi).is_nan());
    }

    #[test]
    fn test_exact_and_float_modes_agree() {
        for k in 2..=4 {
            let (_, e) = stationary(k, Arithmetic::Exact);
            let (_, f) = stationary(k, Arithmetic::Float);
            for (a, b) in e.pi.iter().zip(&f.pi) {
                assert!((a - b).abs() < 1e-10, "k={k}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_profile_partitions_mass() {
        let (_, st) = stationary(4, Arithmetic::Float);
        let g = UnitGroup::new(4).unwrap();
        let prof = profile(&g, &st.pi);
        let mass: f64 = prof.mass_by_v3.iter().map(|c| c.2).sum();
        let count: usize = prof.mass_by_v3.iter().map(|c| c.1).sum();
        assert!((mass - 1.0).abs() < 1e-12);
        assert_eq!(count, 54);
        assert!(prof.max_mass >= prof.min_mass);
        // Only x ≡ 2 (mod 3) has v₃(x+1) ≥ 1; the top class is x = 80 alone.
        assert_eq!(prof.mass_by_v3.last().map(|c| (c.0, c.1)), Some((4, 1)));
    }
}
