//! Collapsed transition kernel of the idealized random Syracuse step.
//!
//! The model step is X ↦ (3X + 1)·2^{−A} (mod 3^k) with P(A = m) = 2^{−m}.
//! Because 2 has order r = n = φ(3^k) mod 3^k, only A mod r matters, and the
//! geometric tail collapses onto m ∈ [1, r] with weight
//!
//!   w_m = Σ_{j≥0} 2^{−(m+jr)} = 2^{r−m} / (2^r − 1).
//!
//! For fixed x the destinations c·2^{−m} (c = 3x+1) run over every unit
//! exactly once as m runs over [1, r], so each row is a permutation of the
//! weight vector and sums to 1.
//!
//! Exact weights share the denominator 2^r − 1, so the exact kernel stores
//! integer numerators only. 2^r has r = 2·3^{k−1} bits, which is why exact
//! construction is gated by [`NumericPolicy`].

use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use num_traits::{One, ToPrimitive, Zero};
use serde::Serialize;

use crate::arith::{mod_inv, pow3};
use crate::error::{ChainError, ChainResult};
use crate::group::{UnitGroup, MAX_LEVEL};

/// Row sums of float kernels must be within this distance of 1.
pub const ROW_SUM_TOLERANCE: f64 = 1e-9;

/// Power-iteration steps behind [`TransitionKernel::subdominant_modulus`].
pub const MIXING_ITERATIONS: usize = 400;

/// Largest k for which [`Arithmetic::Auto`] picks exact arithmetic.
pub const DEFAULT_EXACT_MAX_K: u32 = 4;

// ---------------------------------------------------------------------------
// Numeric strategy
// ---------------------------------------------------------------------------

/// Arithmetic used to build (and later solve) the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Arithmetic {
    /// Rational weights with common denominator 2^r − 1.
    Exact,
    /// IEEE-754 weights.
    Float,
    /// Exact up to `NumericPolicy::exact_max_k`, float above.
    Auto,
}

/// Crossover between exact and floating-point arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NumericPolicy {
    pub exact_max_k: u32,
}

impl Default for NumericPolicy {
    fn default() -> Self {
        Self {
            exact_max_k: DEFAULT_EXACT_MAX_K,
        }
    }
}

impl NumericPolicy {
    /// Resolve `Auto` for level k. Explicit choices pass through unchanged.
    pub fn resolve(&self, arithmetic: Arithmetic, k: u32) -> Arithmetic {
        match arithmetic {
            Arithmetic::Auto if k <= self.exact_max_k => Arithmetic::Exact,
            Arithmetic::Auto => Arithmetic::Float,
            explicit => explicit,
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel types
// ---------------------------------------------------------------------------

/// Exact kernel: `P[i][j] = numerators[i][j] / denominator`.
#[derive(Debug, Clone)]
pub struct ExactKernel {
    /// 2^r − 1
    pub denominator: BigUint,
    pub numerators: Vec<Vec<BigUint>>,
}

impl ExactKernel {
    /// P[i][j] as a reduced rational.
    pub fn entry(&self, i: usize, j: usize) -> BigRational {
        BigRational::new(
            BigInt::from(self.numerators[i][j].clone()),
            BigInt::from(self.denominator.clone()),
        )
    }
}

/// n×n row-stochastic transition matrix over the states of G_k.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionKernel {
    pub k: u32,
    /// Residue-cycle length r = ord_{3^k}(2) = n.
    pub cycle_length: usize,
    pub arithmetic: Arithmetic,
    /// Float view of the kernel; always populated.
    pub probabilities: Vec<Vec<f64>>,
    /// Exact view, present when built with exact arithmetic.
    #[serde(skip)]
    pub exact: Option<ExactKernel>,
    /// max_i |Σ_j P[i][j] − 1| of the float view.
    pub max_row_error: f64,
}

impl TransitionKernel {
    #[inline]
    pub fn n(&self) -> usize {
        self.probabilities.len()
    }

    /// (P·v)(i) = Σ_j P[i][j]·v[j]
    pub fn apply(&self, v: &[f64]) -> Vec<f64> {
        crate::linalg::matvec(&self.probabilities, v)
    }

    /// (vᵗ·P)(j) = Σ_i v[i]·P[i][j]
    pub fn apply_left(&self, v: &[f64]) -> Vec<f64> {
        crate::linalg::vecmat(v, &self.probabilities)
    }

    pub fn is_exact(&self) -> bool {
        self.exact.is_some()
    }

    /// Wrap an externally estimated matrix (e.g. transition counts) as a
    /// float kernel over the states of G_k. Rows are checked like a built
    /// kernel's.
    pub fn from_probabilities(k: u32, probabilities: Vec<Vec<f64>>) -> ChainResult<Self> {
        if k == 0 || k > MAX_LEVEL {
            return Err(ChainError::InvalidLevel { k, max: MAX_LEVEL });
        }
        let n = 2 * pow3(k - 1) as usize;
        for len in std::iter::once(probabilities.len()).chain(probabilities.iter().map(Vec::len)) {
            if len != n {
                return Err(ChainError::DimensionMismatch { expected: n, got: len });
            }
        }
        for row in &probabilities {
            crate::linalg::ensure_finite("transition probability", row)?;
        }
        let max_row_error = verify_rows(&probabilities)?;
        Ok(TransitionKernel {
            k,
            cycle_length: n,
            arithmetic: Arithmetic::Float,
            probabilities,
            exact: None,
            max_row_error,
        })
    }

    /// |λ₂| by deflated power iteration; the chain mixes like |λ₂|^t.
    pub fn subdominant_modulus(&self, pi: &[f64]) -> f64 {
        crate::linalg::subdominant_modulus(&self.probabilities, pi, MIXING_ITERATIONS, 0x5eed)
    }
}

// ---------------------------------------------------------------------------
// Weights and idealized drift
// ---------------------------------------------------------------------------

/// Collapsed weights w_m = 2^{−m}/(1 − 2^{−r}) for m = 1 … r (index m−1).
///
/// Written in this form so that large r does not overflow; weights past
/// m ≈ 1074 underflow to zero, far below any tolerance used here.
pub fn collapsed_weights(r: usize) -> Vec<f64> {
    let tail = 1.0 - 0.5f64.powi(r.min(i32::MAX as usize) as i32);
    let mut w = Vec::with_capacity(r);
    let mut p = 1.0f64;
    for _ in 0..r {
        p *= 0.5;
        w.push(p / tail);
    }
    w
}

/// Constant drift of the idealized collapsed model:
/// g = ln 3 − ln 2 · Σ_m m·w_m.
///
/// Approaches ln(3/4) as r → ∞ (E[A] = 2 for the uncollapsed geometric law).
pub fn theoretical_drift(r: usize) -> f64 {
    let mean_a: f64 = collapsed_weights(r)
        .iter()
        .enumerate()
        .map(|(i, w)| (i + 1) as f64 * w)
        .sum();
    3f64.ln() - mean_a * 2f64.ln()
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Destination state indices: `dest[i][m−1]` = idx(c_i · 2^{−m} mod 3^k).
fn destinations(group: &UnitGroup) -> ChainResult<Vec<Vec<usize>>> {
    let modulus = group.modulus;
    let r = group.order();
    let inv2 = mod_inv(2, modulus).ok_or_else(|| {
        ChainError::InvalidConfig(format!("2 is not invertible mod {modulus}"))
    })?;

    group
        .states
        .iter()
        .map(|&x| {
            let c = ((3 * x as u128 + 1) % modulus as u128) as u64;
            let mut cur = c;
            (0..r)
                .map(|_| {
                    cur = group.mul(cur, inv2);
                    group.index_of(cur).ok_or_else(|| {
                        ChainError::InvalidConfig(format!(
                            "destination {cur} of state {x} is not a unit mod {modulus}"
                        ))
                    })
                })
                .collect::<ChainResult<Vec<usize>>>()
        })
        .collect()
}

/// Build the collapsed kernel P for `group.k`.
///
/// Row sums are verified after construction: exactly for rational weights,
/// within [`ROW_SUM_TOLERANCE`] for float weights.
pub fn build_kernel(
    group: &UnitGroup,
    arithmetic: Arithmetic,
    policy: &NumericPolicy,
) -> ChainResult<TransitionKernel> {
    let arithmetic = policy.resolve(arithmetic, group.k);
    let n = group.order();
    let r = n;
    let dest = destinations(group)?;

    let (probabilities, exact) = match arithmetic {
        Arithmetic::Exact => {
            if group.k > policy.exact_max_k {
                log::warn!(
                    "exact kernel requested at k={} above policy limit {}; 2^{r} arithmetic",
                    group.k,
                    policy.exact_max_k
                );
            }
            let exact = build_exact(&dest, r)?;
            let probabilities = exact_to_float(&exact);
            (probabilities, Some(exact))
        }
        _ => {
            let w = collapsed_weights(r);
            let mut p = vec![vec![0.0f64; n]; n];
            for (i, row) in dest.iter().enumerate() {
                for (m_idx, &j) in row.iter().enumerate() {
                    p[i][j] += w[m_idx];
                }
            }
            (p, None)
        }
    };

    let max_row_error = verify_rows(&probabilities)?;
    log::debug!(
        "built {arithmetic:?} kernel for k={} ({n} states), max row error {max_row_error:.2e}",
        group.k
    );

    Ok(TransitionKernel {
        k: group.k,
        cycle_length: r,
        arithmetic,
        probabilities,
        exact,
        max_row_error,
    })
}

fn build_exact(dest: &[Vec<usize>], r: usize) -> ChainResult<ExactKernel> {
    let n = dest.len();
    let denominator = (BigUint::one() << r) - BigUint::one();
    let weights: Vec<BigUint> = (1..=r).map(|m| BigUint::one() << (r - m)).collect();

    let mut numerators = vec![vec![BigUint::zero(); n]; n];
    for (i, row) in dest.iter().enumerate() {
        for (m_idx, &j) in row.iter().enumerate() {
            numerators[i][j] += &weights[m_idx];
        }
    }

    for (i, row) in numerators.iter().enumerate() {
        let sum: BigUint = row.iter().sum();
        if sum != denominator {
            let approx = BigRational::new(BigInt::from(sum), BigInt::from(denominator.clone()))
                .to_f64()
                .unwrap_or(f64::NAN);
            return Err(ChainError::RowSum { row: i, sum: approx });
        }
    }

    Ok(ExactKernel {
        denominator,
        numerators,
    })
}

fn exact_to_float(exact: &ExactKernel) -> Vec<Vec<f64>> {
    let n = exact.numerators.len();
    (0..n)
        .map(|i| {
            (0..n)
                .map(|j| exact.entry(i, j).to_f64().unwrap_or(0.0))
                .collect()
        })
        .collect()
}

/// Check non-negativity and row sums; returns the worst row deviation.
pub fn verify_rows(p: &[Vec<f64>]) -> ChainResult<f64> {
    let mut worst = 0.0f64;
    for (i, row) in p.iter().enumerate() {
        if let Some(&v) = row.iter().find(|&&v| v < 0.0) {
            return Err(ChainError::NegativeProbability { index: i, value: v });
        }
        let sum: f64 = row.iter().sum();
        let err = (sum - 1.0).abs();
        if err > ROW_SUM_TOLERANCE {
            return Err(ChainError::RowSum { row: i, sum });
        }
        worst = worst.max(err);
    }
    Ok(worst)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
