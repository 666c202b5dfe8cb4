//! Dense linear algebra on `Vec<Vec<f64>>` and exact rational elimination.
//!
//! Matrices are small (n = φ(3^k) ≤ a few thousand), so everything is plain
//! row-major dense storage with no external BLAS.
//!
//! The float solver is LU with partial pivoting. When the smallest pivot is
//! negligible relative to the largest matrix entry the system is treated as
//! numerically singular and the solve falls back to regularised normal
//! equations; the caller sees which path ran through [`SolveMethod`].

use num_rational::BigRational;
use num_traits::{One, Zero};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::error::{ChainError, ChainResult};

/// Relative pivot size below which a system counts as numerically singular.
pub const DEFAULT_PIVOT_TOLERANCE: f64 = 1e-12;

/// Which algorithm produced a float solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolveMethod {
    /// LU with partial pivoting on a well-conditioned system.
    Direct,
    /// Regularised least squares after the direct solve was rejected.
    LeastSquares,
    /// Exact rational elimination, converted to f64 afterwards.
    ExactRational,
}

/// Float solution of A·x = b.
#[derive(Debug, Clone)]
pub struct Solution {
    pub x: Vec<f64>,
    pub method: SolveMethod,
    /// min |pivot| / max |a_ij| seen during elimination (0 if a pivot vanished).
    pub pivot_ratio: f64,
}

// ---------------------------------------------------------------------------
// Small vector/matrix helpers
// ---------------------------------------------------------------------------

/// w = M · v.
pub fn matvec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter()
        .map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
        .collect()
}

/// w = Mᵗ · v (i.e. the row vector vᵗM).
pub fn vecmat(v: &[f64], m: &[Vec<f64>]) -> Vec<f64> {
    let n = m.first().map_or(0, |r| r.len());
    let mut w = vec![0.0f64; n];
    for (vi, row) in v.iter().zip(m) {
        if *vi == 0.0 {
            continue;
        }
        for (wj, mij) in w.iter_mut().zip(row) {
            *wj += vi * mij;
        }
    }
    w
}

pub fn transpose(m: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let rows = m.len();
    let cols = m.first().map_or(0, |r| r.len());
    (0..cols)
        .map(|j| (0..rows).map(|i| m[i][j]).collect())
        .collect()
}

/// ‖v‖∞. NaN entries propagate instead of being skipped by `f64::max`.
pub fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0f64, |acc, x| {
        if acc.is_nan() || x.is_nan() {
            f64::NAN
        } else {
            acc.max(x.abs())
        }
    })
}

/// Reject NaN and ±∞ before they reach a solve or an invariant check.
pub fn ensure_finite(what: &'static str, v: &[f64]) -> ChainResult<()> {
    match v.iter().position(|x| !x.is_finite()) {
        Some(index) => Err(ChainError::NonFinite {
            what,
            index,
            value: v[index],
        }),
        None => Ok(()),
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ---------------------------------------------------------------------------
// Float solve
// ---------------------------------------------------------------------------

/// Solve the square system A·x = b.
///
/// Uses LU with partial pivoting; falls back to least squares (and logs a
/// warning) when a relative pivot drops below `pivot_tolerance`.
pub fn solve(a: &[Vec<f64>], b: &[f64], pivot_tolerance: f64) -> ChainResult<Solution> {
    let n = a.len();
    if b.len() != n {
        return Err(ChainError::DimensionMismatch {
            expected: n,
            got: b.len(),
        });
    }
    if let Some(row) = a.iter().find(|row| row.len() != n) {
        return Err(ChainError::DimensionMismatch {
            expected: n,
            got: row.len(),
        });
    }

    match lu_solve(a, b, pivot_tolerance) {
        Ok((x, pivot_ratio)) => Ok(Solution {
            x,
            method: SolveMethod::Direct,
            pivot_ratio,
        }),
        Err(pivot_ratio) => {
            log::warn!(
                "near-singular {n}x{n} system (pivot ratio {pivot_ratio:.3e}); \
                 falling back to least squares"
            );
            Ok(Solution {
                x: least_squares(a, b),
                method: SolveMethod::LeastSquares,
                pivot_ratio,
            })
        }
    }
}

/// LU with partial pivoting. Returns the solution and the pivot ratio, or
/// `Err(pivot_ratio)` if the system is numerically singular.
fn lu_solve(a: &[Vec<f64>], b: &[f64], pivot_tolerance: f64) -> Result<(Vec<f64>, f64), f64> {
    let n = a.len();
    let mut m: Vec<Vec<f64>> = a.to_vec();
    let mut rhs = b.to_vec();

    let scale = m
        .iter()
        .flat_map(|r| r.iter())
        .fold(0.0f64, |acc, x| acc.max(x.abs()));
    if scale == 0.0 {
        return Err(0.0);
    }
    let mut min_ratio = f64::INFINITY;

    for col in 0..n {
        let (piv, piv_abs) = (col..n)
            .map(|r| (r, m[r][col].abs()))
            .fold((col, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        let ratio = piv_abs / scale;
        min_ratio = min_ratio.min(ratio);
        if ratio < pivot_tolerance {
            return Err(min_ratio);
        }
        m.swap(col, piv);
        rhs.swap(col, piv);

        let pivot_row = m[col].clone();
        let pivot_val = pivot_row[col];
        for r in (col + 1)..n {
            let factor = m[r][col] / pivot_val;
            if factor == 0.0 {
                continue;
            }
            for (c, pv) in pivot_row.iter().enumerate().skip(col) {
                m[r][c] -= factor * pv;
            }
            rhs[r] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0f64; n];
    for i in (0..n).rev() {
        let s: f64 = ((i + 1)..n).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - s) / m[i][i];
    }
    Ok((x, min_ratio))
}

/// Least-squares solution of A·x ≈ b via (AᵗA + λI)·x = Aᵗb.
///
/// λ starts at 1e-12 · trace(AᵗA)/n and grows tenfold until the Cholesky
/// factorisation succeeds, which keeps the solution close to minimum-norm
/// on rank-deficient systems.
pub fn least_squares(a: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let at = transpose(a);
    let n = at.len();
    let mut ata = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in i..n {
            let v = dot(&at[i], &at[j]);
            ata[i][j] = v;
            ata[j][i] = v;
        }
    }
    let atb: Vec<f64> = at.iter().map(|col| dot(col, b)).collect();

    let trace: f64 = (0..n).map(|i| ata[i][i]).sum();
    let mut lambda = (trace / n.max(1) as f64).max(f64::MIN_POSITIVE) * 1e-12;
    loop {
        let mut reg = ata.clone();
        for (i, row) in reg.iter_mut().enumerate() {
            row[i] += lambda;
        }
        if let Some(x) = cholesky_solve(&reg, &atb) {
            return x;
        }
        lambda *= 10.0;
    }
}

/// Solve S·x = y for symmetric positive-definite S. `None` if S is not SPD.
fn cholesky_solve(s: &[Vec<f64>], y: &[f64]) -> Option<Vec<f64>> {
    let n = s.len();
    let mut l = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|p| l[i][p] * l[j][p]).sum();
            if i == j {
                let d = s[i][i] - sum;
                if d <= 0.0 || !d.is_finite() {
                    return None;
                }
                l[i][i] = d.sqrt();
            } else {
                l[i][j] = (s[i][j] - sum) / l[j][j];
            }
        }
    }
    // Forward: L·z = y
    let mut z = vec![0.0f64; n];
    for i in 0..n {
        let sum: f64 = (0..i).map(|p| l[i][p] * z[p]).sum();
        z[i] = (y[i] - sum) / l[i][i];
    }
    // Backward: Lᵗ·x = z
    let mut x = vec![0.0f64; n];
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|p| l[p][i] * x[p]).sum();
        x[i] = (z[i] - sum) / l[i][i];
    }
    Some(x)
}

// ---------------------------------------------------------------------------
// Mixing rate
// ---------------------------------------------------------------------------

/// |λ₂| of a row-stochastic P with stationary π.
///
/// Power iteration on the deflated map xᵗ ↦ xᵗP − (xᵗ1)·πᵗ, which sends the
/// eigenvalue 1 to 0 and keeps the rest of the spectrum. The estimate is the
/// geometric mean growth over the second half of the iterations, so a
/// complex pair λ₂, conj(λ₂) does not make it oscillate.
pub fn subdominant_modulus(p: &[Vec<f64>], pi: &[f64], iterations: usize, seed: u64) -> f64 {
    let n = p.len();
    if n < 2 || iterations == 0 {
        return 0.0;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() - 0.5).collect();
    let x0 = dot(&x, &x).sqrt();
    for v in &mut x {
        *v /= x0;
    }

    let window = (iterations / 2).max(1);
    let mut log_growth = 0.0f64;
    for it in 0..iterations {
        let mass: f64 = x.iter().sum();
        let mut y = vecmat(&x, p);
        for (yj, pj) in y.iter_mut().zip(pi) {
            *yj -= mass * pj;
        }
        let norm = dot(&y, &y).sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return 0.0;
        }
        if it >= iterations - window {
            log_growth += norm.ln();
        }
        x = y.into_iter().map(|v| v / norm).collect();
    }
    (log_growth / window as f64).exp()
}

// ---------------------------------------------------------------------------
// Exact solve
// ---------------------------------------------------------------------------

/// Gaussian elimination over ℚ. Singular systems are an error: there is no
/// least-squares analogue in exact arithmetic.
pub fn solve_exact(
    mut a: Vec<Vec<BigRational>>,
    mut b: Vec<BigRational>,
) -> ChainResult<Vec<BigRational>> {
    let n = a.len();
    if b.len() != n {
        return Err(ChainError::DimensionMismatch {
            expected: n,
            got: b.len(),
        });
    }

    for col in 0..n {
        let piv = (col..n)
            .find(|&r| !a[r][col].is_zero())
            .ok_or(ChainError::SingularSystem { column: col })?;
        a.swap(col, piv);
        b.swap(col, piv);

        let inv = BigRational::one() / &a[col][col];
        for c in col..n {
            a[col][c] = &a[col][c] * &inv;
        }
        b[col] = &b[col] * &inv;

        let pivot_row = a[col].clone();
        let pivot_rhs = b[col].clone();
        for r in 0..n {
            if r == col || a[r][col].is_zero() {
                continue;
            }
            let factor = a[r][col].clone();
            for c in col..n {
                let delta = &factor * &pivot_row[c];
                a[r][c] -= delta;
            }
            b[r] -= &factor * &pivot_rhs;
        }
    }
    Ok(b)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn rat(p: i64, q: i64) -> BigRational {
        BigRational::new(BigInt::from(p), BigInt::from(q))
    }

    #[test]
    fn test_direct_solve() {
        let a = vec![
            vec![4.0, 1.0, 0.0],
            vec![1.0, 3.0, 1.0],
            vec![0.0, 1.0, 2.0],
        ];
        let x_true = [1.0, -2.0, 3.0];
        let b = matvec(&a, &x_true);
        let sol = solve(&a, &b, DEFAULT_PIVOT_TOLERANCE).unwrap();
        assert_eq!(sol.method, SolveMethod::Direct);
        for (x, t) in sol.x.iter().zip(x_true) {
            assert!((x - t).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pivoting_needed() {
        let a = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let sol = solve(&a, &[2.0, 5.0], DEFAULT_PIVOT_TOLERANCE).unwrap();
        assert_eq!(sol.method, SolveMethod::Direct);
        assert!((sol.x[0] - 5.0).abs() < 1e-12 && (sol.x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_singular_falls_back_to_least_squares() {
        // Rank 1, consistent right-hand side.
        let a = vec![vec![1.0, 1.0], vec![2.0, 2.0]];
        let b = [2.0, 4.0];
        let sol = solve(&a, &b, DEFAULT_PIVOT_TOLERANCE).unwrap();
        assert_eq!(sol.method, SolveMethod::LeastSquares);
        let r = matvec(&a, &sol.x);
        assert!((r[0] - 2.0).abs() < 1e-6 && (r[1] - 4.0).abs() < 1e-6);
        // Minimum-norm solution is (1, 1).
        assert!((sol.x[0] - 1.0).abs() < 1e-4 && (sol.x[1] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!(matches!(
            solve(&a, &[1.0], DEFAULT_PIVOT_TOLERANCE),
            Err(ChainError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_vecmat_is_transpose_matvec() {
        let m = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let v = [1.0, -1.0, 2.0];
        assert_eq!(vecmat(&v, &m), matvec(&transpose(&m), &v));
    }

    #[test]
    fn test_inf_norm_propagates_nan() {
        assert_eq!(inf_norm(&[1.0, -3.0, 2.0]), 3.0);
        assert!(inf_norm(&[1.0, f64::NAN, 2.0]).is_nan());
        assert!(inf_norm(&[f64::NAN, 5.0]).is_nan());
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite("drift", &[0.0, -1.5]).is_ok());
        assert!(matches!(
            ensure_finite("drift", &[0.0, f64::INFINITY]),
            Err(ChainError::NonFinite { what: "drift", index: 1, .. })
        ));
    }

    #[test]
    fn test_subdominant_two_state() {
        // λ₂ = 1 − a − b
        let p = vec![vec![0.8, 0.2], vec![0.3, 0.7]];
        let lambda = subdominant_modulus(&p, &[0.6, 0.4], 200, 1);
        assert!((lambda - 0.5).abs() < 1e-9, "λ₂ = {lambda}");
    }

    #[test]
    fn test_subdominant_complex_pair() {
        // Lazy 3-cycle: eigenvalues 1 and ½(1 + ω^{±1}), both of modulus ½.
        let p = vec![
            vec![0.5, 0.5, 0.0],
            vec![0.0, 0.5, 0.5],
            vec![0.5, 0.0, 0.5],
        ];
        let pi = [1.0 / 3.0; 3];
        let lambda = subdominant_modulus(&p, &pi, 300, 7);
        assert!((lambda - 0.5).abs() < 1e-6, "λ₂ = {lambda}");
    }

    #[test]
    fn test_subdominant_rank_one_is_zero() {
        let pi = [0.2, 0.3, 0.5];
        let p = vec![pi.to_vec(); 3];
        assert!(subdominant_modulus(&p, &pi, 50, 3) < 1e-8);
    }

    #[test]
    fn test_exact_solve() {
        // x + y = 3/2, x - y = 1/2  →  x = 1, y = 1/2
        let a = vec![vec![rat(1, 1), rat(1, 1)], vec![rat(1, 1), rat(-1, 1)]];
        let b = vec![rat(3, 2), rat(1, 2)];
        let x = solve_exact(a, b).unwrap();
        assert_eq!(x, vec![rat(1, 1), rat(1, 2)]);
    }

    #[test]
    fn test_exact_singular_is_error() {
        let a = vec![vec![rat(1, 1), rat(2, 1)], vec![rat(2, 1), rat(4, 1)]];
        let b = vec![rat(1, 1), rat(1, 1)];
        assert!(matches!(
            solve_exact(a, b),
            Err(ChainError::SingularSystem { column: 1 })
        ));
    }
}
