//! The unit group G_k = (ℤ/3^kℤ)* and its multiplicative characters.
//!
//! G_k is cyclic of order n = φ(3^k) = 2·3^{k−1}, and 2 is a primitive root
//! modulo every power of 3. States are the units in [1, 3^k) in increasing
//! order; a state's position in that order is its index everywhere in the
//! crate. The discrete log is taken base [`GENERATOR`].
//!
//! The character χ_j (j = 0 … n−1) is
//! `chi_j(x) = exp(2*pi*i * j * dlog(x) / n)`,
//! and χ_j(xy) = χ_j(x)·χ_j(y) because dlog is a homomorphism into ℤ/nℤ.

use num_complex::Complex64;
use serde::Serialize;

use crate::arith::pow3;
use crate::error::{ChainError, ChainResult};

/// Fixed primitive root used for every level.
pub const GENERATOR: u64 = 2;

/// Largest supported level. Dense kernels are only practical far below this.
pub const MAX_LEVEL: u32 = 14;

/// Sentinel for residues that are not units.
const NOT_A_UNIT: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// Unit group
// ---------------------------------------------------------------------------

/// Units modulo 3^k with state indices and a discrete-log table.
#[derive(Debug, Clone, Serialize)]
pub struct UnitGroup {
    pub k: u32,
    /// 3^k
    pub modulus: u64,
    pub generator: u64,
    /// Units in increasing order; `states[i]` is the residue of state i.
    pub states: Vec<u64>,
    /// `index[x]` = state index of residue x, or `u32::MAX` if 3 | x.
    #[serde(skip)]
    index: Vec<u32>,
    /// `dlog[x]` = t with generator^t ≡ x, or `u32::MAX` if 3 | x.
    #[serde(skip)]
    dlog: Vec<u32>,
    /// `powers[t]` = generator^t mod 3^k.
    #[serde(skip)]
    powers: Vec<u64>,
}

impl UnitGroup {
    /// Build G_k with the standard generator 2.
    pub fn new(k: u32) -> ChainResult<Self> {
        Self::with_generator(k, GENERATOR)
    }

    /// Build G_k with an arbitrary generator.
    ///
    /// Fails with [`ChainError::GeneratorOrder`] unless `generator` has full
    /// order n, i.e. the power cycle covers every unit exactly once.
    pub fn with_generator(k: u32, generator: u64) -> ChainResult<Self> {
        if k == 0 || k > MAX_LEVEL {
            return Err(ChainError::InvalidLevel { k, max: MAX_LEVEL });
        }
        let modulus = pow3(k);
        let order = (2 * pow3(k - 1)) as usize;

        let states: Vec<u64> = (1..modulus).filter(|x| x % 3 != 0).collect();
        debug_assert_eq!(states.len(), order);

        let mut index = vec![NOT_A_UNIT; modulus as usize];
        for (i, &x) in states.iter().enumerate() {
            index[x as usize] = i as u32;
        }

        let g = generator % modulus;
        if g % 3 == 0 {
            return Err(ChainError::GeneratorOrder {
                generator,
                k,
                order: 0,
                expected: order,
            });
        }

        let mut dlog = vec![NOT_A_UNIT; modulus as usize];
        let mut powers = Vec::with_capacity(order);
        let mut val = 1u64;
        for t in 0..order {
            if dlog[val as usize] != NOT_A_UNIT {
                // The cycle closed early: generator^t ≡ 1 with t < n.
                return Err(ChainError::GeneratorOrder {
                    generator,
                    k,
                    order: t,
                    expected: order,
                });
            }
            dlog[val as usize] = t as u32;
            powers.push(val);
            val = ((val as u128 * g as u128) % modulus as u128) as u64;
        }
        if val != 1 {
            return Err(ChainError::GeneratorOrder {
                generator,
                k,
                order: usize::MAX,
                expected: order,
            });
        }

        Ok(UnitGroup {
            k,
            modulus,
            generator: g,
            states,
            index,
            dlog,
            powers,
        })
    }

    /// Group order n = φ(3^k).
    #[inline]
    pub fn order(&self) -> usize {
        self.states.len()
    }

    /// State index of residue `x mod 3^k`, if it is a unit.
    #[inline]
    pub fn index_of(&self, x: u64) -> Option<usize> {
        match self.index[(x % self.modulus) as usize] {
            NOT_A_UNIT => None,
            i => Some(i as usize),
        }
    }

    /// Discrete log of residue `x mod 3^k`, if it is a unit.
    #[inline]
    pub fn dlog(&self, x: u64) -> Option<usize> {
        match self.dlog[(x % self.modulus) as usize] {
            NOT_A_UNIT => None,
            t => Some(t as usize),
        }
    }

    /// Discrete log of the state with index `i`.
    #[inline]
    pub fn dlog_of_index(&self, i: usize) -> usize {
        self.dlog[self.states[i] as usize] as usize
    }

    /// generator^t mod 3^k, t taken mod n.
    #[inline]
    pub fn power(&self, t: usize) -> u64 {
        self.powers[t % self.order()]
    }

    /// x·y mod 3^k.
    #[inline]
    pub fn mul(&self, x: u64, y: u64) -> u64 {
        ((x as u128 * y as u128) % self.modulus as u128) as u64
    }

    /// Residue → state index table (`u32::MAX` marks non-units).
    pub fn index_table(&self) -> &[u32] {
        &self.index
    }

    /// Residue → discrete log table (`u32::MAX` marks non-units).
    pub fn dlog_table(&self) -> &[u32] {
        &self.dlog
    }

    /// Character table for this level.
    pub fn characters(&self) -> CharacterTable {
        CharacterTable::new(self)
    }
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

/// χ_j(x) = exp(2πi·j·dlog(x)/n), evaluated directly.
///
/// Returns `None` when x is not a unit.
pub fn character(group: &UnitGroup, j: usize, x: u64) -> Option<Complex64> {
    let t = group.dlog(x)?;
    let n = group.order();
    let phase = std::f64::consts::TAU * ((j % n) as f64) * (t as f64) / (n as f64);
    Some(Complex64::cis(phase))
}

/// All characters of G_k, indexed by state.
///
/// Stores the n-th roots of unity once; χ_j at state i is
/// `roots[(j · dlog_i) mod n]`, so no exponentials are evaluated per lookup.
#[derive(Debug, Clone)]
pub struct CharacterTable {
    order: usize,
    /// dlog of each state, in state-index order.
    dlogs: Vec<u32>,
    /// roots[t] = exp(2πi·t/n)
    roots: Vec<Complex64>,
}

impl CharacterTable {
    pub fn new(group: &UnitGroup) -> Self {
        let n = group.order();
        let dlogs = (0..n).map(|i| group.dlog_of_index(i) as u32).collect();
        let roots = (0..n)
            .map(|t| Complex64::cis(std::f64::consts::TAU * t as f64 / n as f64))
            .collect();
        CharacterTable {
            order: n,
            dlogs,
            roots,
        }
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.order
    }

    /// Discrete logs in state-index order.
    pub fn dlogs(&self) -> &[u32] {
        &self.dlogs
    }

    /// exp(2πi·t/n) for any integer exponent t (taken mod n).
    #[inline]
    pub fn root(&self, t: u64) -> Complex64 {
        self.roots[(t % self.order as u64) as usize]
    }

    /// χ_j evaluated at the state with index `i`.
    #[inline]
    pub fn chi(&self, j: usize, i: usize) -> Complex64 {
        self.root(j as u64 * self.dlogs[i] as u64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_k2_states() {
        let g = UnitGroup::new(2).unwrap();
        assert_eq!(g.modulus, 9);
        assert_eq!(g.order(), 6);
        assert_eq!(g.states, vec![1, 2, 4, 5, 7, 8]);
        assert_eq!(g.index_of(7), Some(4));
        assert_eq!(g.index_of(16), Some(4));
        assert_eq!(g.index_of(6), None);
    }

    #[test]
    fn test_dlog_is_bijection() {
        for k in 1..=6 {
            let g = UnitGroup::new(k).unwrap();
            let n = g.order();
            assert_eq!(n, 2 * 3usize.pow(k - 1));
            let mut seen = vec![false; n];
            for &x in &g.states {
                let t = g.dlog(x).unwrap();
                assert!(!seen[t], "dlog collision at k={k}, x={x}");
                seen[t] = true;
                assert_eq!(g.power(t), x);
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn test_generator_without_full_order_rejected() {
        // 4 = 2^2 has order n/2 mod 3^k.
        match UnitGroup::with_generator(3, 4) {
            Err(ChainError::GeneratorOrder { order, expected, .. }) => {
                assert_eq!(expected, 18);
                assert_eq!(order, 9);
            }
            other => panic!("expected GeneratorOrder error, got {other:?}"),
        }
        // 10 ≡ 1 (mod 9) has order 1.
        assert!(matches!(
            UnitGroup::with_generator(2, 10),
            Err(ChainError::GeneratorOrder { order: 1, .. })
        ));
        assert!(matches!(
            UnitGroup::with_generator(2, 3),
            Err(ChainError::GeneratorOrder { .. })
        ));
    }

    #[test]
    fn test_other_primitive_root_accepted() {
        // 5 is also a primitive root mod powers of 3.
        let g = UnitGroup::with_generator(4, 5).unwrap();
        assert_eq!(g.power(1), 5);
        assert_eq!(g.dlog(5), Some(1));
    }

    #[test]
    fn test_invalid_level() {
        assert!(matches!(UnitGroup::new(0), Err(ChainError::InvalidLevel { .. })));
        assert!(matches!(
            UnitGroup::new(MAX_LEVEL + 1),
            Err(ChainError::InvalidLevel { .. })
        ));
    }

    #[test]
    fn test_character_homomorphism() {
        let mut rng = StdRng::seed_from_u64(0x5e7a_c0de);
        for k in 2..=6 {
            let g = UnitGroup::new(k).unwrap();
            let n = g.order();
            for _ in 0..200 {
                let x = g.states[rng.gen_range(0..n)];
                let y = g.states[rng.gen_range(0..n)];
                let j = rng.gen_range(0..n);
                let lhs = character(&g, j, g.mul(x, y)).unwrap();
                let rhs = character(&g, j, x).unwrap() * character(&g, j, y).unwrap();
                assert!((lhs - rhs).norm() < 1e-9, "k={k} j={j} x={x} y={y}");
            }
        }
    }

    #[test]
    fn test_character_table_matches_direct() {
        let g = UnitGroup::new(4).unwrap();
        let table = g.characters();
        for j in [0usize, 1, 7, 27, 53] {
            for (i, &x) in g.states.iter().enumerate() {
                let direct = character(&g, j, x).unwrap();
                assert!((table.chi(j, i) - direct).norm() < 1e-12);
            }
        }
        assert!(character(&g, 1, 3).is_none());
    }

    #[test]
    fn test_characters_orthogonal() {
        let g = UnitGroup::new(3).unwrap();
        let table = g.characters();
        let n = g.order();
        for a in 0..n {
            for b in 0..n {
                let s: Complex64 = (0..n).map(|i| table.chi(a, i) * table.chi(b, i).conj()).sum();
                let expected = if a == b { n as f64 } else { 0.0 };
                assert!((s.re - expected).abs() < 1e-9 && s.im.abs() < 1e-9);
            }
        }
    }
}
