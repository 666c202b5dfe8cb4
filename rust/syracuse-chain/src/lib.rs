//! # Syracuse Chain
//!
//! The accelerated Syracuse map x ↦ (3x+1)/2^a as a finite Markov chain on
//! the units mod 3^k.
//!
//! The idealized step draws a ~ Geometric(1/2). Since 2 has order n = φ(3^k)
//! mod 3^k the geometric law collapses onto a residue cycle of length n and
//! gives an exact n×n kernel P. From P the crate derives the stationary
//! distribution π, solves the Poisson equation that turns a per-state drift
//! into a constant one, and explains how an empirical distribution μ of real
//! (boundary-killed) trajectories differs from π through the character
//! spectrum of δ = μ − π and its split over the lifts from level k−1.
//!
//! Module map, leaf first:
//! - [`arith`]: modular helpers and the odd step on u128
//! - [`group`]: G_k, discrete logs, characters
//! - [`kernel`]: collapsed kernel, exact or float
//! - [`linalg`]: dense solves with least-squares fallback
//! - [`stationary`], [`poisson`]: π and ψ
//! - [`sampler`]: killed/regenerative sampling of μ
//! - [`spectral`]: δ̂, lift split, exponent identity, twist diagnostic
//! - [`noise`]: noise-floor test and boundary sweep
//! - [`model`]: per-level bundles and a bounded cache

pub mod arith;
pub mod error;
pub mod group;
pub mod kernel;
pub mod linalg;
pub mod model;
pub mod noise;
pub mod poisson;
pub mod sampler;
pub mod spectral;
pub mod stationary;

pub use error::{ChainError, ChainResult};
pub use group::{CharacterTable, UnitGroup};
pub use kernel::{Arithmetic, NumericPolicy, TransitionKernel};
pub use model::{EmpiricalPoisson, LevelModel, ModelCache};
pub use poisson::PoissonSolution;
pub use sampler::{EmpiricalSample, SampleDiagnostics, SamplerConfig};
pub use spectral::{LiftSplit, Spectrum};
pub use stationary::StationaryDistribution;

/// G_k with generator 2.
pub fn build_group(k: u32) -> ChainResult<UnitGroup> {
    UnitGroup::new(k)
}

/// Collapsed kernel for level k, exact up to the default crossover.
pub fn build_kernel(k: u32) -> ChainResult<TransitionKernel> {
    let group = UnitGroup::new(k)?;
    kernel::build_kernel(&group, Arithmetic::Auto, &NumericPolicy::default())
}

pub fn solve_stationary(kernel: &TransitionKernel) -> ChainResult<StationaryDistribution> {
    stationary::solve_stationary(kernel)
}

pub fn solve_poisson(
    kernel: &TransitionKernel,
    pi: &[f64],
    drift: &[f64],
) -> ChainResult<PoissonSolution> {
    poisson::solve_poisson(kernel, pi, drift)
}

/// Killed/regenerative sample with default start range and step limit.
pub fn sample_empirical(
    k: u32,
    n_samples: u64,
    boundary: u64,
    seed: u64,
) -> ChainResult<EmpiricalSample> {
    let group = UnitGroup::new(k)?;
    sampler::sample(&group, &SamplerConfig::new(k, n_samples, boundary, seed))
}

pub fn fourier_transform(delta: &[f64], table: &CharacterTable) -> ChainResult<Spectrum> {
    spectral::fourier_transform(delta, table)
}

/// Split δ at level `fine.k` over the lifts of `base` (level k−1).
pub fn lift_split(fine: &UnitGroup, delta: &[f64], base: &UnitGroup) -> ChainResult<LiftSplit> {
    spectral::lift_split(fine, delta, base)
}
