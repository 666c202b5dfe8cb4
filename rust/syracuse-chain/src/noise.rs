//! Sampling-noise floor and boundary sweeps.
//!
//! With N samples over n states, pure multinomial noise gives
//! E[TV(μ, π)] ≈ ½·√(n/N). Re-sampling with `scale`·N samples shrinks a
//! noise-dominated TV by √scale, while a genuine discrepancy stays put:
//!
//!   TV(N) / TV(scale·N) ≈ √scale  → noise
//!   TV(N) / TV(scale·N) ≈ 1       → signal
//!
//! Seeds and boundaries are independent, so both studies fan out with rayon.

use rayon::prelude::*;
use serde::Serialize;

use crate::error::{ChainError, ChainResult};
use crate::group::UnitGroup;
use crate::sampler::{sample, SamplerConfig};
use crate::spectral::total_variation;

/// Configuration for a noise-floor test.
#[derive(Debug, Clone, Serialize)]
pub struct NoiseFloorConfig {
    /// Base sampler settings; `n_samples` is N and `seed` the base seed.
    pub sampler: SamplerConfig,
    /// Independent runs at N samples.
    pub n_seeds: usize,
    /// The reference run uses scale·N samples.
    pub scale: u64,
}

impl Default for NoiseFloorConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            n_seeds: 4,
            scale: 4,
        }
    }
}

impl NoiseFloorConfig {
    pub fn validate(&self) -> ChainResult<()> {
        self.sampler.validate()?;
        if self.n_seeds == 0 {
            return Err(ChainError::InvalidConfig("n_seeds must be positive".into()));
        }
        if self.scale < 2 {
            return Err(ChainError::InvalidConfig("scale must be at least 2".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// TV falls like 1/√N.
    Noise,
    Mixed,
    /// TV persists under more samples.
    Signal,
}

impl Verdict {
    /// Classify a TV ratio. At scale 4 the cut-offs are 1.8 and 1.3.
    pub fn classify(ratio: f64, scale: u64) -> Self {
        let ideal = (scale as f64).sqrt();
        if ratio > 0.9 * ideal {
            Verdict::Noise
        } else if ratio > 0.65 * ideal {
            Verdict::Mixed
        } else {
            Verdict::Signal
        }
    }
}

/// ½·√(n/N)
pub fn expected_noise(n_states: usize, n_samples: u64) -> f64 {
    0.5 * (n_states as f64 / n_samples as f64).sqrt()
}

#[derive(Debug, Clone, Serialize)]
pub struct NoiseFloorResult {
    pub k: u32,
    pub boundary: u64,
    pub n_samples: u64,
    /// TV at N for each seed.
    pub tv_runs: Vec<f64>,
    pub tv_mean: f64,
    pub tv_std: f64,
    pub expected_noise: f64,
    pub tv_scaled: f64,
    pub expected_noise_scaled: f64,
    /// tv_mean / tv_scaled
    pub ratio: f64,
    pub verdict: Verdict,
    /// √max(0, TV(scale·N)² − noise(scale·N)²)
    pub signal_estimate: f64,
}

fn mix_seed(seed: u64, i: u64) -> u64 {
    seed ^ i.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

fn tv_for(group: &UnitGroup, pi: &[f64], config: &SamplerConfig) -> ChainResult<f64> {
    let s = sample(group, config)?;
    total_variation(&s.mu, pi)
}

/// Compare TV(μ_N, π) across seeds with TV(μ_{scale·N}, π).
pub fn noise_floor_test(
    group: &UnitGroup,
    pi: &[f64],
    config: &NoiseFloorConfig,
) -> ChainResult<NoiseFloorResult> {
    config.validate()?;
    let base = &config.sampler;
    let n = group.order();
    if pi.len() != n {
        return Err(ChainError::DimensionMismatch {
            expected: n,
            got: pi.len(),
        });
    }

    let tv_runs: Vec<f64> = (0..config.n_seeds as u64)
        .into_par_iter()
        .map(|i| {
            let cfg = SamplerConfig {
                seed: mix_seed(base.seed, i),
                ..base.clone()
            };
            tv_for(group, pi, &cfg)
        })
        .collect::<ChainResult<Vec<f64>>>()?;

    let scaled = SamplerConfig {
        n_samples: base.n_samples * config.scale,
        seed: mix_seed(base.seed, config.n_seeds as u64),
        ..base.clone()
    };
    let tv_scaled = tv_for(group, pi, &scaled)?;

    let runs = tv_runs.len() as f64;
    let tv_mean = tv_runs.iter().sum::<f64>() / runs;
    let tv_std = (tv_runs.iter().map(|t| (t - tv_mean).powi(2)).sum::<f64>() / runs).sqrt();
    let noise = expected_noise(n, base.n_samples);
    let noise_scaled = expected_noise(n, scaled.n_samples);
    let ratio = if tv_scaled > 0.0 { tv_mean / tv_scaled } else { f64::INFINITY };
    let verdict = Verdict::classify(ratio, config.scale);

    log::info!(
        "noise floor k={} B={}: TV(N)={tv_mean:.4}±{tv_std:.4} (noise {noise:.4}), \
         TV({}N)={tv_scaled:.4}, ratio {ratio:.2} → {verdict:?}",
        base.k,
        base.boundary,
        config.scale
    );

    Ok(NoiseFloorResult {
        k: base.k,
        boundary: base.boundary,
        n_samples: base.n_samples,
        tv_runs,
        tv_mean,
        tv_std,
        expected_noise: noise,
        tv_scaled,
        expected_noise_scaled: noise_scaled,
        ratio,
        verdict,
        signal_estimate: (tv_scaled.powi(2) - noise_scaled.powi(2)).max(0.0).sqrt(),
    })
}

// ---------------------------------------------------------------------------
// Boundary sweep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct BoundaryPoint {
    pub boundary: u64,
    pub tv: f64,
    pub regenerations: u64,
    pub boundary_hits: u64,
}

/// TV(μ_B, π) for each boundary B, all other settings from `base`.
pub fn sweep_boundaries(
    group: &UnitGroup,
    pi: &[f64],
    boundaries: &[u64],
    base: &SamplerConfig,
) -> ChainResult<Vec<BoundaryPoint>> {
    boundaries
        .par_iter()
        .map(|&boundary| {
            let cfg = SamplerConfig {
                boundary,
                ..base.clone()
            };
            let s = sample(group, &cfg)?;
            Ok(BoundaryPoint {
                boundary,
                tv: total_variation(&s.mu, pi)?,
                regenerations: s.diagnostics.regenerations,
                boundary_hits: s.diagnostics.boundary_hits,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Verdict::classify(2.0, 4), Verdict::Noise);
        assert_eq!(Verdict::classify(1.5, 4), Verdict::Mixed);
        assert_eq!(Verdict::classify(1.05, 4), Verdict::Signal);
        assert_eq!(Verdict::classify(f64::INFINITY, 4), Verdict::Noise);
    }

    #[test]
    fn test_expected_noise() {
        assert!((expected_noise(6, 600) - 0.05).abs() < 1e-15);
        assert!((expected_noise(6, 2400) - 0.025).abs() < 1e-15);
    }

    #[test]
    fn test_wrong_reference_is_signal() {
        // A point mass is far from any sampled μ whatever N is.
        let group = UnitGroup::new(2).unwrap();
        let mut pi = vec![0.0; group.order()];
        pi[0] = 1.0;
        let config = NoiseFloorConfig {
            sampler: SamplerConfig::new(2, 5_000, 100, 17),
            n_seeds: 3,
            scale: 4,
        };
        let r = noise_floor_test(&group, &pi, &config).unwrap();
        assert_eq!(r.tv_runs.len(), 3);
        assert_eq!(r.verdict, Verdict::Signal);
        assert!(r.signal_estimate > 0.5);
        assert!(r.tv_scaled > r.tv_mean / 2.0);
    }

    #[test]
    fn test_invalid_config() {
        let group = UnitGroup::new(2).unwrap();
        let pi = vec![1.0 / 6.0; 6];
        let config = NoiseFloorConfig {
            sampler: SamplerConfig::new(2, 100, 100, 0),
            n_seeds: 0,
            scale: 4,
        };
        assert!(noise_floor_test(&group, &pi, &config).is_err());
    }

    #[test]
    fn test_sweep_preserves_order() {
        let group = UnitGroup::new(2).unwrap();
        let pi = vec![1.0 / 6.0; 6];
        let base = SamplerConfig::new(2, 2_000, 0, 4);
        let bs = [10, 1_000, 100_000];
        let points = sweep_boundaries(&group, &pi, &bs, &base).unwrap();
        assert_eq!(points.iter().map(|p| p.boundary).collect::<Vec<_>>(), bs);
        assert!(points.iter().all(|p| p.tv.is_finite() && p.tv >= 0.0));
    }
}
