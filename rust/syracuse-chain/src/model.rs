//! Per-level model bundles and an explicit, bounded cache of them.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use crate::error::{ChainError, ChainResult};
use crate::group::{CharacterTable, UnitGroup};
use crate::kernel::{build_kernel, theoretical_drift, Arithmetic, NumericPolicy, TransitionKernel};
use crate::linalg::SolveMethod;
use crate::poisson::{solve_poisson, PoissonSolution};
use crate::sampler::{sample, EmpiricalSample, SamplerConfig};
use crate::spectral::{analyze_discrepancy, total_variation, DiscrepancyReport};
use crate::stationary::{solve_stationary, StationaryDistribution};

/// Everything derived from one level k: group, characters, P and π.
#[derive(Debug, Clone)]
pub struct LevelModel {
    pub group: UnitGroup,
    pub characters: CharacterTable,
    pub kernel: TransitionKernel,
    pub stationary: StationaryDistribution,
}

impl LevelModel {
    pub fn build(k: u32, arithmetic: Arithmetic, policy: &NumericPolicy) -> ChainResult<Self> {
        let group = UnitGroup::new(k)?;
        let characters = group.characters();
        let kernel = build_kernel(&group, arithmetic, policy)?;
        let stationary = solve_stationary(&kernel)?;
        Ok(LevelModel {
            group,
            characters,
            kernel,
            stationary,
        })
    }

    pub fn k(&self) -> u32 {
        self.group.k
    }

    pub fn n(&self) -> usize {
        self.group.order()
    }

    pub fn pi(&self) -> &[f64] {
        &self.stationary.pi
    }

    /// The constant drift of the idealized model, one entry per state.
    pub fn theoretical_drift(&self) -> Vec<f64> {
        vec![theoretical_drift(self.kernel.cycle_length); self.n()]
    }

    pub fn poisson(&self, drift: &[f64]) -> ChainResult<PoissonSolution> {
        solve_poisson(&self.kernel, self.pi(), drift)
    }

    /// Sample at this level; `config.k` is overridden.
    pub fn sample(&self, config: &SamplerConfig) -> ChainResult<EmpiricalSample> {
        let cfg = SamplerConfig {
            k: self.k(),
            ..config.clone()
        };
        sample(&self.group, &cfg)
    }

    /// |λ₂| of the model kernel.
    pub fn subdominant_modulus(&self) -> f64 {
        self.kernel.subdominant_modulus(self.pi())
    }

    /// Poisson correction on the count-based kernel of a sample.
    ///
    /// The sample must carry transition counts and drift statistics. π is
    /// the stationary distribution of the empirical kernel itself, and the
    /// occupancy μ is only compared against it.
    pub fn empirical_poisson(
        &self,
        sample: &EmpiricalSample,
        min_visits: u64,
    ) -> ChainResult<EmpiricalPoisson> {
        if sample.k != self.k() {
            return Err(ChainError::InvalidConfig(format!(
                "sample level k={} does not match model level k={}",
                sample.k,
                self.k()
            )));
        }
        let (counts, drift) = match (&sample.transitions, &sample.drift) {
            (Some(t), Some(d)) => (t, d),
            _ => {
                return Err(ChainError::InvalidConfig(
                    "empirical Poisson needs transition and drift tracking".into(),
                ))
            }
        };
        let kernel = counts.empirical_kernel(min_visits)?;
        let stationary = solve_stationary(&kernel)?;
        let drift = drift.estimate(min_visits).complete()?;
        let solution = solve_poisson(&kernel, &stationary.pi, &drift)?;
        let subdominant = kernel.subdominant_modulus(&stationary.pi);
        log::info!(
            "empirical kernel at k={}: |λ₂| = {subdominant:.4}, ḡ = {:.6}",
            self.k(),
            solution.global_drift
        );

        Ok(EmpiricalPoisson {
            occupancy_tv: total_variation(&sample.mu, &stationary.pi)?,
            model_tv: total_variation(&stationary.pi, self.pi())?,
            stationary_method: stationary.method,
            subdominant,
            solution,
        })
    }

    /// Spectral analysis of μ against this level's π, split over `base`.
    pub fn analyze(&self, base: &LevelModel, mu: &[f64]) -> ChainResult<DiscrepancyReport> {
        analyze_discrepancy(&self.group, &base.group, mu, self.pi())
    }
}

/// Poisson correction computed on the empirical kernel of a sample.
#[derive(Debug, Clone, Serialize)]
pub struct EmpiricalPoisson {
    /// TV(occupancy μ, π of the empirical kernel)
    pub occupancy_tv: f64,
    /// TV(π of the empirical kernel, model π)
    pub model_tv: f64,
    pub stationary_method: SolveMethod,
    /// |λ₂| of the empirical kernel.
    pub subdominant: f64,
    pub solution: PoissonSolution,
}

/// Build several levels in parallel, in the order given.
pub fn build_levels(
    ks: &[u32],
    arithmetic: Arithmetic,
    policy: &NumericPolicy,
) -> ChainResult<Vec<LevelModel>> {
    ks.par_iter()
        .map(|&k| LevelModel::build(k, arithmetic, policy))
        .collect()
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Caller-owned cache of level models keyed by (k, resolved arithmetic).
///
/// Holds at most `max_size` models; inserting into a full cache drops half
/// of the entries first.
pub struct ModelCache {
    models: HashMap<(u32, Arithmetic), Arc<LevelModel>>,
    max_size: usize,
    policy: NumericPolicy,
    hits: u64,
    misses: u64,
}

impl ModelCache {
    pub fn new(max_size: usize, policy: NumericPolicy) -> Self {
        ModelCache {
            models: HashMap::new(),
            max_size: max_size.max(1),
            policy,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&self, k: u32, arithmetic: Arithmetic) -> Option<Arc<LevelModel>> {
        let key = (k, self.policy.resolve(arithmetic, k));
        self.models.get(&key).cloned()
    }

    /// Cached model for level k, building it on a miss.
    pub fn get_or_build(&mut self, k: u32, arithmetic: Arithmetic) -> ChainResult<Arc<LevelModel>> {
        let key = (k, self.policy.resolve(arithmetic, k));
        if let Some(model) = self.models.get(&key) {
            self.hits += 1;
            return Ok(Arc::clone(model));
        }
        self.misses += 1;
        let model = Arc::new(LevelModel::build(k, key.1, &self.policy)?);
        self.insert(key, Arc::clone(&model));
        Ok(model)
    }

    fn insert(&mut self, key: (u32, Arithmetic), model: Arc<LevelModel>) {
        if self.models.len() >= self.max_size {
            let evict: Vec<(u32, Arithmetic)> = self
                .models
                .keys()
                .take((self.max_size / 2).max(1))
                .copied()
                .collect();
            log::debug!("model cache full, evicting {} levels", evict.len());
            for k in evict {
                self.models.remove(&k);
            }
        }
        self.models.insert(key, model);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
