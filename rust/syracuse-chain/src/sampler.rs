//! Killed/regenerative sampling of real Syracuse trajectories.
//!
//! A running odd integer is stepped with the accelerated map. Residues are
//! recorded only while the value is above the boundary B; as soon as a
//! trajectory reaches n ≤ B it is killed and restarted from a fresh large
//! random start. Small integers linger on a few residues (the 1 → 1 cycle
//! above all), so counting them would bias μ away from the bulk dynamics
//! that π describes.
//!
//! Trajectories are also regenerated after `max_trajectory_steps` steps and
//! if 3n+1 would overflow a u128, so every run terminates.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::arith::syracuse_step;
use crate::error::{ChainError, ChainResult};
use crate::group::UnitGroup;
use crate::kernel::TransitionKernel;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SamplerConfig {
    pub k: u32,
    /// Number of recorded unit residues.
    pub n_samples: u64,
    /// Kill trajectories once n ≤ boundary.
    pub boundary: u64,
    pub seed: u64,
    /// Regeneration starts are odd values drawn from [start_min, start_max).
    pub start_min: u64,
    pub start_max: u64,
    /// Forced regeneration after this many steps of one trajectory.
    pub max_trajectory_steps: u64,
    /// Record the one-step exponent a per state.
    pub track_exponents: bool,
    /// Exponents ≥ this value share the last bucket.
    pub max_exponent: u32,
    /// Accumulate ln(next) − ln(current) per state.
    pub track_drift: bool,
    /// Count state → state transitions between recorded values.
    pub track_transitions: bool,
    /// Per-state estimates below this visit count are undefined.
    pub min_visits: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            k: 4,
            n_samples: 100_000,
            boundary: 100,
            seed: 42,
            start_min: 10_000_000_000,
            start_max: 100_000_000_000_000,
            max_trajectory_steps: 10_000,
            track_exponents: false,
            max_exponent: 16,
            track_drift: false,
            track_transitions: false,
            min_visits: 30,
        }
    }
}

impl SamplerConfig {
    pub fn new(k: u32, n_samples: u64, boundary: u64, seed: u64) -> Self {
        Self {
            k,
            n_samples,
            boundary,
            seed,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ChainResult<()> {
        if self.n_samples == 0 {
            return Err(ChainError::InvalidConfig("n_samples must be positive".into()));
        }
        if self.start_min >= self.start_max {
            return Err(ChainError::InvalidConfig(format!(
                "empty start range [{}, {})",
                self.start_min, self.start_max
            )));
        }
        if (self.start_min | 1) >= self.start_max {
            return Err(ChainError::InvalidConfig(format!(
                "start range [{}, {}) contains no odd value",
                self.start_min, self.start_max
            )));
        }
        if self.boundary >= self.start_min {
            return Err(ChainError::BoundaryTooLarge {
                boundary: self.boundary,
                start_min: self.start_min,
            });
        }
        if self.max_trajectory_steps == 0 {
            return Err(ChainError::InvalidConfig(
                "max_trajectory_steps must be positive".into(),
            ));
        }
        if self.max_exponent == 0 {
            return Err(ChainError::InvalidConfig("max_exponent must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleDiagnostics {
    pub samples: u64,
    /// boundary_hits + timeout_regenerations + overflow_regenerations
    pub regenerations: u64,
    pub boundary_hits: u64,
    pub timeout_regenerations: u64,
    pub overflow_regenerations: u64,
    /// Syracuse steps taken, recorded or not.
    pub steps: u64,
    /// Smallest value whose residue was recorded; always > boundary.
    pub min_recorded_value: Option<u128>,
    pub boundary: u64,
}

/// Histogram of the one-step exponent a per state.
#[derive(Debug, Clone, Serialize)]
pub struct ExponentCounts {
    pub max_exponent: u32,
    /// `counts[i][a − 1]` for a < max_exponent; the last column holds a ≥ max_exponent.
    pub counts: Vec<Vec<u64>>,
}

impl ExponentCounts {
    fn new(n: usize, max_exponent: u32) -> Self {
        Self {
            max_exponent,
            counts: vec![vec![0; max_exponent as usize]; n],
        }
    }

    fn record(&mut self, state: usize, a: u32) {
        let bucket = (a.clamp(1, self.max_exponent) - 1) as usize;
        self.counts[state][bucket] += 1;
    }

    /// Empirical P(a = m | state) for m = 1 … max_exponent, or `None` if the
    /// state has fewer than `min_visits` observations.
    pub fn conditional(&self, state: usize, min_visits: u64) -> Option<Vec<f64>> {
        let row = &self.counts[state];
        let total: u64 = row.iter().sum();
        if total == 0 || total < min_visits {
            return None;
        }
        Some(row.iter().map(|&c| c as f64 / total as f64).collect())
    }

    /// max_m |P(a = m | state) − 2^{−m}| over the uncapped buckets.
    pub fn max_deviation(&self, state: usize, min_visits: u64) -> Option<f64> {
        let p = self.conditional(state, min_visits)?;
        let last = p.len() - 1;
        Some(
            p[..last]
                .iter()
                .enumerate()
                .map(|(m, q)| (q - 0.5f64.powi(m as i32 + 1)).abs())
                .fold(0.0, f64::max),
        )
    }
}

/// Running sums of the per-step log drift, by state.
#[derive(Debug, Clone, Serialize)]
pub struct DriftStatistics {
    pub sum: Vec<f64>,
    pub sum_sq: Vec<f64>,
    pub count: Vec<u64>,
}

/// Per-state drift estimates. `None` marks states below the visit threshold.
#[derive(Debug, Clone, Serialize)]
pub struct DriftEstimate {
    pub mean: Vec<Option<f64>>,
    pub variance: Vec<Option<f64>>,
    pub min_visits: u64,
    pub undefined: Vec<usize>,
}

impl DriftStatistics {
    fn new(n: usize) -> Self {
        Self {
            sum: vec![0.0; n],
            sum_sq: vec![0.0; n],
            count: vec![0; n],
        }
    }

    fn record(&mut self, state: usize, value: f64) {
        self.sum[state] += value;
        self.sum_sq[state] += value * value;
        self.count[state] += 1;
    }

    pub fn estimate(&self, min_visits: u64) -> DriftEstimate {
        let threshold = min_visits.max(1);
        let mut undefined = Vec::new();
        let mut mean = Vec::with_capacity(self.count.len());
        let mut variance = Vec::with_capacity(self.count.len());
        for (i, &c) in self.count.iter().enumerate() {
            if c < threshold {
                undefined.push(i);
                mean.push(None);
                variance.push(None);
                continue;
            }
            let m = self.sum[i] / c as f64;
            mean.push(Some(m));
            variance.push(Some((self.sum_sq[i] / c as f64 - m * m).max(0.0)));
        }
        DriftEstimate {
            mean,
            variance,
            min_visits,
            undefined,
        }
    }

    /// Mean drift over every recorded step.
    pub fn overall_mean(&self) -> Option<f64> {
        let total: u64 = self.count.iter().sum();
        (total > 0).then(|| self.sum.iter().sum::<f64>() / total as f64)
    }
}

impl DriftEstimate {
    /// The full drift vector, or an error naming the under-visited states.
    pub fn complete(&self) -> ChainResult<Vec<f64>> {
        if !self.undefined.is_empty() {
            return Err(ChainError::InsufficientVisits {
                states: self.undefined.clone(),
                min_visits: self.min_visits,
            });
        }
        Ok(self.mean.iter().map(|m| m.unwrap_or(f64::NAN)).collect())
    }
}

/// Counts of observed state → state steps at level k.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionCounts {
    pub k: u32,
    pub counts: Vec<Vec<u64>>,
}

impl TransitionCounts {
    /// Row-normalised empirical kernel of the killed chain. Every row needs
    /// `min_visits` (at least one) observed transitions.
    pub fn empirical_kernel(&self, min_visits: u64) -> ChainResult<TransitionKernel> {
        let threshold = min_visits.max(1);
        let totals: Vec<u64> = self.counts.iter().map(|r| r.iter().sum()).collect();
        let sparse: Vec<usize> = totals
            .iter()
            .enumerate()
            .filter(|&(_, &t)| t < threshold)
            .map(|(i, _)| i)
            .collect();
        if !sparse.is_empty() {
            return Err(ChainError::InsufficientVisits {
                states: sparse,
                min_visits: threshold,
            });
        }
        let probabilities = self
            .counts
            .iter()
            .zip(&totals)
            .map(|(row, &t)| row.iter().map(|&c| c as f64 / t as f64).collect())
            .collect();
        TransitionKernel::from_probabilities(self.k, probabilities)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmpiricalSample {
    pub k: u32,
    /// Empirical distribution over the states of G_k.
    pub mu: Vec<f64>,
    pub visits: Vec<u64>,
    pub diagnostics: SampleDiagnostics,
    /// States with fewer than `min_visits` recorded samples.
    pub under_visited: Vec<usize>,
    pub exponents: Option<ExponentCounts>,
    pub drift: Option<DriftStatistics>,
    pub transitions: Option<TransitionCounts>,
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Uniform odd starts in [start_min, start_max).
struct Regenerator {
    rng: StdRng,
    first_odd: u64,
    odd_count: u64,
}

impl Regenerator {
    /// `config` must have passed `validate`, so the range holds an odd value.
    fn new(config: &SamplerConfig) -> Self {
        let first_odd = config.start_min | 1;
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            first_odd,
            odd_count: (config.start_max - first_odd + 1) / 2,
        }
    }

    fn start(&mut self) -> u128 {
        (self.first_odd + 2 * self.rng.gen_range(0..self.odd_count)) as u128
    }
}

/// Sample μ over `group` with the killed/regenerative discipline.
pub fn sample(group: &UnitGroup, config: &SamplerConfig) -> ChainResult<EmpiricalSample> {
    config.validate()?;
    if config.k != group.k {
        return Err(ChainError::InvalidConfig(format!(
            "sampler level k={} does not match group level k={}",
            config.k, group.k
        )));
    }

    let n = group.order();
    let modulus = group.modulus as u128;
    let boundary = config.boundary as u128;

    let mut regen = Regenerator::new(config);
    let mut visits = vec![0u64; n];
    let mut exponents = config
        .track_exponents
        .then(|| ExponentCounts::new(n, config.max_exponent));
    let mut drift = config.track_drift.then(|| DriftStatistics::new(n));
    let mut transitions = config.track_transitions.then(|| TransitionCounts {
        k: config.k,
        counts: vec![vec![0; n]; n],
    });
    let mut diag = SampleDiagnostics {
        boundary: config.boundary,
        ..SampleDiagnostics::default()
    };

    let mut value = regen.start();
    let mut trajectory_steps = 0u64;

    while diag.samples < config.n_samples {
        if value <= boundary {
            diag.boundary_hits += 1;
            diag.regenerations += 1;
            value = regen.start();
            trajectory_steps = 0;
            continue;
        }

        let state = group.index_of((value % modulus) as u64);
        if let Some(i) = state {
            visits[i] += 1;
            diag.samples += 1;
            diag.min_recorded_value = Some(match diag.min_recorded_value {
                Some(m) => m.min(value),
                None => value,
            });
        }

        let (next, a) = match syracuse_step(value) {
            Some(step) => step,
            None => {
                diag.overflow_regenerations += 1;
                diag.regenerations += 1;
                value = regen.start();
                trajectory_steps = 0;
                continue;
            }
        };
        diag.steps += 1;
        trajectory_steps += 1;

        if let Some(i) = state {
            if let Some(e) = exponents.as_mut() {
                e.record(i, a);
            }
            if let Some(d) = drift.as_mut() {
                d.record(i, (next as f64).ln() - (value as f64).ln());
            }
            if let Some(t) = transitions.as_mut() {
                if next > boundary {
                    if let Some(j) = group.index_of((next % modulus) as u64) {
                        t.counts[i][j] += 1;
                    }
                }
            }
        }

        value = next;
        if trajectory_steps >= config.max_trajectory_steps {
            diag.timeout_regenerations += 1;
            diag.regenerations += 1;
            value = regen.start();
            trajectory_steps = 0;
        }
    }

    let total = diag.samples as f64;
    let mu: Vec<f64> = visits.iter().map(|&v| v as f64 / total).collect();
    let under_visited: Vec<usize> = visits
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v < config.min_visits)
        .map(|(i, _)| i)
        .collect();
    if let Some(e) = exponents.as_ref() {
        let worst = (0..n)
            .filter_map(|i| e.max_deviation(i, config.min_visits))
            .fold(0.0f64, f64::max);
        log::debug!("k={}: max |P(a | x) − 2^-a| = {worst:.4}", config.k);
    }
    if !under_visited.is_empty() {
        log::warn!(
            "k={}: {} of {} states have fewer than {} samples",
            config.k,
            under_visited.len(),
            n,
            config.min_visits
        );
    }
    log::info!(
        "sampled {} residues mod 3^{} (B={}): {} regenerations ({} boundary, {} timeout, {} overflow)",
        diag.samples,
        config.k,
        config.boundary,
        diag.regenerations,
        diag.boundary_hits,
        diag.timeout_regenerations,
        diag.overflow_regenerations
    );

    Ok(EmpiricalSample {
        k: config.k,
        mu,
        visits,
        diagnostics: diag,
        under_visited,
        exponents,
        drift,
        transitions,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
