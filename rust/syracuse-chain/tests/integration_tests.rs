//! Integration tests for the Syracuse chain crate.

use syracuse_chain::group::character;
use syracuse_chain::kernel::{self, theoretical_drift};
use syracuse_chain::noise::{expected_noise, noise_floor_test, NoiseFloorConfig};
use syracuse_chain::spectral::{self, exponent_identity_error};
use syracuse_chain::stationary::stationarity_residual;
use syracuse_chain::{
    build_group, build_kernel, fourier_transform, lift_split, sample_empirical, solve_poisson,
    solve_stationary, Arithmetic, LevelModel, ModelCache, NumericPolicy, SamplerConfig,
};

#[test]
fn test_k2_scenario() {
    let g = build_group(2).unwrap();
    assert_eq!(g.order(), 6);
    assert_eq!(g.states, vec![1, 2, 4, 5, 7, 8]);

    let p = build_kernel(2).unwrap();
    assert!(p.is_exact());
    for row in &p.probabilities {
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    let pi = solve_stationary(&p).unwrap().pi;
    for j in 0..6 {
        let next: f64 = (0..6).map(|i| pi[i] * p.probabilities[i][j]).sum();
        assert!((next - pi[j]).abs() < 1e-9);
    }
}

#[test]
fn test_row_stochastic_and_stationary_across_levels() {
    for k in 1..=6 {
        let p = build_kernel(k).unwrap();
        assert_eq!(p.is_exact(), k <= 4, "k={k}");
        for (i, row) in p.probabilities.iter().enumerate() {
            let s: f64 = row.iter().sum();
            assert!((s - 1.0).abs() < 1e-9, "k={k} row {i} sums to {s}");
            assert!(row.iter().all(|&v| v >= 0.0));
        }
        let st = solve_stationary(&p).unwrap();
        assert!(stationarity_residual(&p, &st.pi) < 1e-6);
        assert!((st.pi.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}

#[test]
fn test_exact_and_float_levels_agree() {
    let policy = NumericPolicy::default();
    for k in 2..=4 {
        let e = LevelModel::build(k, Arithmetic::Exact, &policy).unwrap();
        let f = LevelModel::build(k, Arithmetic::Float, &policy).unwrap();
        for (a, b) in e.kernel.probabilities.iter().flatten().zip(f.kernel.probabilities.iter().flatten()) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in e.pi().iter().zip(f.pi()) {
            assert!((a - b).abs() < 1e-10);
        }
    }
}

#[test]
fn test_character_homomorphism_over_group() {
    let g = build_group(5).unwrap();
    let n = g.order();
    for (step, &x) in g.states.iter().enumerate().step_by(7) {
        let y = g.states[(step * 13 + 5) % n];
        for j in [1, 2, 40, 81, 161] {
            let lhs = character(&g, j, g.mul(x, y)).unwrap();
            let rhs = character(&g, j, x).unwrap() * character(&g, j, y).unwrap();
            assert!((lhs - rhs).norm() < 1e-9);
        }
    }
}

#[test]
fn test_poisson_with_empirical_drift() {
    let model = LevelModel::build(3, Arithmetic::Auto, &NumericPolicy::default()).unwrap();
    let config = SamplerConfig {
        track_drift: true,
        ..SamplerConfig::new(3, 100_000, 100, 2024)
    };
    let s = model.sample(&config).unwrap();
    let drift = s.drift.unwrap().estimate(config.min_visits).complete().unwrap();

    let sol = solve_poisson(&model.kernel, model.pi(), &drift).unwrap();
    assert!(sol.residual < 1e-6);
    assert!(sol.centering_error < 1e-10);
    assert!(sol.corrected_spread < 1e-6);
    // The empirical global drift sits near the idealized constant.
    assert!((sol.global_drift - theoretical_drift(18)).abs() < 0.05);
}

#[test]
fn test_poisson_on_sampled_kernel() {
    let model = LevelModel::build(3, Arithmetic::Auto, &NumericPolicy::default()).unwrap();
    let config = SamplerConfig {
        track_drift: true,
        track_transitions: true,
        ..SamplerConfig::new(3, 200_000, 100, 77)
    };
    let s = model.sample(&config).unwrap();

    let kernel = s.transitions.as_ref().unwrap().empirical_kernel(config.min_visits).unwrap();
    assert_eq!(kernel.n(), model.n());
    let pi = solve_stationary(&kernel).unwrap().pi;
    let drift = s.drift.as_ref().unwrap().estimate(config.min_visits).complete().unwrap();
    let direct = solve_poisson(&kernel, &pi, &drift).unwrap();
    assert!(direct.residual < 1e-6);

    let report = model.empirical_poisson(&s, config.min_visits).unwrap();
    assert!((report.solution.global_drift - direct.global_drift).abs() < 1e-12);
    assert!(report.subdominant < 1.0);
    assert!(report.solution.corrected_spread < 1e-6);
}

#[test]
fn test_killed_sampler_boundary_guarantee() {
    for &b in &[1u64, 100, 1_000_000, 9_999_999_999] {
        let s = sample_empirical(3, 10_000, b, 99).unwrap();
        let d = &s.diagnostics;
        assert_eq!(d.samples, 10_000);
        assert!(d.min_recorded_value.unwrap() > b as u128, "B={b}");
    }
    let heavy = sample_empirical(3, 10_000, 9_999_999_999, 99).unwrap();
    assert!(heavy.diagnostics.boundary_hits > 0);
    assert!(sample_empirical(3, 10, 10_000_000_000, 0).is_err());
}

#[test]
fn test_spectral_identities_on_sampled_discrepancy() {
    let policy = NumericPolicy::default();
    let fine = LevelModel::build(4, Arithmetic::Auto, &policy).unwrap();
    let base = LevelModel::build(3, Arithmetic::Auto, &policy).unwrap();
    let s = fine.sample(&SamplerConfig::new(4, 50_000, 100, 8)).unwrap();
    let delta = spectral::discrepancy(&s.mu, fine.pi()).unwrap();

    let split = lift_split(&fine.group, &delta, &base.group).unwrap();
    let energy = split.checked_energy(&delta).unwrap();
    assert!(energy.relative_error < 1e-6);

    let spectrum = fourier_transform(&delta, &fine.characters).unwrap();
    let err = exponent_identity_error(&fine.group, &delta, &spectrum).unwrap();
    assert!(err < 1e-8);

    let report = fine.analyze(&base, &s.mu).unwrap();
    assert!(report.tv > 0.0 && report.tv < 1.0);
    assert!(report.identity_error < 1e-8);
}

#[test]
fn test_noise_floor_against_true_pi() {
    let model = LevelModel::build(2, Arithmetic::Auto, &NumericPolicy::default()).unwrap();
    let config = NoiseFloorConfig {
        sampler: SamplerConfig::new(2, 4_000, 100, 31),
        n_seeds: 3,
        scale: 4,
    };
    let r = noise_floor_test(&model.group, model.pi(), &config).unwrap();
    assert_eq!(r.tv_runs.len(), 3);
    assert!((r.expected_noise - expected_noise(6, 4_000)).abs() < 1e-15);
    assert!((r.expected_noise_scaled - r.expected_noise / 2.0).abs() < 1e-15);
    assert!(r.tv_scaled >= 0.0 && r.signal_estimate <= r.tv_scaled);
}

#[test]
fn test_model_cache_reuses_levels() {
    let mut cache = ModelCache::new(3, NumericPolicy::default());
    let a = cache.get_or_build(4, Arithmetic::Auto).unwrap();
    let b = cache.get_or_build(4, Arithmetic::Auto).unwrap();
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert_eq!(cache.stats(), (1, 1));

    let direct = kernel::build_kernel(&a.group, Arithmetic::Float, &NumericPolicy::default()).unwrap();
    assert_eq!(direct.n(), a.n());
}
