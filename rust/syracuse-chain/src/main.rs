//! Syracuse chain driver.
//!
//! Usage:
//!   syracuse-chain --mode=kernel   [--k=5] [--arithmetic=auto|exact|float] [--exact-max-k=4]
//!   syracuse-chain --mode=poisson  [--k=5] [--drift=theory|empirical] [--kernel=model|empirical] [--samples=N] [--boundary=B] [--seed=S]
//!   syracuse-chain --mode=spectrum [--k=5] [--samples=N] [--boundary=B] [--seed=S]
//!   syracuse-chain --mode=noise    [--k=5] [--samples=N] [--boundary=B] [--seeds=4] [--seed=S]
//!   syracuse-chain --mode=sweep    [--k=5] [--samples=N] [--boundaries=10,100,1000] [--seed=S]
//!
//! Add --json to print the result as JSON instead of a summary.
//! Logging is controlled by RUST_LOG (e.g. RUST_LOG=info).

use serde::Serialize;
use std::collections::HashMap;
use syracuse_chain::kernel::theoretical_drift;
use syracuse_chain::noise::{noise_floor_test, sweep_boundaries, NoiseFloorConfig};
use syracuse_chain::stationary::profile;
use syracuse_chain::{
    Arithmetic, ChainError, ChainResult, LevelModel, NumericPolicy, PoissonSolution, SamplerConfig,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = parse_args(&args);
    let mode = opts.get("mode").map(|s| s.as_str()).unwrap_or("kernel");

    let result = match mode {
        "kernel" => run_kernel(&opts),
        "poisson" => run_poisson(&opts),
        "spectrum" => run_spectrum(&opts),
        "noise" => run_noise(&opts),
        "sweep" => run_sweep(&opts),
        other => {
            eprintln!("Unknown mode: {other}. Use --mode=kernel|poisson|spectrum|noise|sweep");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(2);
    }
}

fn level(opts: &HashMap<String, String>) -> ChainResult<LevelModel> {
    let k = parse_u32(opts, "k", 5);
    let arithmetic = match opts.get("arithmetic").map(|s| s.as_str()).unwrap_or("auto") {
        "exact" => Arithmetic::Exact,
        "float" => Arithmetic::Float,
        "auto" => Arithmetic::Auto,
        other => {
            return Err(ChainError::InvalidConfig(format!(
                "unknown arithmetic '{other}' (exact|float|auto)"
            )))
        }
    };
    let policy = NumericPolicy {
        exact_max_k: parse_u32(opts, "exact-max-k", NumericPolicy::default().exact_max_k),
    };
    LevelModel::build(k, arithmetic, &policy)
}

fn sampler_config(opts: &HashMap<String, String>, k: u32) -> SamplerConfig {
    let defaults = SamplerConfig::default();
    SamplerConfig {
        min_visits: parse_u64(opts, "min-visits", defaults.min_visits),
        max_trajectory_steps: parse_u64(opts, "max-steps", defaults.max_trajectory_steps),
        ..SamplerConfig::new(
            k,
            parse_u64(opts, "samples", 200_000),
            parse_u64(opts, "boundary", defaults.boundary),
            parse_u64(opts, "seed", defaults.seed),
        )
    }
}

fn run_kernel(opts: &HashMap<String, String>) -> ChainResult<()> {
    let m = level(opts)?;
    let prof = profile(&m.group, m.pi());

    #[derive(Serialize)]
    struct KernelSummary<'a> {
        k: u32,
        states: usize,
        arithmetic: Arithmetic,
        max_row_error: f64,
        stationary_method: syracuse_chain::linalg::SolveMethod,
        stationary_residual: f64,
        theoretical_drift: f64,
        subdominant_modulus: f64,
        profile: &'a syracuse_chain::stationary::StationaryProfile,
        pi: &'a [f64],
    }
    let summary = KernelSummary {
        k: m.k(),
        states: m.n(),
        arithmetic: m.kernel.arithmetic,
        max_row_error: m.kernel.max_row_error,
        stationary_method: m.stationary.method,
        stationary_residual: m.stationary.residual,
        theoretical_drift: theoretical_drift(m.kernel.cycle_length),
        subdominant_modulus: m.subdominant_modulus(),
        profile: &prof,
        pi: m.pi(),
    };
    if opts.contains_key("json") {
        return print_json(&summary);
    }

    println!("Level k={} (mod {}): {} states", m.k(), m.group.modulus, m.n());
    println!("Kernel: {:?}, max row error {:.2e}", m.kernel.arithmetic, m.kernel.max_row_error);
    println!(
        "Stationary: {:?}, residual {:.2e}",
        m.stationary.method, m.stationary.residual
    );
    println!("Theoretical drift: {:.6}", summary.theoretical_drift);
    println!("|λ₂| = {:.3e}", summary.subdominant_modulus);
    println!(
        "π max {:.6} at x={}, min {:.6} at x={}, TV(π, uniform) = {:.4}",
        prof.max_mass, prof.argmax_state, prof.min_mass, prof.argmin_state, prof.tv_from_uniform
    );
    println!("\n{:>8} {:>8} {:>12}", "v3(x+1)", "states", "π-mass");
    for (v, count, mass) in &prof.mass_by_v3 {
        println!("{v:>8} {count:>8} {mass:>12.6}");
    }
    Ok(())
}

fn run_poisson(opts: &HashMap<String, String>) -> ChainResult<()> {
    let m = level(opts)?;
    match opts.get("kernel").map(|s| s.as_str()).unwrap_or("model") {
        "model" => {}
        "empirical" => return run_empirical_poisson(opts, &m),
        other => {
            return Err(ChainError::InvalidConfig(format!(
                "unknown kernel source '{other}' (model|empirical)"
            )))
        }
    }
    let drift = match opts.get("drift").map(|s| s.as_str()).unwrap_or("theory") {
        "theory" => m.theoretical_drift(),
        "empirical" => {
            let cfg = SamplerConfig {
                track_drift: true,
                ..sampler_config(opts, m.k())
            };
            let s = m.sample(&cfg)?;
            let stats = s.drift.ok_or_else(|| {
                ChainError::InvalidConfig("sampler did not record drift".into())
            })?;
            stats.estimate(cfg.min_visits).complete()?
        }
        other => {
            return Err(ChainError::InvalidConfig(format!(
                "unknown drift source '{other}' (theory|empirical)"
            )))
        }
    };

    let sol = m.poisson(&drift)?;
    if opts.contains_key("json") {
        return print_json(&sol);
    }
    println!("Poisson correction at k={} ({:?})", m.k(), sol.method);
    print_poisson(&sol);
    Ok(())
}

/// Poisson equation on the count-based kernel, with its own π and |λ₂|.
fn run_empirical_poisson(opts: &HashMap<String, String>, m: &LevelModel) -> ChainResult<()> {
    let cfg = SamplerConfig {
        track_drift: true,
        track_transitions: true,
        track_exponents: true,
        ..sampler_config(opts, m.k())
    };
    let s = m.sample(&cfg)?;
    let e = m.empirical_poisson(&s, cfg.min_visits)?;
    if opts.contains_key("json") {
        return print_json(&e);
    }
    println!(
        "Poisson correction on the empirical kernel at k={} ({} samples, B={})",
        m.k(),
        s.diagnostics.samples,
        s.diagnostics.boundary
    );
    println!("  |λ₂|                  = {:.6}", e.subdominant);
    println!("  TV(μ, π_emp)          = {:.4}", e.occupancy_tv);
    println!("  TV(π_emp, π)          = {:.4}", e.model_tv);
    print_poisson(&e.solution);
    Ok(())
}

fn print_poisson(sol: &PoissonSolution) {
    println!("  global drift ḡ        = {:.6}", sol.global_drift);
    println!("  residual              = {:.2e}", sol.residual);
    println!("  centering error       = {:.2e}", sol.centering_error);
    println!("  max |g_corr − ḡ|      = {:.2e}", sol.corrected_spread);
    println!("  worst raw drift       = {:.6}", sol.worst_raw_drift);
    println!("  worst corrected drift = {:.6}", sol.worst_corrected_drift);
    println!("  ψ range               = {:.6}", sol.psi_range);
    println!(
        "  positive states       = {} (π-mass {:.4})",
        sol.positive_states, sol.positive_mass
    );
    println!(
        "  verdict: {}",
        if sol.is_uniformly_negative() {
            "corrected drift negative everywhere"
        } else {
            "corrected drift not uniformly negative"
        }
    );
}

fn run_spectrum(opts: &HashMap<String, String>) -> ChainResult<()> {
    let fine = level(opts)?;
    let base_opts = {
        let mut o = opts.clone();
        o.insert("k".into(), (fine.k().saturating_sub(1)).to_string());
        o
    };
    let base = level(&base_opts)?;
    let s = fine.sample(&sampler_config(opts, fine.k()))?;
    let report = fine.analyze(&base, &s.mu)?;

    if opts.contains_key("json") {
        return print_json(&report);
    }
    println!(
        "Spectrum at k={} vs k={} ({} samples, B={})",
        report.k,
        report.k - 1,
        s.diagnostics.samples,
        s.diagnostics.boundary
    );
    println!("  TV(μ, π) = {:.4}, ‖δ‖₂ = {:.4e}", report.tv, report.l2);
    println!(
        "  energy: coarse {:.3e}, within-lift {:.3e} + {:.3e} (identity error {:.1e}) → {:?}",
        report.energy.coarse,
        report.energy.within1,
        report.energy.within2,
        report.energy.relative_error,
        report.dominant_component
    );
    let d = report.dominant_within_lift;
    println!("  dominant within-lift mode: m={}, r={}, j={} (|FT|={:.3e})", d.m, d.r, d.j, d.magnitude);
    println!("  exponent identity error: {:.1e}", report.identity_error);
    println!(
        "  twist diagnostic: naive cv {:.3}, twisted cv {:.3} over {} modes",
        report.twist.naive_cv, report.twist.twisted_cv, report.twist.modes_compared
    );
    println!("\n{:>6} {:>4} {:>6} {:>12}", "j", "r", "m", "|δ̂(j)|");
    for mode in &report.top_modes {
        println!("{:>6} {:>4} {:>6} {:>12.4e}", mode.j, mode.r, mode.m, mode.magnitude);
    }
    Ok(())
}

fn run_noise(opts: &HashMap<String, String>) -> ChainResult<()> {
    let m = level(opts)?;
    let config = NoiseFloorConfig {
        sampler: sampler_config(opts, m.k()),
        n_seeds: parse_u64(opts, "seeds", 4) as usize,
        scale: parse_u64(opts, "scale", 4),
    };
    let r = noise_floor_test(&m.group, m.pi(), &config)?;
    if opts.contains_key("json") {
        return print_json(&r);
    }
    println!("Noise floor at k={}, B={}, N={}", r.k, r.boundary, r.n_samples);
    println!("  TV(N)        = {:.4} ± {:.4} (expected noise {:.4})", r.tv_mean, r.tv_std, r.expected_noise);
    println!(
        "  TV({}N)       = {:.4} (expected noise {:.4})",
        config.scale, r.tv_scaled, r.expected_noise_scaled
    );
    println!("  ratio        = {:.3}", r.ratio);
    println!("  verdict      = {:?}", r.verdict);
    println!("  signal est.  = {:.4}", r.signal_estimate);
    Ok(())
}

fn run_sweep(opts: &HashMap<String, String>) -> ChainResult<()> {
    let m = level(opts)?;
    let boundaries = parse_list(opts, "boundaries", &[10, 100, 1_000, 10_000, 100_000]);
    let base = sampler_config(opts, m.k());
    let points = sweep_boundaries(&m.group, m.pi(), &boundaries, &base)?;
    if opts.contains_key("json") {
        return print_json(&points);
    }
    println!("Boundary sweep at k={}, N={}", m.k(), base.n_samples);
    println!("{:>10} {:>10} {:>14} {:>14}", "B", "TV", "regenerations", "boundary hits");
    for p in &points {
        println!(
            "{:>10} {:>10.4} {:>14} {:>14}",
            p.boundary, p.tv, p.regenerations, p.boundary_hits
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> ChainResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ChainError::InvalidConfig(format!("JSON encoding failed: {e}")))?;
    println!("{text}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Argument parsing helpers
// ---------------------------------------------------------------------------

fn parse_args(args: &[String]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for arg in args {
        if let Some(kv) = arg.strip_prefix("--") {
            if let Some((k, v)) = kv.split_once('=') {
                map.insert(k.to_string(), v.to_string());
            } else {
                map.insert(kv.to_string(), "true".to_string());
            }
        }
    }
    map
}

fn parse_u64(opts: &HashMap<String, String>, key: &str, default: u64) -> u64 {
    opts.get(key)
        .and_then(|v| {
            if let Some(hex) = v.strip_prefix("0x") {
                u64::from_str_radix(hex, 16).ok()
            } else {
                v.replace('_', "").parse().ok()
            }
        })
        .unwrap_or(default)
}

fn parse_u32(opts: &HashMap<String, String>, key: &str, default: u32) -> u32 {
    opts.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_list(opts: &HashMap<String, String>, key: &str, default: &[u64]) -> Vec<u64> {
    opts.get(key)
        .map(|v| v.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_else(|| default.to_vec())
}
