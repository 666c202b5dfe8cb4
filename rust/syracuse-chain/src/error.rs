//! Error taxonomy for the chain model.
//!
//! Configuration errors abort before any computation. Invariant violations
//! indicate an arithmetic or modelling bug and stop the analysis. Solve
//! degradation is not an error: it is recovered locally and reported through
//! [`crate::linalg::SolveMethod`].

/// Errors that can occur while building or analysing a level-k chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("level k={k} is outside the supported range 1..={max}")]
    InvalidLevel { k: u32, max: u32 },

    #[error("generator {generator} has order {order} mod 3^{k}, expected {expected}")]
    GeneratorOrder {
        generator: u64,
        k: u32,
        order: usize,
        expected: usize,
    },

    #[error("boundary B={boundary} is not below the smallest regeneration start {start_min}")]
    BoundaryTooLarge { boundary: u64, start_min: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("non-finite {what} at index {index} ({value})")]
    NonFinite {
        what: &'static str,
        index: usize,
        value: f64,
    },

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("level mismatch: base level {base} is not fine level {fine} minus one")]
    LevelMismatch { fine: u32, base: u32 },

    #[error("kernel row {row} sums to {sum}, not 1")]
    RowSum { row: usize, sum: f64 },

    #[error("probability at index {index} is negative ({value:e})")]
    NegativeProbability { index: usize, value: f64 },

    #[error("stationarity residual {residual:e} exceeds tolerance {tolerance:e}")]
    StationaryResidual { residual: f64, tolerance: f64 },

    #[error("Poisson residual {residual:e} exceeds tolerance {tolerance:e}")]
    PoissonResidual { residual: f64, tolerance: f64 },

    #[error("energy decomposition mismatch: relative error {relative:e}")]
    EnergyMismatch { relative: f64 },

    #[error("exponent-coordinate identity off by {error:e}")]
    ExponentIdentity { error: f64 },

    #[error("exact linear system is singular (no pivot in column {column})")]
    SingularSystem { column: usize },

    #[error("{} state(s) have fewer than {min_visits} visits: {states:?}", states.len())]
    InsufficientVisits { states: Vec<usize>, min_visits: u64 },
}

/// Convenience alias used throughout the crate.
pub type ChainResult<T> = Result<T, ChainError>;
