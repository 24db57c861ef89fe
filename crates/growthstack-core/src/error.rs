use thiserror::Error;

/// Domain errors surfaced to callers.
///
/// Validation and state-machine variants carry messages the dashboard UI
/// displays verbatim, so their wording is part of the contract.
#[derive(Debug, Error)]
pub enum GrowthError {
    #[error("experiment requires at least 2 variants, got {0}")]
    TooFewVariants(usize),

    #[error("variant traffic allocations must sum to 100%, got {0}")]
    AllocationSum(f64),

    #[error("experiment requires exactly one control variant, got {0}")]
    ControlCount(usize),

    #[error("variant traffic allocation must be between 0 and 100, got {0}")]
    AllocationRange(f64),

    #[error("experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("experiment {id} cannot transition from {actual} (expected {expected})")]
    InvalidTransition {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
