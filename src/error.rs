//! Allocation Errors
//!
//! Every engine stage returns `Result<_, AllocationError>`. A run either
//! completes or aborts before any payout table is produced.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    /// Upstream choices or votes were empty or malformed
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// A choice label without a parenthesized chain name, e.g. "WBTC" instead of "WBTC (Arbitrum)"
    #[error("malformed choice label {label:?}: expected a chain name in parentheses")]
    MalformedChoiceLabel { label: String },

    /// A configured choice label does not exist in the proposal
    #[error("choice {label:?} not found in proposal")]
    UnknownChoice { label: String },

    /// The sponsor's chain did not clear the minimum vote share
    #[error("threshold not met: {choice:?} is on chain {chain} with {percentage}% (< {threshold}%)")]
    ThresholdNotMet {
        choice: String,
        chain: String,
        percentage: Decimal,
        threshold: Decimal,
    },

    /// A positive budget with nobody to pay it to
    #[error("degenerate allocation: budget {budget} has no qualifying backing power")]
    DegenerateAllocation { budget: Decimal },

    #[error("cap normalization did not converge within {iterations} iterations (cap {max_percentage}%)")]
    CapNotConverged {
        iterations: usize,
        max_percentage: Decimal,
    },

    /// The reflection proxy has no payout in the primary allocation yet
    #[error("reflection pending: proxy {proxy} has no vote in the primary allocation")]
    PendingExternalVote { proxy: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AllocationError {
    /// Whether the error aborts a run. Only a pending reflection vote is survivable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AllocationError::PendingExternalVote { .. })
    }
}

pub type AllocationResult<T> = Result<T, AllocationError>;
