//! Vote Bribes
//!
//! Turns a governance vote tally into a proportional payout list for the
//! backers of a sponsor's choice: per-chain eligibility, per-choice caps,
//! budget pricing, whale clawback and cross-proposal pass-through.

pub mod balances;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod report;
pub mod snapshot;

pub use config::{load_config, AllocationConfig};
pub use engine::{AllocationEngine, AllocationReport, ReflectionOutcome};
pub use error::{AllocationError, AllocationResult};
pub use model::{Choice, RoundInput, VoteRecord};
