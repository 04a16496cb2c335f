//! Allocation Configuration
//!
//! One immutable value per run, loaded from TOML. Every proposal-specific
//! constant (rates, thresholds, special-cased addresses) lives here instead of
//! in code.

use std::{collections::BTreeSet, fs, path::Path};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AllocationError, AllocationResult};
use crate::model::address_key;

pub const DEFAULT_SNAPSHOT_ENDPOINT: &str = "https://hub.snapshot.org/graphql";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Primary proposal id
    pub proposal_id: String,

    /// One label (single-choice mode) or two labels (paired 50/50 mode)
    pub sponsor_choices: Vec<String>,

    /// Budget units paid per one percent of the vote
    pub rate_per_one_percent: Decimal,

    /// Chains below this share of the vote forfeit the round
    #[serde(default)]
    pub min_chain_percentage: Decimal,

    /// No single choice may capture more than this share of the pool
    #[serde(default)]
    pub max_choice_percentage: Option<Decimal>,

    /// Hard ceiling on the total budget
    #[serde(default)]
    pub total_budget_cap: Option<Decimal>,

    /// Pay nothing instead of failing when the sponsor's chain misses the threshold
    #[serde(default)]
    pub allow_ineligible_sponsor: bool,

    #[serde(default = "default_cap_max_iterations")]
    pub cap_max_iterations: usize,

    #[serde(default)]
    pub whale: WhaleConfig,

    #[serde(default)]
    pub reflection: Option<ReflectionConfig>,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub balances: Option<BalanceConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhaleConfig {
    /// Voters above this voting power have their bribe clawed back
    #[serde(default)]
    pub voting_power_threshold: Option<Decimal>,

    /// Share of the clawback handed back to remaining voters (0-100)
    #[serde(default)]
    pub redistribution_percent: Decimal,

    #[serde(default)]
    pub exempt_addresses: Vec<String>,

    #[serde(default)]
    pub forced_zero_addresses: Vec<String>,
}

impl WhaleConfig {
    pub fn exempt_set(&self) -> BTreeSet<String> {
        self.exempt_addresses.iter().map(|a| address_key(a)).collect()
    }

    pub fn forced_zero_set(&self) -> BTreeSet<String> {
        self.forced_zero_addresses
            .iter()
            .map(|a| address_key(a))
            .collect()
    }
}

/// Where the reflection round takes its per-percent rate from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// Same `rate_per_one_percent` as the primary round
    #[default]
    Configured,
    /// The proxy's realized payout per percent of the primary vote
    ProxyRealized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionConfig {
    pub proposal_id: String,

    /// Voter in the primary proposal that represents the reflection pool
    pub proxy_address: String,

    /// Reflection-vote labels that mirror the sponsor choice(s)
    pub mirrored_choices: Vec<String>,

    #[serde(default)]
    pub rate_source: RateSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            endpoint: default_snapshot_endpoint(),
            page_size: default_page_size(),
        }
    }
}

/// ERC-20 balance lookups that override snapshot voting power
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceConfig {
    pub rpc_url: String,
    pub token_address: String,

    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_cap_max_iterations() -> usize {
    100
}

fn default_snapshot_endpoint() -> String {
    DEFAULT_SNAPSHOT_ENDPOINT.to_string()
}

fn default_page_size() -> usize {
    1000
}

fn default_token_decimals() -> u32 {
    18
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_delay_ms() -> u64 {
    250
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            proposal_id: String::new(),
            sponsor_choices: Vec::new(),
            rate_per_one_percent: Decimal::ZERO,
            min_chain_percentage: Decimal::ZERO,
            max_choice_percentage: None,
            total_budget_cap: None,
            allow_ineligible_sponsor: false,
            cap_max_iterations: default_cap_max_iterations(),
            whale: WhaleConfig::default(),
            reflection: None,
            snapshot: SnapshotConfig::default(),
            balances: None,
        }
    }
}

impl AllocationConfig {
    pub fn validate(&self) -> AllocationResult<()> {
        let invalid = |msg: String| Err(AllocationError::InvalidConfig(msg));
        let hundred = Decimal::ONE_HUNDRED;

        if self.proposal_id.trim().is_empty() {
            return invalid("proposal_id is empty".into());
        }
        check_choice_list("sponsor_choices", &self.sponsor_choices)?;
        if self.rate_per_one_percent.is_sign_negative() {
            return invalid("rate_per_one_percent must not be negative".into());
        }
        if self.min_chain_percentage.is_sign_negative() || self.min_chain_percentage > hundred {
            return invalid("min_chain_percentage must be within 0-100".into());
        }
        if let Some(cap) = self.max_choice_percentage {
            if cap <= Decimal::ZERO || cap > hundred {
                return invalid(format!("max_choice_percentage {} must be within (0, 100]", cap));
            }
        }
        if let Some(cap) = self.total_budget_cap {
            if cap.is_sign_negative() {
                return invalid("total_budget_cap must not be negative".into());
            }
        }
        if self.cap_max_iterations == 0 {
            return invalid("cap_max_iterations must be at least 1".into());
        }

        let whale = &self.whale;
        if let Some(threshold) = whale.voting_power_threshold {
            if threshold.is_sign_negative() {
                return invalid("whale.voting_power_threshold must not be negative".into());
            }
        }
        if whale.redistribution_percent.is_sign_negative() || whale.redistribution_percent > hundred {
            return invalid("whale.redistribution_percent must be within 0-100".into());
        }

        if let Some(reflection) = &self.reflection {
            if reflection.proposal_id.trim().is_empty() {
                return invalid("reflection.proposal_id is empty".into());
            }
            if reflection.proxy_address.trim().is_empty() {
                return invalid("reflection.proxy_address is empty".into());
            }
            check_choice_list("reflection.mirrored_choices", &reflection.mirrored_choices)?;
        }

        if self.snapshot.page_size == 0 {
            return invalid("snapshot.page_size must be at least 1".into());
        }
        if let Some(balances) = &self.balances {
            if balances.batch_size == 0 {
                return invalid("balances.batch_size must be at least 1".into());
            }
            if balances.token_decimals > 28 {
                return invalid("balances.token_decimals must be at most 28".into());
            }
        }
        Ok(())
    }
}

fn check_choice_list(field: &str, labels: &[String]) -> AllocationResult<()> {
    if labels.is_empty() || labels.len() > 2 {
        return Err(AllocationError::InvalidConfig(format!(
            "{} needs one or two labels, got {}",
            field,
            labels.len()
        )));
    }
    if labels.len() == 2 && labels[0] == labels[1] {
        return Err(AllocationError::InvalidConfig(format!(
            "{} lists {:?} twice",
            field, labels[0]
        )));
    }
    Ok(())
}

/// Load and validate a config file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AllocationConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let cfg: AllocationConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
