//! Round Data Model
//!
//! Raw inputs (choices and vote records) and the derived tables each
//! allocation stage produces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AllocationError, AllocationResult};

/// Choice index within a proposal. Index 0 is reserved; real choices start at 1.
pub type ChoiceId = u32;

/// Normalize an address for comparisons (lowercase, trimmed)
pub fn address_key(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// One selectable option in a proposal, e.g. "WBTC (Arbitrum)"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: ChoiceId,
    pub label: String,
}

impl Choice {
    pub fn new(id: ChoiceId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }

    /// Build the choice list from ordered labels (first label gets id 1)
    pub fn from_labels<I, S>(labels: I) -> Vec<Choice>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        labels
            .into_iter()
            .enumerate()
            .map(|(idx, label)| Choice::new(idx as ChoiceId + 1, label))
            .collect()
    }

    /// Chain name embedded in the label: the text inside the trailing parentheses
    pub fn chain(&self) -> AllocationResult<&str> {
        parse_chain(&self.label)
    }
}

/// Extract "Arbitrum" from "WBTC (Arbitrum)"
pub fn parse_chain(label: &str) -> AllocationResult<&str> {
    let malformed = || AllocationError::MalformedChoiceLabel {
        label: label.to_string(),
    };

    let trimmed = label.trim_end();
    let body = trimmed.strip_suffix(')').ok_or_else(malformed)?;
    let open = body.rfind('(').ok_or_else(malformed)?;
    let chain = body[open + 1..].trim();
    if chain.is_empty() {
        return Err(malformed());
    }
    Ok(chain)
}

/// One ballot: voting power split across choices by relative weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub voter: String,
    pub voting_power: Decimal,
    pub weights: BTreeMap<ChoiceId, Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl VoteRecord {
    pub fn new(voter: impl Into<String>, voting_power: Decimal) -> Self {
        Self {
            voter: voter.into(),
            voting_power,
            weights: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn with_weight(mut self, choice: ChoiceId, weight: Decimal) -> Self {
        *self.weights.entry(choice).or_insert(Decimal::ZERO) += weight;
        self
    }

    pub fn weight_sum(&self) -> Decimal {
        self.weights.values().copied().sum()
    }

    /// Fraction of this ballot assigned to `choice` (0 when the ballot has no weight)
    pub fn share_of(&self, choice: ChoiceId) -> Decimal {
        let total = self.weight_sum();
        if total.is_zero() {
            return Decimal::ZERO;
        }
        self.weights.get(&choice).copied().unwrap_or(Decimal::ZERO) / total
    }
}

/// Everything one allocation run needs from the data source, frozen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundInput {
    pub proposal_id: String,
    pub choices: Vec<Choice>,
    pub votes: Vec<VoteRecord>,
}

impl RoundInput {
    pub fn choice_by_label(&self, label: &str) -> AllocationResult<&Choice> {
        self.choices
            .iter()
            .find(|c| c.label == label)
            .ok_or_else(|| AllocationError::UnknownChoice {
                label: label.to_string(),
            })
    }

    pub fn total_voting_power(&self) -> Decimal {
        self.votes.iter().map(|v| v.voting_power).sum()
    }
}

/// Per-choice totals, annotated as the round moves through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceTotal {
    pub choice: Choice,
    pub chain: String,
    pub raw_votes: Decimal,
    pub raw_percentage: Decimal,
    /// Votes counted after eligibility gating (zero for ineligible chains)
    pub eligible_votes: Decimal,
    pub eligible_percentage: Decimal,
    pub capped_percentage: Decimal,
    pub is_eligible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTotal {
    pub chain: String,
    pub percentage: Decimal,
}

/// How the whale stage treated a payout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhaleClass {
    Regular,
    /// Above the threshold; raw bribe clawed back
    ClawedBack,
    /// Above the threshold but exempt from clawback
    Exempt,
    /// Forced to zero by configuration
    ForcedZero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub voter: String,
    pub voting_power: Decimal,
    /// Fraction of the ballot on the sponsor choice(s), in (0, 1]
    pub choice_share: Decimal,
    pub backing_power: Decimal,
    pub raw_bribe: Decimal,
    pub whale_adjustment: Decimal,
    pub final_bribe: Decimal,
    pub whale_class: WhaleClass,
}

impl Payout {
    pub fn new(voter: String, voting_power: Decimal, choice_share: Decimal) -> Self {
        Self {
            voter,
            voting_power,
            choice_share,
            backing_power: voting_power * choice_share,
            raw_bribe: Decimal::ZERO,
            whale_adjustment: Decimal::ZERO,
            final_bribe: Decimal::ZERO,
            whale_class: WhaleClass::Regular,
        }
    }
}

/// Amount owed to a reflection voter, or a marker that the primary vote is missing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "amount", rename_all = "snake_case")]
pub enum ReflectionBribe {
    Pending,
    Settled(Decimal),
}

impl ReflectionBribe {
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            ReflectionBribe::Pending => None,
            ReflectionBribe::Settled(amount) => Some(*amount),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionPayout {
    pub voter: String,
    pub voting_power: Decimal,
    pub choice_share: Decimal,
    pub backing_power: Decimal,
    pub bribe: ReflectionBribe,
}
