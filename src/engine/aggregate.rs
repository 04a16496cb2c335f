//! Vote aggregation: per-choice and per-chain totals from raw ballots.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AllocationError, AllocationResult};
use crate::model::{address_key, ChainTotal, Choice, ChoiceId, ChoiceTotal, VoteRecord};

/// Totals for one proposal. `choices` follows proposal order.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteTally {
    pub choices: Vec<ChoiceTotal>,
    pub chains: Vec<ChainTotal>,
    pub total_votes: Decimal,
}

impl VoteTally {
    pub fn get(&self, id: ChoiceId) -> Option<&ChoiceTotal> {
        self.choices.iter().find(|c| c.choice.id == id)
    }

    pub fn chain_percentage(&self, chain: &str) -> Decimal {
        self.chains
            .iter()
            .find(|c| c.chain == chain)
            .map(|c| c.percentage)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Reject inputs no allocation can be computed from
pub fn validate_round(choices: &[Choice], votes: &[VoteRecord]) -> AllocationResult<()> {
    if choices.is_empty() {
        return Err(AllocationError::DataUnavailable(
            "proposal has no choices".into(),
        ));
    }

    let known: BTreeSet<ChoiceId> = choices.iter().map(|c| c.id).collect();
    let mut seen = BTreeSet::new();

    for vote in votes {
        if !seen.insert(address_key(&vote.voter)) {
            return Err(AllocationError::DataUnavailable(format!(
                "duplicate vote from {}",
                vote.voter
            )));
        }
        if vote.voting_power.is_sign_negative() {
            return Err(AllocationError::DataUnavailable(format!(
                "negative voting power {} for {}",
                vote.voting_power, vote.voter
            )));
        }
        for (choice, weight) in &vote.weights {
            if !known.contains(choice) {
                return Err(AllocationError::DataUnavailable(format!(
                    "vote from {} references unknown choice {}",
                    vote.voter, choice
                )));
            }
            if weight.is_sign_negative() {
                return Err(AllocationError::DataUnavailable(format!(
                    "negative weight {} on choice {} from {}",
                    weight, choice, vote.voter
                )));
            }
        }
    }
    Ok(())
}

/// Apportion each ballot's voting power across its choices by relative weight.
///
/// Ballots whose weights sum to zero are abstentions and contribute nothing.
/// Every listed choice appears in the result, with zero when nobody backed it.
pub fn apportion_votes(
    choices: &[Choice],
    votes: &[VoteRecord],
) -> BTreeMap<ChoiceId, Decimal> {
    let mut totals: BTreeMap<ChoiceId, Decimal> =
        choices.iter().map(|c| (c.id, Decimal::ZERO)).collect();

    let mut abstained = 0usize;
    for vote in votes {
        let weight_sum = vote.weight_sum();
        if weight_sum.is_zero() {
            abstained += 1;
            continue;
        }
        for (choice, weight) in &vote.weights {
            *totals.entry(*choice).or_insert(Decimal::ZERO) +=
                vote.voting_power * *weight / weight_sum;
        }
    }

    if abstained > 0 {
        debug!("[AGGREGATE] {} ballots carried no weight and were skipped", abstained);
    }
    totals
}

/// Votes and share of the total for one choice, without any chain attribution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceCount {
    pub choice: Choice,
    pub votes: Decimal,
    pub percentage: Decimal,
}

/// Plain per-choice totals for any proposal.
///
/// `chains` is only filled in when every label names a chain; proposals with
/// labels like "Yes" / "No" still get their per-choice counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalCounts {
    pub choices: Vec<ChoiceCount>,
    pub chains: Option<Vec<ChainTotal>>,
    pub total_votes: Decimal,
}

/// Count a proposal's votes per choice. Chain labels are optional here.
pub fn count_votes(choices: &[Choice], votes: &[VoteRecord]) -> AllocationResult<ProposalCounts> {
    validate_round(choices, votes)?;
    if votes.is_empty() {
        return Err(AllocationError::DataUnavailable(
            "proposal has no votes".into(),
        ));
    }

    let totals = apportion_votes(choices, votes);
    let total_votes: Decimal = totals.values().copied().sum();
    if total_votes.is_zero() {
        return Err(AllocationError::DataUnavailable(
            "proposal has no voting power".into(),
        ));
    }

    let counts: Vec<ChoiceCount> = choices
        .iter()
        .map(|choice| {
            let votes = totals.get(&choice.id).copied().unwrap_or(Decimal::ZERO);
            ChoiceCount {
                choice: choice.clone(),
                votes,
                percentage: votes * Decimal::ONE_HUNDRED / total_votes,
            }
        })
        .collect();

    let chains = chain_totals(&counts).ok();
    if chains.is_none() {
        debug!("[AGGREGATE] labels carry no chain names; chain totals skipped");
    }

    Ok(ProposalCounts {
        choices: counts,
        chains,
        total_votes,
    })
}

fn chain_totals(counts: &[ChoiceCount]) -> AllocationResult<Vec<ChainTotal>> {
    let mut chains: BTreeMap<String, Decimal> = BTreeMap::new();
    for count in counts {
        *chains
            .entry(count.choice.chain()?.to_string())
            .or_insert(Decimal::ZERO) += count.percentage;
    }
    Ok(chains
        .into_iter()
        .map(|(chain, percentage)| ChainTotal { chain, percentage })
        .collect())
}

/// Build the per-choice and per-chain tables for a primary proposal.
///
/// Unlike `count_votes`, every label must name its chain.
pub fn tally(choices: &[Choice], votes: &[VoteRecord]) -> AllocationResult<VoteTally> {
    let counts = count_votes(choices, votes)?;

    let mut rows = Vec::with_capacity(counts.choices.len());
    for count in counts.choices {
        let chain = count.choice.chain()?.to_string();
        rows.push(ChoiceTotal {
            choice: count.choice,
            chain,
            raw_votes: count.votes,
            raw_percentage: count.percentage,
            eligible_votes: count.votes,
            eligible_percentage: count.percentage,
            capped_percentage: count.percentage,
            is_eligible: true,
        });
    }
    // every label parsed above, so chain totals exist
    let chains = counts.chains.unwrap_or_default();

    info!(
        "[AGGREGATE] {} votes over {} choices on {} chains (total vp={})",
        votes.len(),
        rows.len(),
        chains.len(),
        counts.total_votes.round_dp(4)
    );

    Ok(VoteTally {
        choices: rows,
        chains,
        total_votes: counts.total_votes,
    })
}
