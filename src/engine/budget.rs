//! Budget allocation: price the sponsor's vote share into a total budget, then
//! split it across backing voters in proportion to their backing power.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::aggregate::VoteTally;
use crate::error::{AllocationError, AllocationResult};
use crate::model::{ChoiceId, Payout, VoteRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// One sponsor choice
    Single,
    /// Two sponsor choices; only ballots splitting them 50/50 qualify
    Paired,
}

impl AllocationMode {
    pub fn for_choices(choices: &[ChoiceId]) -> Self {
        if choices.len() == 2 {
            AllocationMode::Paired
        } else {
            AllocationMode::Single
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetParams {
    pub rate_per_one_percent: Decimal,
    pub max_choice_percentage: Option<Decimal>,
    pub total_budget_cap: Option<Decimal>,
    pub min_chain_percentage: Decimal,
    pub allow_ineligible_sponsor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub mode: AllocationMode,
    pub sponsor_choices: Vec<ChoiceId>,
    /// Vote percentage the budget was priced on
    pub priced_percentage: Decimal,
    pub total_budget: Decimal,
    pub total_backing: Decimal,
    pub total_vote_power: Decimal,
    pub payouts: Vec<Payout>,
}

/// Fraction of a ballot that backs the sponsor choice(s).
///
/// With two sponsor choices the ballot only qualifies when it puts exactly the
/// same weight on both; its share is then the sum of both fractions.
pub fn qualifying_share(vote: &VoteRecord, sponsor: &[ChoiceId]) -> Decimal {
    match sponsor {
        [single] => vote.share_of(*single),
        [first, second] => {
            let a = vote.weights.get(first).copied().unwrap_or(Decimal::ZERO);
            let b = vote.weights.get(second).copied().unwrap_or(Decimal::ZERO);
            if a != b {
                return Decimal::ZERO;
            }
            vote.share_of(*first) + vote.share_of(*second)
        }
        _ => Decimal::ZERO,
    }
}

/// One payout per voter with voting power and a qualifying share, in ballot order
pub fn backing_payouts(votes: &[VoteRecord], sponsor: &[ChoiceId]) -> Vec<Payout> {
    votes
        .iter()
        .filter(|v| v.voting_power > Decimal::ZERO)
        .filter_map(|v| {
            let share = qualifying_share(v, sponsor);
            (share > Decimal::ZERO).then(|| Payout::new(v.voter.clone(), v.voting_power, share))
        })
        .collect()
}

/// Split `budget` across `backing` proportionally.
///
/// A positive budget with zero total backing cannot be paid out and is reported
/// as `DegenerateAllocation` instead of dividing zero by zero.
pub fn split_by_backing(budget: Decimal, backing: &[Decimal]) -> AllocationResult<Vec<Decimal>> {
    let total: Decimal = backing.iter().copied().sum();
    if total.is_zero() {
        if budget > Decimal::ZERO {
            return Err(AllocationError::DegenerateAllocation { budget });
        }
        return Ok(vec![Decimal::ZERO; backing.len()]);
    }
    Ok(backing.iter().map(|b| *b * budget / total).collect())
}

/// Check every sponsor choice cleared eligibility. Returns false when an
/// ineligible sponsor is tolerated by configuration.
fn sponsor_is_eligible(
    tally: &VoteTally,
    sponsor: &[ChoiceId],
    params: &BudgetParams,
) -> AllocationResult<bool> {
    for id in sponsor {
        let row = tally.get(*id).ok_or_else(|| AllocationError::UnknownChoice {
            label: format!("#{}", id),
        })?;
        if row.is_eligible {
            continue;
        }
        if params.allow_ineligible_sponsor {
            warn!(
                "[BUDGET] sponsor choice {:?} is ineligible; paying nothing this round",
                row.choice.label
            );
            return Ok(false);
        }
        return Err(AllocationError::ThresholdNotMet {
            choice: row.choice.label.clone(),
            chain: row.chain.clone(),
            percentage: tally.chain_percentage(&row.chain),
            threshold: params.min_chain_percentage,
        });
    }
    Ok(true)
}

/// Price the sponsor's share into a budget and apportion it across backers
pub fn allocate_budget(
    tally: &VoteTally,
    votes: &[VoteRecord],
    sponsor: &[ChoiceId],
    params: &BudgetParams,
) -> AllocationResult<Allocation> {
    let mode = AllocationMode::for_choices(sponsor);
    let eligible = sponsor_is_eligible(tally, sponsor, params)?;

    let mut payouts = backing_payouts(votes, sponsor);
    let total_backing: Decimal = payouts.iter().map(|p| p.backing_power).sum();

    let priced_percentage = if !eligible {
        Decimal::ZERO
    } else {
        match mode {
            AllocationMode::Single => {
                // sponsor is validated to exist by sponsor_is_eligible
                let row = tally.get(sponsor[0]).ok_or_else(|| AllocationError::UnknownChoice {
                    label: format!("#{}", sponsor[0]),
                })?;
                let mut pct = row.capped_percentage.min(row.raw_percentage);
                if let Some(cap) = params.max_choice_percentage {
                    pct = pct.min(cap);
                }
                pct
            }
            AllocationMode::Paired => total_backing * Decimal::ONE_HUNDRED / tally.total_votes,
        }
    };

    let mut total_budget = params.rate_per_one_percent * priced_percentage;
    if let Some(cap) = params.total_budget_cap {
        if total_budget > cap {
            info!("[BUDGET] budget {} limited by hard cap {}", total_budget, cap);
            total_budget = cap;
        }
    }

    let backing: Vec<Decimal> = payouts.iter().map(|p| p.backing_power).collect();
    let shares = split_by_backing(total_budget, &backing)?;
    for (payout, raw) in payouts.iter_mut().zip(shares) {
        payout.raw_bribe = raw;
        payout.final_bribe = raw;
    }

    info!(
        "[BUDGET] {:?} mode: {}% priced at {} per 1% = {} over {} voters (backing={})",
        mode,
        priced_percentage.round_dp(6),
        params.rate_per_one_percent,
        total_budget.round_dp(6),
        payouts.len(),
        total_backing.round_dp(4)
    );

    Ok(Allocation {
        mode,
        sponsor_choices: sponsor.to_vec(),
        priced_percentage,
        total_budget,
        total_backing,
        total_vote_power: tally.total_votes,
        payouts,
    })
}
