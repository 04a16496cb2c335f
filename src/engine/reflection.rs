//! Cross-proposal bribes: one primary voter (the proxy) stands in for the
//! participants of a second "reflection" vote, and its primary payout is
//! passed through to them in proportion to their backing of the mirrored
//! choice(s).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::aggregate::validate_round;
use super::budget::{qualifying_share, split_by_backing, Allocation};
use crate::config::{RateSource, ReflectionConfig};
use crate::error::{AllocationError, AllocationResult};
use crate::model::{address_key, ChoiceId, ReflectionBribe, ReflectionPayout, RoundInput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionAllocation {
    pub proposal_id: String,
    pub proxy: String,
    pub proxy_final_bribe: Decimal,
    /// Share of the reflection vote's power that backed the mirrored choice(s), 0..1
    pub percent_bribed: Decimal,
    /// Part of the primary vote the proxy carries on behalf of the reflection pool
    pub proxy_qualifying_percent: Decimal,
    pub rate_per_one_percent: Decimal,
    pub total_budget: Decimal,
    pub total_backing: Decimal,
    pub payouts: Vec<ReflectionPayout>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReflectionOutcome {
    /// The proxy has not voted in the primary proposal yet
    Pending {
        proposal_id: String,
        proxy: String,
        payouts: Vec<ReflectionPayout>,
    },
    Settled(ReflectionAllocation),
}

impl ReflectionOutcome {
    pub fn payouts(&self) -> &[ReflectionPayout] {
        match self {
            ReflectionOutcome::Pending { payouts, .. } => payouts,
            ReflectionOutcome::Settled(allocation) => &allocation.payouts,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ReflectionOutcome::Pending { .. })
    }

    /// The settled allocation, or `PendingExternalVote` while the proxy hasn't voted
    pub fn settled(&self) -> AllocationResult<&ReflectionAllocation> {
        match self {
            ReflectionOutcome::Settled(allocation) => Ok(allocation),
            ReflectionOutcome::Pending { proxy, .. } => Err(AllocationError::PendingExternalVote {
                proxy: proxy.clone(),
            }),
        }
    }
}

fn mirrored_ids(round: &RoundInput, cfg: &ReflectionConfig) -> AllocationResult<Vec<ChoiceId>> {
    cfg.mirrored_choices
        .iter()
        .map(|label| round.choice_by_label(label).map(|c| c.id))
        .collect()
}

/// Derive the reflection round's payouts from the proxy's primary payout
pub fn derive_reflection(
    primary: &Allocation,
    reflection: &RoundInput,
    cfg: &ReflectionConfig,
    configured_rate: Decimal,
) -> AllocationResult<ReflectionOutcome> {
    validate_round(&reflection.choices, &reflection.votes)?;
    let mirrored = mirrored_ids(reflection, cfg)?;

    let proxy_key = address_key(&cfg.proxy_address);
    let proxy = primary
        .payouts
        .iter()
        .find(|p| address_key(&p.voter) == proxy_key);

    let proxy = match proxy {
        Some(proxy) => proxy,
        None => {
            warn!(
                "[REFLECTION] proxy {} has no primary vote yet; {} reflection voters pending",
                cfg.proxy_address,
                reflection.votes.len()
            );
            let payouts = reflection
                .votes
                .iter()
                .map(|v| {
                    let share = qualifying_share(v, &mirrored);
                    ReflectionPayout {
                        voter: v.voter.clone(),
                        voting_power: v.voting_power,
                        choice_share: share,
                        backing_power: v.voting_power * share,
                        bribe: ReflectionBribe::Pending,
                    }
                })
                .collect();
            return Ok(ReflectionOutcome::Pending {
                proposal_id: reflection.proposal_id.clone(),
                proxy: cfg.proxy_address.clone(),
                payouts,
            });
        }
    };

    let reflection_power = reflection.total_voting_power();
    if reflection_power.is_zero() {
        return Err(AllocationError::DataUnavailable(format!(
            "reflection proposal {} has no voting power",
            reflection.proposal_id
        )));
    }

    let mut payouts: Vec<ReflectionPayout> = reflection
        .votes
        .iter()
        .filter(|v| v.voting_power > Decimal::ZERO)
        .filter_map(|v| {
            let share = qualifying_share(v, &mirrored);
            (share > Decimal::ZERO).then(|| ReflectionPayout {
                voter: v.voter.clone(),
                voting_power: v.voting_power,
                choice_share: share,
                backing_power: v.voting_power * share,
                bribe: ReflectionBribe::Settled(Decimal::ZERO),
            })
        })
        .collect();

    let total_backing: Decimal = payouts.iter().map(|p| p.backing_power).sum();
    let percent_bribed = total_backing / reflection_power;
    let proxy_qualifying_percent =
        proxy.voting_power * percent_bribed * Decimal::ONE_HUNDRED / primary.total_vote_power;

    let rate = match cfg.rate_source {
        RateSource::Configured => configured_rate,
        RateSource::ProxyRealized => {
            let proxy_percent =
                proxy.backing_power * Decimal::ONE_HUNDRED / primary.total_vote_power;
            proxy.final_bribe / proxy_percent
        }
    };

    let mut total_budget = rate * proxy_qualifying_percent;
    if total_budget > proxy.final_bribe {
        info!(
            "[REFLECTION] budget {} limited to the proxy's payout {}",
            total_budget.round_dp(6),
            proxy.final_bribe.round_dp(6)
        );
        total_budget = proxy.final_bribe;
    }

    let backing: Vec<Decimal> = payouts.iter().map(|p| p.backing_power).collect();
    let amounts = split_by_backing(total_budget, &backing)?;
    for (payout, amount) in payouts.iter_mut().zip(amounts) {
        payout.bribe = ReflectionBribe::Settled(amount);
    }

    info!(
        "[REFLECTION] {}: {} voters share {} ({}% of pool bribed, proxy carries {}%)",
        reflection.proposal_id,
        payouts.len(),
        total_budget.round_dp(6),
        (percent_bribed * Decimal::ONE_HUNDRED).round_dp(4),
        proxy_qualifying_percent.round_dp(6)
    );

    Ok(ReflectionOutcome::Settled(ReflectionAllocation {
        proposal_id: reflection.proposal_id.clone(),
        proxy: proxy.voter.clone(),
        proxy_final_bribe: proxy.final_bribe,
        percent_bribed,
        proxy_qualifying_percent,
        rate_per_one_percent: rate,
        total_budget,
        total_backing,
        payouts,
    }))
}
