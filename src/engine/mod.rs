//! Allocation Engine
//!
//! Six deterministic stages over a frozen round:
//! aggregate -> eligibility -> cap -> budget -> whale -> (reflection).
//! Each stage takes the previous stage's output by value and returns a new one.
//! The engine does no I/O; the same input always yields the same report.

pub mod aggregate;
pub mod budget;
pub mod cap;
pub mod eligibility;
pub mod reflection;
pub mod whale;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AllocationConfig;
use crate::error::{AllocationError, AllocationResult};
use crate::model::{ChainTotal, ChoiceId, ChoiceTotal, Payout, RoundInput};

pub use aggregate::VoteTally;
pub use budget::{Allocation, AllocationMode, BudgetParams};
pub use reflection::{ReflectionAllocation, ReflectionOutcome};
pub use whale::WhaleSummary;

/// Everything one primary run produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationReport {
    pub proposal_id: String,
    pub mode: AllocationMode,
    pub sponsor_choices: Vec<ChoiceId>,
    pub choice_totals: Vec<ChoiceTotal>,
    pub chain_totals: Vec<ChainTotal>,
    pub total_vote_power: Decimal,
    pub priced_percentage: Decimal,
    pub total_budget: Decimal,
    pub total_backing: Decimal,
    pub payouts: Vec<Payout>,
    pub whale: WhaleSummary,
}

impl AllocationReport {
    pub fn total_paid(&self) -> Decimal {
        self.payouts.iter().map(|p| p.final_bribe).sum()
    }

    /// Rebuild the budget-stage view, e.g. to feed the reflection stage
    pub fn allocation(&self) -> Allocation {
        Allocation {
            mode: self.mode,
            sponsor_choices: self.sponsor_choices.clone(),
            priced_percentage: self.priced_percentage,
            total_budget: self.total_budget,
            total_backing: self.total_backing,
            total_vote_power: self.total_vote_power,
            payouts: self.payouts.clone(),
        }
    }
}

/// The single parameterized pipeline. Holds one validated, immutable config.
#[derive(Debug, Clone)]
pub struct AllocationEngine {
    config: AllocationConfig,
}

impl AllocationEngine {
    pub fn new(config: AllocationConfig) -> AllocationResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    fn budget_params(&self) -> BudgetParams {
        BudgetParams {
            rate_per_one_percent: self.config.rate_per_one_percent,
            max_choice_percentage: self.config.max_choice_percentage,
            total_budget_cap: self.config.total_budget_cap,
            min_chain_percentage: self.config.min_chain_percentage,
            allow_ineligible_sponsor: self.config.allow_ineligible_sponsor,
        }
    }

    /// Run the primary allocation over a frozen round
    pub fn run(&self, round: &RoundInput) -> AllocationResult<AllocationReport> {
        let cfg = &self.config;
        if round.proposal_id != cfg.proposal_id {
            return Err(AllocationError::DataUnavailable(format!(
                "round is for proposal {} but config expects {}",
                round.proposal_id, cfg.proposal_id
            )));
        }

        let sponsor: Vec<ChoiceId> = cfg
            .sponsor_choices
            .iter()
            .map(|label| round.choice_by_label(label).map(|c| c.id))
            .collect::<AllocationResult<_>>()?;

        let tally = aggregate::tally(&round.choices, &round.votes)?;
        let tally = eligibility::filter_eligibility(tally, cfg.min_chain_percentage);
        let tally = cap::normalize_caps(tally, cfg.max_choice_percentage, cfg.cap_max_iterations)?;
        let allocation = budget::allocate_budget(&tally, &round.votes, &sponsor, &self.budget_params())?;
        let (allocation, whale) = whale::adjust_whales(allocation, &cfg.whale);

        let report = AllocationReport {
            proposal_id: round.proposal_id.clone(),
            mode: allocation.mode,
            sponsor_choices: allocation.sponsor_choices,
            choice_totals: tally.choices,
            chain_totals: tally.chains,
            total_vote_power: allocation.total_vote_power,
            priced_percentage: allocation.priced_percentage,
            total_budget: allocation.total_budget,
            total_backing: allocation.total_backing,
            payouts: allocation.payouts,
            whale,
        };

        info!(
            "[ENGINE] proposal {}: budget {} -> paid {} to {} voters",
            report.proposal_id,
            report.total_budget.round_dp(6),
            report.total_paid().round_dp(6),
            report.payouts.iter().filter(|p| p.final_bribe > Decimal::ZERO).count()
        );
        Ok(report)
    }

    /// Derive the reflection round from a finished primary report
    pub fn reflect(
        &self,
        report: &AllocationReport,
        reflection: &RoundInput,
    ) -> AllocationResult<ReflectionOutcome> {
        let cfg = self.config.reflection.as_ref().ok_or_else(|| {
            AllocationError::InvalidConfig("no [reflection] section configured".into())
        })?;
        if reflection.proposal_id != cfg.proposal_id {
            return Err(AllocationError::DataUnavailable(format!(
                "reflection round is for proposal {} but config expects {}",
                reflection.proposal_id, cfg.proposal_id
            )));
        }
        reflection::derive_reflection(
            &report.allocation(),
            reflection,
            cfg,
            self.config.rate_per_one_percent,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Choice, VoteRecord};
    use rust_decimal_macros::dec;

    #[test]
    fn test_engine_rejects_invalid_config() {
        let err = AllocationEngine::new(AllocationConfig::default()).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidConfig(_)));
    }

    #[test]
    fn test_engine_rejects_wrong_round_and_unknown_sponsor() {
        let engine = AllocationEngine::new(AllocationConfig {
            proposal_id: "0xp".into(),
            sponsor_choices: vec!["WBTC (Arbitrum)".into()],
            rate_per_one_percent: dec!(1),
            ..AllocationConfig::default()
        })
        .unwrap();

        let mut round = RoundInput {
            proposal_id: "0xother".into(),
            choices: Choice::from_labels(["WETH (Arbitrum)"]),
            votes: vec![VoteRecord::new("0xa", dec!(1)).with_weight(1, dec!(1))],
        };
        assert!(matches!(
            engine.run(&round),
            Err(AllocationError::DataUnavailable(_))
        ));

        round.proposal_id = "0xp".into();
        assert!(matches!(
            engine.run(&round),
            Err(AllocationError::UnknownChoice { .. })
        ));
    }
}
