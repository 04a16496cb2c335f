//! Eligibility gating: chains below the minimum vote share forfeit the round
//! and their share is redistributed to chains that cleared the bar.

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::aggregate::VoteTally;

/// Zero the working votes of every choice on a chain below `min_chain_percentage`
/// and recompute percentages over what remains. Raw totals are left untouched.
pub fn filter_eligibility(mut tally: VoteTally, min_chain_percentage: Decimal) -> VoteTally {
    let mut failing: Vec<String> = Vec::new();
    for chain in &tally.chains {
        if chain.percentage < min_chain_percentage {
            warn!(
                "[ELIGIBILITY] chain {} below threshold: {}% < {}%",
                chain.chain,
                chain.percentage.round_dp(4),
                min_chain_percentage
            );
            failing.push(chain.chain.clone());
        }
    }

    for row in tally.choices.iter_mut() {
        row.is_eligible = !failing.contains(&row.chain);
        row.eligible_votes = if row.is_eligible {
            row.raw_votes
        } else {
            Decimal::ZERO
        };
    }

    let eligible_total: Decimal = tally.choices.iter().map(|c| c.eligible_votes).sum();
    for row in tally.choices.iter_mut() {
        row.eligible_percentage = if eligible_total.is_zero() {
            Decimal::ZERO
        } else {
            row.eligible_votes * Decimal::ONE_HUNDRED / eligible_total
        };
        row.capped_percentage = row.eligible_percentage;
    }

    info!(
        "[ELIGIBILITY] {} of {} chains cleared {}%",
        tally.chains.len() - failing.len(),
        tally.chains.len(),
        min_chain_percentage
    );
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregate::tally;
    use crate::model::{Choice, VoteRecord};
    use rust_decimal_macros::dec;

    #[test]
    fn test_failing_chain_is_zeroed_and_share_redistributed() {
        let choices = Choice::from_labels(["A1 (ChainA)", "B1 (ChainB)", "C1 (ChainC)"]);
        let votes = vec![
            VoteRecord::new("0x1", dec!(30)).with_weight(1, dec!(1)),
            VoteRecord::new("0x2", dec!(50)).with_weight(2, dec!(1)),
            VoteRecord::new("0x3", dec!(20)).with_weight(3, dec!(1)),
        ];

        let filtered = filter_eligibility(tally(&choices, &votes).unwrap(), dec!(25));

        let c = filtered.get(3).unwrap();
        assert!(!c.is_eligible);
        assert_eq!(c.eligible_votes, Decimal::ZERO);
        assert_eq!(c.raw_votes, dec!(20));
        assert_eq!(c.raw_percentage, dec!(20));

        assert_eq!(filtered.get(1).unwrap().eligible_percentage, dec!(37.5));
        assert_eq!(filtered.get(2).unwrap().eligible_percentage, dec!(62.5));
    }

    #[test]
    fn test_zero_threshold_keeps_everything() {
        let choices = Choice::from_labels(["A1 (ChainA)", "B1 (ChainB)"]);
        let votes = vec![
            VoteRecord::new("0x1", dec!(1)).with_weight(1, dec!(1)),
            VoteRecord::new("0x2", dec!(3)).with_weight(2, dec!(1)),
        ];

        let filtered = filter_eligibility(tally(&choices, &votes).unwrap(), Decimal::ZERO);
        assert!(filtered.choices.iter().all(|c| c.is_eligible));
        assert_eq!(filtered.get(1).unwrap().eligible_percentage, dec!(25));
    }
}
