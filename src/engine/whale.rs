//! Whale adjustment: claw back large holders' bribes, optionally hand part of
//! the clawback to the remaining voters, and force configured addresses to zero.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::budget::Allocation;
use crate::config::WhaleConfig;
use crate::model::{address_key, WhaleClass};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhaleSummary {
    pub clawed_back: Decimal,
    pub redistributed: Decimal,
    /// Clawback that was not handed back out
    pub retained: Decimal,
    /// Raw bribes removed by the forced-zero list outside of clawback
    pub forced_zeroed: Decimal,
    pub whales: usize,
    pub exempt: usize,
}

/// Apply clawback, redistribution and forced zeroing, then settle
/// `final_bribe = raw_bribe + whale_adjustment` for every payout.
///
/// Redistribution recipients are voters at or below the threshold that are not
/// forced to zero; each receives its backing power's share of the recipients'
/// total backing, so the bonuses sum to exactly the redistribution pool.
/// Exempt whales keep their raw bribe and take no redistribution.
pub fn adjust_whales(mut allocation: Allocation, cfg: &WhaleConfig) -> (Allocation, WhaleSummary) {
    let exempt = cfg.exempt_set();
    let forced_zero = cfg.forced_zero_set();
    let mut summary = WhaleSummary::default();

    for payout in allocation.payouts.iter_mut() {
        let key = address_key(&payout.voter);
        let is_whale = cfg
            .voting_power_threshold
            .map(|t| payout.voting_power > t)
            .unwrap_or(false);

        payout.whale_adjustment = Decimal::ZERO;
        payout.whale_class = WhaleClass::Regular;

        if is_whale && exempt.contains(&key) {
            payout.whale_class = WhaleClass::Exempt;
            summary.exempt += 1;
        } else if is_whale {
            payout.whale_class = WhaleClass::ClawedBack;
            payout.whale_adjustment = -payout.raw_bribe;
            summary.clawed_back += payout.raw_bribe;
            summary.whales += 1;
        }

        if forced_zero.contains(&key) {
            if payout.whale_class != WhaleClass::ClawedBack {
                summary.forced_zeroed += payout.raw_bribe;
            }
            payout.whale_class = WhaleClass::ForcedZero;
            payout.whale_adjustment = -payout.raw_bribe;
        }
    }

    let pool = summary.clawed_back * cfg.redistribution_percent / Decimal::ONE_HUNDRED;
    let recipients: BTreeSet<usize> = allocation
        .payouts
        .iter()
        .enumerate()
        .filter(|(_, p)| p.whale_class == WhaleClass::Regular)
        .map(|(idx, _)| idx)
        .collect();
    let recipient_backing: Decimal = recipients
        .iter()
        .map(|idx| allocation.payouts[*idx].backing_power)
        .sum();

    if pool > Decimal::ZERO && recipient_backing > Decimal::ZERO {
        for idx in &recipients {
            let payout = &mut allocation.payouts[*idx];
            let bonus = payout.backing_power * pool / recipient_backing;
            payout.whale_adjustment = bonus;
            summary.redistributed += bonus;
        }
    }
    summary.retained = summary.clawed_back - summary.redistributed;

    for payout in allocation.payouts.iter_mut() {
        payout.final_bribe = payout.raw_bribe + payout.whale_adjustment;
    }

    if summary.whales > 0 || summary.forced_zeroed > Decimal::ZERO {
        info!(
            "[WHALE] clawed back {} from {} whales ({} exempt), redistributed {}, retained {}, forced-zeroed {}",
            summary.clawed_back.round_dp(6),
            summary.whales,
            summary.exempt,
            summary.redistributed.round_dp(6),
            summary.retained.round_dp(6),
            summary.forced_zeroed.round_dp(6)
        );
    }
    (allocation, summary)
}
