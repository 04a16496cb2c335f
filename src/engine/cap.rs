//! Cap normalization: no single choice may capture more than `max_percentage`
//! of the reward pool. The excess is redistributed to the other eligible
//! choices in proportion to their own share, repeating until nothing is over
//! the cap.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use super::aggregate::VoteTally;
use crate::error::{AllocationError, AllocationResult};

/// Percentage points a capped value may sit above the cap
pub const CAP_TOLERANCE: Decimal = dec!(0.000000000001);

/// Rescale `capped_percentage` so no choice exceeds `max_percentage`.
///
/// Choices that hit the cap are pinned there; the remaining pool is spread over
/// the unpinned choices proportionally and the pass repeats, so each pass pins
/// at least one more choice or finishes. Fails when the ceiling is reached
/// first or the cap cannot be honored (too few choices carry votes).
pub fn normalize_caps(
    mut tally: VoteTally,
    max_percentage: Option<Decimal>,
    max_iterations: usize,
) -> AllocationResult<VoteTally> {
    let cap = match max_percentage {
        Some(cap) => cap,
        None => return Ok(tally),
    };
    if tally.choices.is_empty() {
        return Ok(tally);
    }

    let not_converged = || AllocationError::CapNotConverged {
        iterations: max_iterations,
        max_percentage: cap,
    };

    let mut pct: Vec<Decimal> = tally
        .choices
        .iter()
        .map(|c| c.eligible_percentage)
        .collect();
    let mut pinned = vec![false; pct.len()];
    let mut converged = false;

    for iteration in 0..max_iterations {
        let mut newly_pinned = 0usize;
        for (p, pin) in pct.iter_mut().zip(pinned.iter_mut()) {
            if !*pin && *p > cap + CAP_TOLERANCE {
                *p = cap;
                *pin = true;
                newly_pinned += 1;
            }
        }
        if newly_pinned == 0 {
            debug!("[CAP] converged after {} passes", iteration);
            converged = true;
            break;
        }

        let pinned_count = pinned.iter().filter(|p| **p).count();
        let remaining = Decimal::ONE_HUNDRED - cap * Decimal::from(pinned_count);
        let free_sum: Decimal = pct
            .iter()
            .zip(&pinned)
            .filter(|(_, pin)| !**pin)
            .map(|(p, _)| *p)
            .sum();

        if free_sum.is_zero() {
            // every choice with votes is pinned and the pool is still short of 100%
            return Err(not_converged());
        }

        for (p, pin) in pct.iter_mut().zip(&pinned) {
            if !*pin {
                *p = *p * remaining / free_sum;
            }
        }
        debug!(
            "[CAP] pass {}: pinned {} choices at {}%, {}% left for the rest",
            iteration + 1,
            pinned_count,
            cap,
            remaining
        );
    }

    if !converged {
        return Err(not_converged());
    }

    for (row, p) in tally.choices.iter_mut().zip(pct) {
        row.capped_percentage = p;
    }
    info!(
        "[CAP] capped {} choices at {}%",
        pinned.iter().filter(|p| **p).count(),
        cap
    );
    Ok(tally)
}
