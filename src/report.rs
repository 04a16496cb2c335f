//! Output tables and the disbursement export.
//!
//! Plain data for a presentation layer; `render_*` helpers give the console
//! view the CLI prints.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::engine::aggregate::ChoiceCount;
use crate::engine::{AllocationReport, ReflectionOutcome};
use crate::model::{address_key, ChainTotal, ChoiceTotal, ReflectionBribe};

/// Fractional digits in the `address=amount` export
pub const EXPORT_DECIMALS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceRow {
    pub choice: String,
    pub votes: Decimal,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutRow {
    pub voter: String,
    pub voting_power: Decimal,
    pub choice_share_percent: Decimal,
    pub bribe_amount: Decimal,
}

/// Per-choice totals, most votes first
pub fn choice_table(totals: &[ChoiceTotal]) -> Vec<ChoiceRow> {
    sort_choice_rows(
        totals
            .iter()
            .map(|t| ChoiceRow {
                choice: t.choice.label.clone(),
                votes: t.raw_votes,
                percentage: t.raw_percentage,
            })
            .collect(),
    )
}

/// Same table for a proposal counted without chain attribution
pub fn count_table(counts: &[ChoiceCount]) -> Vec<ChoiceRow> {
    sort_choice_rows(
        counts
            .iter()
            .map(|c| ChoiceRow {
                choice: c.choice.label.clone(),
                votes: c.votes,
                percentage: c.percentage,
            })
            .collect(),
    )
}

fn sort_choice_rows(mut rows: Vec<ChoiceRow>) -> Vec<ChoiceRow> {
    rows.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.choice.cmp(&b.choice)));
    rows
}

/// Per-chain vote share, largest first
pub fn chain_table(chains: &[ChainTotal]) -> Vec<ChainTotal> {
    let mut rows = chains.to_vec();
    rows.sort_by(|a, b| {
        b.percentage
            .cmp(&a.percentage)
            .then_with(|| a.chain.cmp(&b.chain))
    });
    rows
}

/// Per-voter payouts, largest bribe first
pub fn payout_table(report: &AllocationReport) -> Vec<PayoutRow> {
    let mut rows: Vec<PayoutRow> = report
        .payouts
        .iter()
        .map(|p| PayoutRow {
            voter: p.voter.clone(),
            voting_power: p.voting_power,
            choice_share_percent: p.choice_share * Decimal::ONE_HUNDRED,
            bribe_amount: p.final_bribe,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.bribe_amount
            .cmp(&a.bribe_amount)
            .then_with(|| a.voter.cmp(&b.voter))
    });
    rows
}

/// Truncate to the export precision; an export never rounds a payout up
pub fn export_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(EXPORT_DECIMALS, RoundingStrategy::ToZero)
}

/// `address=amount` lines for bulk disbursement.
///
/// Only nonzero amounts are listed. A settled reflection replaces the proxy's
/// own line with the reflection voters' lines; pending reflection payouts are
/// never exported. Amounts for the same address are merged.
pub fn disbursement_lines(
    report: &AllocationReport,
    reflection: Option<&ReflectionOutcome>,
) -> Vec<String> {
    let settled = reflection.and_then(|r| r.settled().ok());
    let proxy_key = settled.map(|s| address_key(&s.proxy));

    // keyed by normalized address, keeping the first spelling seen
    let mut amounts: BTreeMap<String, (String, Decimal)> = BTreeMap::new();
    let mut credit = |voter: &str, amount: Decimal| {
        let entry = amounts
            .entry(address_key(voter))
            .or_insert_with(|| (voter.to_string(), Decimal::ZERO));
        entry.1 += amount;
    };

    for payout in &report.payouts {
        if proxy_key.as_deref() == Some(address_key(&payout.voter).as_str()) {
            continue;
        }
        credit(&payout.voter, payout.final_bribe);
    }
    if let Some(settled) = settled {
        for payout in &settled.payouts {
            if let ReflectionBribe::Settled(amount) = payout.bribe {
                credit(&payout.voter, amount);
            }
        }
    }

    let mut rows: Vec<(String, Decimal)> = amounts
        .into_values()
        .map(|(voter, amount)| (voter, export_amount(amount)))
        .filter(|(_, amount)| *amount > Decimal::ZERO)
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    rows.into_iter()
        .map(|(voter, amount)| format!("{}={:.10}", voter, amount))
        .collect()
}

pub fn render_choice_table(totals: &[ChoiceTotal]) -> String {
    render_choice_rows(choice_table(totals))
}

pub fn render_count_table(counts: &[ChoiceCount]) -> String {
    render_choice_rows(count_table(counts))
}

fn render_choice_rows(rows: Vec<ChoiceRow>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<40} {:>18} {:>10}", "choice", "votes", "percentage");
    for row in rows {
        let _ = writeln!(
            out,
            "{:<40} {:>18} {:>8.2} %",
            row.choice,
            row.votes.round_dp(0),
            row.percentage.round_dp(2)
        );
    }
    out
}

pub fn render_chain_table(chains: &[ChainTotal]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<24} {:>10}", "chain", "percentage");
    for row in chain_table(chains) {
        let _ = writeln!(out, "{:<24} {:>8.2} %", row.chain, row.percentage.round_dp(2));
    }
    out
}

pub fn render_payout_table(report: &AllocationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<44} {:>18} {:>10} {:>20}",
        "voter", "voting power", "share %", "bribe"
    );
    for row in payout_table(report) {
        let _ = writeln!(
            out,
            "{:<44} {:>18.4} {:>10.2} {:>20.6}",
            row.voter,
            row.voting_power.round_dp(4),
            row.choice_share_percent.round_dp(2),
            row.bribe_amount.round_dp(6)
        );
    }
    let _ = writeln!(
        out,
        "total budget {:.6}, paid {:.6}",
        report.total_budget.round_dp(6),
        report.total_paid().round_dp(6)
    );
    out
}

pub fn render_reflection(outcome: &ReflectionOutcome) -> String {
    let mut out = String::new();
    match outcome {
        ReflectionOutcome::Pending { proposal_id, proxy, payouts } => {
            let _ = writeln!(
                out,
                "reflection {} pending: proxy {} has not voted ({} voters waiting)",
                proposal_id,
                proxy,
                payouts.len()
            );
        }
        ReflectionOutcome::Settled(settled) => {
            let _ = writeln!(
                out,
                "reflection {}: budget {:.6} ({:.4}% bribed, proxy carries {:.6}%)",
                settled.proposal_id,
                settled.total_budget.round_dp(6),
                (settled.percent_bribed * Decimal::ONE_HUNDRED).round_dp(4),
                settled.proxy_qualifying_percent.round_dp(6)
            );
            for p in &settled.payouts {
                let amount = p.bribe.amount().unwrap_or(Decimal::ZERO);
                let _ = writeln!(out, "{:<44} {:>20.6}", p.voter, amount.round_dp(6));
            }
        }
    }
    out
}
