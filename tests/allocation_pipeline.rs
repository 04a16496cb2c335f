use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use vote_bribes::config::{RateSource, ReflectionConfig, WhaleConfig};
use vote_bribes::engine::AllocationMode;
use vote_bribes::model::{ReflectionBribe, WhaleClass};
use vote_bribes::report::disbursement_lines;
use vote_bribes::{AllocationConfig, AllocationEngine, AllocationError, Choice, RoundInput, VoteRecord};

fn vote(voter: &str, vp: Decimal, choice: u32) -> VoteRecord {
    VoteRecord::new(voter, vp).with_weight(choice, dec!(1))
}

fn config(proposal: &str, sponsor: &[&str], rate: Decimal) -> AllocationConfig {
    AllocationConfig {
        proposal_id: proposal.into(),
        sponsor_choices: sponsor.iter().map(|s| s.to_string()).collect(),
        rate_per_one_percent: rate,
        ..AllocationConfig::default()
    }
}

fn close(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() < dec!(0.000000000001)
}

fn three_chain_round() -> RoundInput {
    RoundInput {
        proposal_id: "0xgauge".into(),
        choices: Choice::from_labels(["A (Arbitrum)", "B (Base)", "C (Optimism)"]),
        votes: vec![
            vote("0xa", dec!(30), 1),
            vote("0xb", dec!(50), 2),
            vote("0xc", dec!(20), 3),
        ],
    }
}

#[test]
fn whale_clawback_keeps_redistributed_share() {
    let round = RoundInput {
        proposal_id: "0xgauge".into(),
        choices: Choice::from_labels(["WBTC (Arbitrum)", "WETH (Base)"]),
        votes: vec![
            vote("0xsmall", dec!(100), 1),
            vote("0xwhale", dec!(300000), 1),
            vote("0xtiny", dec!(50), 1),
            vote("0xother", dec!(99850), 2),
        ],
    };
    let mut cfg = config("0xgauge", &["WBTC (Arbitrum)"], dec!(10));
    cfg.whale = WhaleConfig {
        voting_power_threshold: Some(dec!(250000)),
        redistribution_percent: dec!(20),
        ..WhaleConfig::default()
    };

    let report = AllocationEngine::new(cfg).unwrap().run(&round).unwrap();
    assert_eq!(report.mode, AllocationMode::Single);
    assert_eq!(report.total_budget, dec!(750.375));

    let whale = report.payouts.iter().find(|p| p.voter == "0xwhale").unwrap();
    assert_eq!(whale.whale_class, WhaleClass::ClawedBack);
    assert_eq!(whale.final_bribe, Decimal::ZERO);

    let expected = report.total_budget - whale.raw_bribe * dec!(0.8);
    assert!(close(report.total_paid(), expected));
    assert!(close(report.whale.retained, whale.raw_bribe * dec!(0.8)));

    // bonus follows backing: 0xsmall backs twice what 0xtiny does
    let small = report.payouts.iter().find(|p| p.voter == "0xsmall").unwrap();
    let tiny = report.payouts.iter().find(|p| p.voter == "0xtiny").unwrap();
    assert!(close(small.whale_adjustment, tiny.whale_adjustment * dec!(2)));
    assert!(small.final_bribe > small.raw_bribe);
}

#[test]
fn ineligible_sponsor_fails_or_pays_nothing() {
    let round = three_chain_round();
    let mut cfg = config("0xgauge", &["C (Optimism)"], dec!(100));
    cfg.min_chain_percentage = dec!(25);

    let err = AllocationEngine::new(cfg.clone()).unwrap().run(&round).unwrap_err();
    match err {
        AllocationError::ThresholdNotMet { chain, percentage, threshold, .. } => {
            assert_eq!(chain, "Optimism");
            assert_eq!(percentage, dec!(20));
            assert_eq!(threshold, dec!(25));
        }
        other => panic!("unexpected error {:?}", other),
    }

    cfg.allow_ineligible_sponsor = true;
    let report = AllocationEngine::new(cfg).unwrap().run(&round).unwrap();
    assert_eq!(report.total_budget, Decimal::ZERO);
    assert!(report.payouts.iter().all(|p| p.final_bribe.is_zero()));
    assert!(disbursement_lines(&report, None).is_empty());
}

#[test]
fn eligible_share_is_renormalized_over_passing_chains() {
    let round = three_chain_round();
    let mut cfg = config("0xgauge", &["B (Base)"], dec!(2));
    cfg.min_chain_percentage = dec!(25);

    let report = AllocationEngine::new(cfg).unwrap().run(&round).unwrap();
    let c = report.choice_totals.iter().find(|t| t.chain == "Optimism").unwrap();
    assert!(!c.is_eligible);
    assert_eq!(c.eligible_percentage, Decimal::ZERO);

    let a = report.choice_totals.iter().find(|t| t.chain == "Arbitrum").unwrap();
    assert_eq!(a.eligible_percentage, dec!(37.5));

    // single mode prices on min(capped, raw): raw 50 < eligible 62.5
    assert_eq!(report.priced_percentage, dec!(50));
    assert_eq!(report.total_budget, dec!(100));
    assert_eq!(report.payouts.len(), 1);
    assert_eq!(report.payouts[0].final_bribe, dec!(100));
}

#[test]
fn capped_choice_prices_at_cap() {
    let round = RoundInput {
        proposal_id: "0xgauge".into(),
        choices: Choice::from_labels(["A (Base)", "B (Base)", "C (Base)"]),
        votes: vec![
            vote("0xa", dec!(10), 1),
            vote("0xb", dec!(70), 2),
            vote("0xc", dec!(20), 3),
        ],
    };
    let mut cfg = config("0xgauge", &["B (Base)"], dec!(1));
    cfg.max_choice_percentage = Some(dec!(40));

    let report = AllocationEngine::new(cfg).unwrap().run(&round).unwrap();
    let capped: Vec<Decimal> = report.choice_totals.iter().map(|t| t.capped_percentage).collect();
    assert_eq!(capped, vec![dec!(20), dec!(40), dec!(40)]);
    assert_eq!(report.total_budget, dec!(40));
}

#[test]
fn paired_mode_pays_even_splits_only() {
    let round = RoundInput {
        proposal_id: "0xgauge".into(),
        choices: Choice::from_labels(["X (Arbitrum)", "Y (Arbitrum)", "Z (Base)"]),
        votes: vec![
            VoteRecord::new("0xeven", dec!(100)).with_weight(1, dec!(1)).with_weight(2, dec!(1)),
            VoteRecord::new("0xlopsided", dec!(100)).with_weight(1, dec!(2)).with_weight(2, dec!(1)),
            vote("0xz", dec!(200), 3),
            VoteRecord::new("0xmixed", dec!(100))
                .with_weight(1, dec!(1))
                .with_weight(2, dec!(1))
                .with_weight(3, dec!(2)),
        ],
    };
    let cfg = config("0xgauge", &["X (Arbitrum)", "Y (Arbitrum)"], dec!(2));

    let report = AllocationEngine::new(cfg).unwrap().run(&round).unwrap();
    assert_eq!(report.mode, AllocationMode::Paired);
    assert_eq!(report.priced_percentage, dec!(30));
    assert_eq!(report.total_budget, dec!(60));

    let voters: Vec<(&str, Decimal)> = report
        .payouts
        .iter()
        .map(|p| (p.voter.as_str(), p.final_bribe))
        .collect();
    assert_eq!(voters, vec![("0xeven", dec!(40)), ("0xmixed", dec!(20))]);
}

#[test]
fn same_round_same_report() {
    let round = three_chain_round();
    let mut cfg = config("0xgauge", &["B (Base)"], dec!(3));
    cfg.max_choice_percentage = Some(dec!(45));
    let engine = AllocationEngine::new(cfg).unwrap();

    let first = engine.run(&round).unwrap();
    let second = engine.run(&round).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

fn reflection_rounds() -> (RoundInput, RoundInput) {
    let primary = RoundInput {
        proposal_id: "0xgauge".into(),
        choices: Choice::from_labels(["WBTC (Arbitrum)", "WETH (Base)"]),
        votes: vec![
            vote("0xProxy", dec!(400), 1),
            vote("0xa", dec!(100), 1),
            vote("0xb", dec!(500), 2),
        ],
    };
    let reflection = RoundInput {
        proposal_id: "0xmirror".into(),
        choices: Choice::from_labels(["For (Arbitrum)", "Against (Arbitrum)"]),
        votes: vec![
            vote("0xr1", dec!(30), 1),
            vote("0xr2", dec!(10), 1),
            vote("0xr3", dec!(60), 2),
        ],
    };
    (primary, reflection)
}

fn reflection_config(proxy: &str) -> AllocationConfig {
    let mut cfg = config("0xgauge", &["WBTC (Arbitrum)"], dec!(2));
    cfg.reflection = Some(ReflectionConfig {
        proposal_id: "0xmirror".into(),
        proxy_address: proxy.into(),
        mirrored_choices: vec!["For (Arbitrum)".into()],
        rate_source: RateSource::Configured,
    });
    cfg
}

#[test]
fn settled_reflection_replaces_proxy_in_export() {
    let (primary, mirror) = reflection_rounds();
    let engine = AllocationEngine::new(reflection_config("0xproxy")).unwrap();

    let report = engine.run(&primary).unwrap();
    assert_eq!(report.total_budget, dec!(100));

    let outcome = engine.reflect(&report, &mirror).unwrap();
    let settled = outcome.settled().unwrap();
    assert_eq!(settled.percent_bribed, dec!(0.4));
    assert_eq!(settled.proxy_qualifying_percent, dec!(16));
    assert_eq!(settled.total_budget, dec!(32));
    assert!(settled.total_budget <= settled.proxy_final_bribe);

    let lines = disbursement_lines(&report, Some(&outcome));
    assert_eq!(
        lines,
        vec![
            "0xr1=24.0000000000".to_string(),
            "0xa=20.0000000000".to_string(),
            "0xr2=8.0000000000".to_string(),
        ]
    );
}

#[test]
fn missing_proxy_leaves_reflection_pending() {
    let (primary, mirror) = reflection_rounds();
    let engine = AllocationEngine::new(reflection_config("0xnobody")).unwrap();

    let report = engine.run(&primary).unwrap();
    let outcome = engine.reflect(&report, &mirror).unwrap();
    assert!(outcome.is_pending());
    assert_eq!(outcome.payouts().len(), 3);
    assert!(outcome.payouts().iter().all(|p| p.bribe == ReflectionBribe::Pending));
    assert!(matches!(
        outcome.settled(),
        Err(AllocationError::PendingExternalVote { .. })
    ));

    // primary payouts are still exported, reflection voters are not
    let lines = disbursement_lines(&report, Some(&outcome));
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| !l.starts_with("0xr")));
}

#[test]
fn reflect_without_section_is_config_error() {
    let (primary, mirror) = reflection_rounds();
    let engine = AllocationEngine::new(config("0xgauge", &["WBTC (Arbitrum)"], dec!(2))).unwrap();
    let report = engine.run(&primary).unwrap();
    assert!(matches!(
        engine.reflect(&report, &mirror),
        Err(AllocationError::InvalidConfig(_))
    ));
}
