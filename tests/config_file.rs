use std::fs;

use rust_decimal_macros::dec;
use tempfile::TempDir;

use vote_bribes::config::{RateSource, DEFAULT_SNAPSHOT_ENDPOINT};
use vote_bribes::load_config;

fn write(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("bribes.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn full_config_loads() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        r#"
proposal_id = "0xgauge"
sponsor_choices = ["WBTC (Arbitrum)"]
rate_per_one_percent = "1250.5"
min_chain_percentage = 5
max_choice_percentage = 25
total_budget_cap = 50000

[whale]
voting_power_threshold = 250000
redistribution_percent = 20
exempt_addresses = ["0xTreasury"]
forced_zero_addresses = ["0xDeployer"]

[reflection]
proposal_id = "0xmirror"
proxy_address = "0xProxy"
mirrored_choices = ["For (Arbitrum)"]
rate_source = "proxy_realized"

[snapshot]
page_size = 500

[balances]
rpc_url = "http://127.0.0.1:8545"
token_address = "0x0000000000000000000000000000000000000001"
"#,
    );

    let cfg = load_config(&path).unwrap();
    assert_eq!(cfg.rate_per_one_percent, dec!(1250.5));
    assert_eq!(cfg.max_choice_percentage, Some(dec!(25)));
    assert_eq!(cfg.total_budget_cap, Some(dec!(50000)));
    assert_eq!(cfg.cap_max_iterations, 100);
    assert!(cfg.whale.exempt_set().contains("0xtreasury"));
    assert!(cfg.whale.forced_zero_set().contains("0xdeployer"));

    let reflection = cfg.reflection.unwrap();
    assert_eq!(reflection.rate_source, RateSource::ProxyRealized);

    assert_eq!(cfg.snapshot.endpoint, DEFAULT_SNAPSHOT_ENDPOINT);
    assert_eq!(cfg.snapshot.page_size, 500);

    let balances = cfg.balances.unwrap();
    assert_eq!(balances.token_decimals, 18);
    assert_eq!(balances.batch_size, 10);
}

#[test]
fn minimal_config_takes_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        r#"
proposal_id = "0xgauge"
sponsor_choices = ["A (Base)", "B (Base)"]
rate_per_one_percent = 10
"#,
    );

    let cfg = load_config(&path).unwrap();
    assert!(cfg.reflection.is_none());
    assert!(cfg.balances.is_none());
    assert!(cfg.whale.voting_power_threshold.is_none());
    assert!(!cfg.allow_ineligible_sponsor);
}

#[test]
fn invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();

    let path = write(
        &dir,
        r#"
proposal_id = "0xgauge"
sponsor_choices = ["A (Base)", "B (Base)", "C (Base)"]
rate_per_one_percent = 10
"#,
    );
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("sponsor_choices"));

    let path = write(
        &dir,
        r#"
proposal_id = "0xgauge"
sponsor_choices = ["A (Base)"]
rate_per_one_percent = 10
max_choice_percentage = 120
"#,
    );
    assert!(load_config(&path).is_err());

    assert!(load_config(dir.path().join("missing.toml")).is_err());
}
