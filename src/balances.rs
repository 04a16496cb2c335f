//! On-chain Voting Power Override
//!
//! Some rounds price votes on a token balance instead of the hub's voting
//! power. Balances are looked up once per voter, in bounded batches with a
//! pause between batches so public RPC endpoints don't rate-limit us.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::future::join_all;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::config::BalanceConfig;
use crate::model::{address_key, VoteRecord};

/// ERC-20 `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Anything that can answer "what is this address's balance"
pub trait BalanceSource {
    fn balance_of(&self, address: &str) -> Option<Decimal>;
}

/// Frozen address -> balance map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    balances: BTreeMap<String, Decimal>,
}

impl BalanceSnapshot {
    pub fn insert(&mut self, address: &str, balance: Decimal) {
        self.balances.insert(address_key(address), balance);
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

impl BalanceSource for BalanceSnapshot {
    fn balance_of(&self, address: &str) -> Option<Decimal> {
        self.balances.get(&address_key(address)).copied()
    }
}

/// Replace each voter's voting power with its balance where the source has one
pub fn apply_balance_overrides<S: BalanceSource>(votes: &mut [VoteRecord], source: &S) -> usize {
    let mut replaced = 0;
    for vote in votes.iter_mut() {
        if let Some(balance) = source.balance_of(&vote.voter) {
            vote.voting_power = balance;
            replaced += 1;
        }
    }
    info!(
        "[BALANCES] overrode voting power for {} of {} voters",
        replaced,
        votes.len()
    );
    replaced
}

/// ABI-encode `balanceOf(address)`
fn balance_of_calldata(address: &str) -> Result<String> {
    let raw = address.trim().trim_start_matches("0x");
    let bytes = hex::decode(raw).with_context(|| format!("address {} is not hex", address))?;
    if bytes.len() != 20 {
        return Err(anyhow!("address {} is not 20 bytes", address));
    }
    Ok(format!("0x{}{:0>64}", BALANCE_OF_SELECTOR, hex::encode(bytes)))
}

/// Decode a uint256 hex result scaled down by `decimals`
fn decode_balance(result: &str, decimals: u32) -> Result<Decimal> {
    let raw = result.trim().trim_start_matches("0x");
    let digits = raw.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(Decimal::ZERO);
    }
    if digits.len() > 32 {
        return Err(anyhow!("balance {} does not fit in 128 bits", result));
    }
    let value = u128::from_str_radix(digits, 16).with_context(|| format!("bad balance hex {}", result))?;
    let value = i128::try_from(value).map_err(|_| anyhow!("balance {} overflows", result))?;
    Decimal::try_from_i128_with_scale(value, decimals)
        .map_err(|e| anyhow!("balance {} out of decimal range: {}", result, e))
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

/// fetchOnChainBalance over JSON-RPC `eth_call`
#[derive(Debug, Clone)]
pub struct Erc20BalanceClient {
    http: Client,
    cfg: BalanceConfig,
}

impl Erc20BalanceClient {
    pub fn new(cfg: BalanceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("build http client")?;
        Ok(Self { http, cfg })
    }

    pub async fn fetch_balance(&self, address: &str) -> Result<Decimal> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                { "to": self.cfg.token_address, "data": balance_of_calldata(address)? },
                "latest"
            ]
        });
        let resp: RpcResponse = self
            .http
            .post(&self.cfg.rpc_url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("eth_call balanceOf({})", address))?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = resp.error {
            return Err(anyhow!("rpc error for {}: {}", address, err.message));
        }
        let result = resp.result.ok_or_else(|| anyhow!("rpc returned no result for {}", address))?;
        decode_balance(&result, self.cfg.token_decimals)
    }

    /// Look up every address, `batch_size` at a time with `batch_delay_ms` between batches
    pub async fn fetch_snapshot(&self, addresses: &[String]) -> Result<BalanceSnapshot> {
        fetch_in_batches(
            addresses,
            self.cfg.batch_size,
            Duration::from_millis(self.cfg.batch_delay_ms),
            |address| self.fetch_balance(address),
        )
        .await
    }
}

/// Run `lookup` over `addresses` in concurrent chunks of `batch_size`,
/// sleeping `delay` between chunks. The first failed lookup aborts the run.
async fn fetch_in_batches<'a, F, Fut>(
    addresses: &'a [String],
    batch_size: usize,
    delay: Duration,
    lookup: F,
) -> Result<BalanceSnapshot>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<Decimal>>,
{
    let mut snapshot = BalanceSnapshot::default();
    let batches: Vec<&'a [String]> = addresses.chunks(batch_size.max(1)).collect();

    for (idx, batch) in batches.iter().enumerate() {
        let results = join_all(batch.iter().map(|a| lookup(a.as_str()))).await;
        for (address, result) in batch.iter().zip(results) {
            match result {
                Ok(balance) => snapshot.insert(address, balance),
                Err(e) => {
                    warn!("[BALANCES] lookup failed for {}: {}", address, e);
                    return Err(e);
                }
            }
        }
        if idx + 1 < batches.len() && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    info!("[BALANCES] fetched {} balances in {} batches", snapshot.len(), batches.len());
    Ok(snapshot)
}
