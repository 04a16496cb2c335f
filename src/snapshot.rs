//! Snapshot Hub Source
//!
//! Fetches proposal choices and the full vote set from a Snapshot-style
//! GraphQL hub. Votes are paged (`first`/`skip`) until a short page comes back.

use std::collections::BTreeMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::DateTime;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::SnapshotConfig;
use crate::error::{AllocationError, AllocationResult};
use crate::model::{Choice, ChoiceId, RoundInput, VoteRecord};

const PROPOSAL_QUERY: &str = r#"
query Proposal($id: String!) {
  proposals(where: { id: $id }) {
    id
    title
    state
    choices
    author
  }
}"#;

const VOTES_QUERY: &str = r#"
query Votes($id: String!, $first: Int!, $skip: Int!) {
  votes(
    first: $first
    skip: $skip
    where: { proposal: $id }
    orderBy: "created"
    orderDirection: desc
  ) {
    voter
    vp
    created
    choice
  }
}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    pub choices: Vec<String>,
    #[serde(default)]
    pub author: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ProposalsData {
    proposals: Vec<ProposalInfo>,
}

#[derive(Debug, Deserialize)]
struct VotesData {
    votes: Vec<RawVote>,
}

/// A vote as the hub returns it
#[derive(Debug, Clone, Deserialize)]
pub struct RawVote {
    pub voter: String,
    pub vp: serde_json::Number,
    #[serde(default)]
    pub created: i64,
    pub choice: RawChoice,
}

/// The three ballot encodings a hub may return
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawChoice {
    /// single-choice / basic: one 1-based index
    Single(ChoiceId),
    /// approval / ranked: every listed index weighted equally
    Approval(Vec<ChoiceId>),
    /// weighted / quadratic: index (as string) -> weight
    Weighted(BTreeMap<String, serde_json::Number>),
}

fn parse_number(n: &serde_json::Number) -> AllocationResult<Decimal> {
    let s = n.to_string();
    Decimal::from_str(&s)
        .or_else(|_| Decimal::from_scientific(&s))
        .map_err(|e| AllocationError::DataUnavailable(format!("unparseable number {}: {}", s, e)))
}

impl RawChoice {
    pub fn weights(&self) -> AllocationResult<BTreeMap<ChoiceId, Decimal>> {
        let mut weights = BTreeMap::new();
        match self {
            RawChoice::Single(id) => {
                weights.insert(*id, Decimal::ONE);
            }
            RawChoice::Approval(ids) => {
                for id in ids {
                    weights.insert(*id, Decimal::ONE);
                }
            }
            RawChoice::Weighted(map) => {
                for (key, weight) in map {
                    let id: ChoiceId = key.parse().map_err(|_| {
                        AllocationError::DataUnavailable(format!("bad choice index {:?}", key))
                    })?;
                    *weights.entry(id).or_insert(Decimal::ZERO) += parse_number(weight)?;
                }
            }
        }
        Ok(weights)
    }
}

impl RawVote {
    pub fn into_record(self) -> AllocationResult<VoteRecord> {
        Ok(VoteRecord {
            weights: self.choice.weights()?,
            voting_power: parse_number(&self.vp)?,
            timestamp: DateTime::from_timestamp(self.created, 0),
            voter: self.voter,
        })
    }
}

/// Request `(first, skip)` pages until one comes back short.
///
/// A total that is an exact multiple of `page_size` costs one extra, empty page.
async fn collect_pages<T, F, Fut>(page_size: usize, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let page_size = page_size.max(1);
    let mut items = Vec::new();
    let mut page = 0usize;
    loop {
        let batch = fetch_page(page_size, page * page_size).await?;
        let count = batch.len();
        debug!("[SNAPSHOT] page {} returned {} items", page, count);

        items.extend(batch);
        if count < page_size {
            break;
        }
        page += 1;
    }
    Ok(items)
}

#[derive(Debug, Clone)]
pub struct SnapshotClient {
    http: Client,
    endpoint: String,
    page_size: usize,
}

impl SnapshotClient {
    pub fn new(cfg: &SnapshotConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            page_size: cfg.page_size.max(1),
        })
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: serde_json::Value) -> Result<T> {
        let resp: GraphQlResponse<T> = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?
            .error_for_status()?
            .json()
            .await
            .context("decode graphql response")?;

        if !resp.errors.is_empty() {
            let messages: Vec<String> = resp.errors.into_iter().map(|e| e.message).collect();
            return Err(AllocationError::DataUnavailable(messages.join("; ")).into());
        }
        resp.data
            .ok_or_else(|| AllocationError::DataUnavailable("graphql response has no data".into()).into())
    }

    /// fetchChoices: proposal metadata with ordered choice labels
    pub async fn fetch_proposal(&self, proposal_id: &str) -> Result<ProposalInfo> {
        let data: ProposalsData = self.query(PROPOSAL_QUERY, json!({ "id": proposal_id })).await?;
        let proposal = data.proposals.into_iter().next().ok_or_else(|| {
            AllocationError::DataUnavailable(format!("proposal {} not found", proposal_id))
        })?;
        if proposal.choices.is_empty() {
            return Err(AllocationError::DataUnavailable(format!(
                "proposal {} has no choices",
                proposal_id
            ))
            .into());
        }
        info!(
            "[SNAPSHOT] proposal {} ({:?}, {}) with {} choices",
            proposal.id,
            proposal.title,
            proposal.state,
            proposal.choices.len()
        );
        Ok(proposal)
    }

    /// fetchVotes: every vote on the proposal, pagination resolved here
    pub async fn fetch_votes(&self, proposal_id: &str) -> Result<Vec<VoteRecord>> {
        let raw = collect_pages(self.page_size, |first, skip| async move {
            let data: VotesData = self
                .query(
                    VOTES_QUERY,
                    json!({ "id": proposal_id, "first": first, "skip": skip }),
                )
                .await?;
            Ok(data.votes)
        })
        .await?;

        let votes = raw
            .into_iter()
            .map(RawVote::into_record)
            .collect::<AllocationResult<Vec<_>>>()?;
        info!("[SNAPSHOT] fetched {} votes for {}", votes.len(), proposal_id);
        Ok(votes)
    }

    /// Fetch and freeze a whole round
    pub async fn fetch_round(&self, proposal_id: &str) -> Result<RoundInput> {
        let proposal = self.fetch_proposal(proposal_id).await?;
        let votes = self.fetch_votes(proposal_id).await?;
        Ok(RoundInput {
            proposal_id: proposal.id,
            choices: Choice::from_labels(proposal.choices),
            votes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn vote(json: &str) -> RawVote {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_choice_encodings() {
        let single = vote(r#"{"voter":"0xa","vp":12.5,"created":1700000000,"choice":2}"#);
        assert_eq!(single.choice, RawChoice::Single(2));
        let record = single.into_record().unwrap();
        assert_eq!(record.voting_power, dec!(12.5));
        assert_eq!(record.weights.get(&2), Some(&Decimal::ONE));
        assert!(record.timestamp.is_some());

        let approval = vote(r#"{"voter":"0xb","vp":3,"created":0,"choice":[1,3]}"#);
        let record = approval.into_record().unwrap();
        assert_eq!(record.weights.len(), 2);
        assert_eq!(record.share_of(3), dec!(0.5));

        let weighted = vote(r#"{"voter":"0xc","vp":100,"created":0,"choice":{"1":60,"4":40}}"#);
        let record = weighted.into_record().unwrap();
        assert_eq!(record.share_of(1), dec!(0.6));
        assert_eq!(record.share_of(4), dec!(0.4));
    }

    #[test]
    fn test_bad_weighted_key() {
        let bad = vote(r#"{"voter":"0xc","vp":1,"choice":{"x":1}}"#);
        assert!(matches!(
            bad.into_record(),
            Err(AllocationError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_graphql_errors_payload() {
        let resp: GraphQlResponse<VotesData> =
            serde_json::from_str(r#"{"data":null,"errors":[{"message":"rate limited"}]}"#).unwrap();
        assert!(resp.data.is_none());
        assert_eq!(resp.errors[0].message, "rate limited");
    }

    async fn paged(total: usize, page_size: usize) -> (Vec<usize>, Vec<(usize, usize)>) {
        let mut requests = Vec::new();
        let items = collect_pages(page_size, |first, skip| {
            requests.push((first, skip));
            async move { Ok((skip..total.min(skip + first)).collect::<Vec<usize>>()) }
        })
        .await
        .unwrap();
        (items, requests)
    }

    #[tokio::test]
    async fn test_paging_exact_multiple_fetches_trailing_empty_page() {
        let (items, requests) = paged(4, 2).await;
        assert_eq!(items, vec![0, 1, 2, 3]);
        assert_eq!(requests, vec![(2, 0), (2, 2), (2, 4)]);
    }

    #[tokio::test]
    async fn test_paging_stops_on_short_page() {
        let (items, requests) = paged(5, 2).await;
        assert_eq!(items.len(), 5);
        assert_eq!(requests.len(), 3);

        let (items, requests) = paged(0, 1000).await;
        assert!(items.is_empty());
        assert_eq!(requests, vec![(1000, 0)]);
    }

    #[tokio::test]
    async fn test_paging_error_aborts() {
        let mut calls = 0usize;
        let result: Result<Vec<u8>> = collect_pages(1, |_, skip| {
            calls += 1;
            async move {
                if skip == 1 {
                    Err(AllocationError::DataUnavailable("rate limited".into()).into())
                } else {
                    Ok(vec![0u8])
                }
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}
