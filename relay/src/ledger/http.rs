//! Ledger client over the node's JSON command API.
//!
//! Every call is a `POST` of `{"command": ..., ...}` to the provider URL with
//! the API version header set. Errors come back as a non-2xx status and a
//! `{"error": "..."}` body.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{
    NODE_API_VERSION, NODE_API_VERSION_HEADER, NODE_CONNECT_TIMEOUT, NODE_REQUEST_TIMEOUT,
};
use crate::pow::SealFn;
use crate::ternary::Trytes;

use super::attach::attach_bundle;
use super::{LedgerClient, LedgerError, Tips, Transaction};

#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "camelCase")]
enum NodeCommand<'a> {
    GetTransactionsToApprove { depth: u64 },
    BroadcastTransactions { trytes: &'a [Trytes] },
    StoreTransactions { trytes: &'a [Trytes] },
}

impl NodeCommand<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::GetTransactionsToApprove { .. } => "getTransactionsToApprove",
            Self::BroadcastTransactions { .. } => "broadcastTransactions",
            Self::StoreTransactions { .. } => "storeTransactions",
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeErrorBody {
    error: String,
}

/// Talks to one ledger node.
pub struct HttpLedgerClient {
    client: Client,
    provider: String,
}

impl HttpLedgerClient {
    pub fn new(provider: impl Into<String>) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(NODE_REQUEST_TIMEOUT)
            .connect_timeout(NODE_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            provider: provider.into(),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    async fn call<R: DeserializeOwned>(&self, command: NodeCommand<'_>) -> Result<R, LedgerError> {
        debug!(command = command.name(), provider = %self.provider, "node call");

        let response = self
            .client
            .post(&self.provider)
            .header(NODE_API_VERSION_HEADER, NODE_API_VERSION)
            .json(&command)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<NodeErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(LedgerError::Node {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    pub async fn get_transactions_to_approve(&self, depth: u64) -> Result<Tips, LedgerError> {
        self.call(NodeCommand::GetTransactionsToApprove { depth }).await
    }

    pub async fn broadcast_transactions(&self, trytes: &[Trytes]) -> Result<(), LedgerError> {
        self.call::<IgnoredAny>(NodeCommand::BroadcastTransactions { trytes })
            .await
            .map(|_| ())
    }

    pub async fn store_transactions(&self, trytes: &[Trytes]) -> Result<(), LedgerError> {
        self.call::<IgnoredAny>(NodeCommand::StoreTransactions { trytes })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn submit(
        &self,
        transactions: Vec<Transaction>,
        min_depth: u64,
        min_weight_magnitude: usize,
        seal: SealFn,
    ) -> Result<(), LedgerError> {
        if transactions.is_empty() {
            debug!("empty batch, nothing to submit");
            return Ok(());
        }

        let tips = self.get_transactions_to_approve(min_depth).await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let count = transactions.len();

        let attached = tokio::task::spawn_blocking(move || {
            attach_bundle(&transactions, &tips, min_weight_magnitude, seal, now_ms)
        })
        .await
        .map_err(|e| LedgerError::Worker(e.to_string()))??;

        let trytes: Vec<Trytes> = attached.iter().map(Transaction::to_trytes).collect();
        self.broadcast_transactions(&trytes).await?;
        self.store_transactions(&trytes).await?;

        info!(count, provider = %self.provider, "batch broadcast and stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::{scalar, verify};
    use serde_json::{json, Value};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MWM: usize = 3;

    fn tips_json() -> Value {
        json!({
            "trunkTransaction": "T".repeat(81),
            "branchTransaction": "B".repeat(81),
            "duration": 12
        })
    }

    fn batch(len: i64) -> Vec<Transaction> {
        (0..len)
            .map(|i| Transaction {
                current_index: i,
                last_index: len - 1,
                ..Transaction::default()
            })
            .collect()
    }

    async fn mount(server: &MockServer, command: &str, response: ResponseTemplate, times: u64) {
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header(NODE_API_VERSION_HEADER, NODE_API_VERSION))
            .and(body_partial_json(json!({ "command": command })))
            .respond_with(response)
            .expect(times)
            .mount(server)
            .await;
    }

    async fn commands(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| serde_json::from_slice::<Value>(&r.body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn submit_selects_tips_then_broadcasts_then_stores() {
        let server = MockServer::start().await;
        mount(&server, "getTransactionsToApprove", ResponseTemplate::new(200).set_body_json(tips_json()), 1).await;
        mount(&server, "broadcastTransactions", ResponseTemplate::new(200).set_body_json(json!({"duration": 1})), 1).await;
        mount(&server, "storeTransactions", ResponseTemplate::new(200).set_body_json(json!({"duration": 1})), 1).await;

        let client = HttpLedgerClient::new(server.uri()).unwrap();
        client.submit(batch(2), 4, MWM, scalar::seal).await.unwrap();

        let sent = commands(&server).await;
        let order: Vec<_> = sent.iter().map(|c| c["command"].as_str().unwrap().to_string()).collect();
        assert_eq!(order, ["getTransactionsToApprove", "broadcastTransactions", "storeTransactions"]);
        assert_eq!(sent[0]["depth"], 4);
        assert_eq!(sent[1]["trytes"], sent[2]["trytes"]);
    }

    #[tokio::test]
    async fn broadcast_trytes_are_chained_and_sealed() {
        let server = MockServer::start().await;
        mount(&server, "getTransactionsToApprove", ResponseTemplate::new(200).set_body_json(tips_json()), 1).await;
        mount(&server, "broadcastTransactions", ResponseTemplate::new(200).set_body_json(json!({})), 1).await;
        mount(&server, "storeTransactions", ResponseTemplate::new(200).set_body_json(json!({})), 1).await;

        let client = HttpLedgerClient::new(server.uri()).unwrap();
        client.submit(batch(3), 1, MWM, scalar::seal).await.unwrap();

        let broadcast = commands(&server)
            .await
            .into_iter()
            .find(|c| c["command"] == "broadcastTransactions")
            .unwrap();
        let sent: Vec<Transaction> = broadcast["trytes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| Transaction::parse(t.as_str().unwrap()).unwrap())
            .collect();

        assert_eq!(sent.len(), 3);
        for (i, tx) in sent.iter().enumerate() {
            assert_eq!(tx.current_index, i as i64);
            assert!(verify(&tx.to_trytes(), MWM));
        }
        assert_eq!(sent[2].trunk_transaction.as_str(), "T".repeat(81));
        assert_eq!(sent[2].branch_transaction.as_str(), "B".repeat(81));
        assert_eq!(sent[1].trunk_transaction, sent[2].hash());
        assert_eq!(sent[0].trunk_transaction, sent[1].hash());
        assert_eq!(sent[0].branch_transaction.as_str(), "T".repeat(81));
    }

    #[tokio::test]
    async fn node_error_body_is_surfaced() {
        let server = MockServer::start().await;
        mount(
            &server,
            "getTransactionsToApprove",
            ResponseTemplate::new(400).set_body_json(json!({"error": "Invalid depth input"})),
            1,
        )
        .await;
        mount(&server, "broadcastTransactions", ResponseTemplate::new(200), 0).await;

        let client = HttpLedgerClient::new(server.uri()).unwrap();
        let err = client.submit(batch(1), 99, MWM, scalar::seal).await.unwrap_err();

        match err {
            LedgerError::Node { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid depth input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_body_is_kept_verbatim() {
        let server = MockServer::start().await;
        mount(
            &server,
            "getTransactionsToApprove",
            ResponseTemplate::new(503).set_body_string("upstream down"),
            1,
        )
        .await;

        let client = HttpLedgerClient::new(server.uri()).unwrap();
        let err = client.get_transactions_to_approve(3).await.unwrap_err();
        assert!(matches!(err, LedgerError::Node { status: 503, ref message } if message == "upstream down"));
    }

    #[tokio::test]
    async fn empty_batch_makes_no_calls() {
        let server = MockServer::start().await;
        let client = HttpLedgerClient::new(server.uri()).unwrap();
        client.submit(Vec::new(), 3, MWM, scalar::seal).await.unwrap();
        assert!(commands(&server).await.is_empty());
    }
}
