use std::time::Duration;

use reqwest::Client;
use rocket::serde::json::{
    serde_json::{self, json},
    Value,
};
use serde::{de::DeserializeOwned, Deserialize};

use crate::commitment::Commitment;

use super::{LedgerError, LedgerTransport, Receipt, SignedTransaction, TransactionStatus};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Ledger-specific JSON-RPC error codes.
const INSUFFICIENT_FUNDS: i64 = -32010;
const STALE_NONCE: i64 = -32011;
const REJECTED: i64 = -32012;

/// Whether a failed call may have taken effect on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Query,
    Broadcast,
}

/// A [`LedgerTransport`] speaking JSON-RPC 2.0 over HTTP to a ledger node.
#[derive(Clone)]
pub struct RpcTransport {
    url: String,
    client: Client,
}

impl RpcTransport {
    pub fn new(url: &str, request_timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        kind: CallKind,
        method: &str,
        params: Value,
    ) -> Result<T, LedgerError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "ballot-ledger",
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(kind, &e))?;

        if response.status().is_server_error() {
            let message = format!("ledger node returned {}", response.status());
            return Err(match kind {
                CallKind::Query => LedgerError::NetworkUnavailable(message),
                CallKind::Broadcast => LedgerError::Timeout {
                    transaction_id: None,
                },
            });
        }

        let response: RpcResponse = response
            .json()
            .await
            .map_err(|e| transport_error(kind, &e))?;
        decode_response(response)
    }
}

/// Map an HTTP failure onto the ledger error taxonomy.
///
/// A broadcast that failed after the connection was made may still have
/// reached the ledger, so it is reported as a timeout to force reconciliation.
fn transport_error(kind: CallKind, error: &reqwest::Error) -> LedgerError {
    if error.is_connect() || kind == CallKind::Query {
        LedgerError::NetworkUnavailable(error.to_string())
    } else {
        LedgerError::Timeout {
            transaction_id: None,
        }
    }
}

fn decode_response<T: DeserializeOwned>(response: RpcResponse) -> Result<T, LedgerError> {
    if let Some(error) = response.error {
        return Err(match error.code {
            INSUFFICIENT_FUNDS => LedgerError::InsufficientFunds(error.message),
            STALE_NONCE => LedgerError::StaleNonce(
                error
                    .data
                    .as_ref()
                    .and_then(|data| data.get("nonce"))
                    .and_then(Value::as_u64)
                    .unwrap_or_default(),
            ),
            REJECTED => LedgerError::Rejected(error.message),
            code => LedgerError::Rejected(format!("RPC error {code}: {}", error.message)),
        });
    }
    serde_json::from_value(response.result.unwrap_or(Value::Null))
        .map_err(|e| LedgerError::Rejected(format!("malformed ledger response: {e}")))
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    nonce: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum TransactionInfo {
    Pending,
    #[serde(rename_all = "camelCase")]
    Confirmed { sequence_number: u64, fee: u64 },
    Rejected { reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitmentMatch {
    transaction_id: String,
    sequence_number: u64,
    fee: u64,
}

impl From<Option<TransactionInfo>> for TransactionStatus {
    fn from(info: Option<TransactionInfo>) -> Self {
        match info {
            None => TransactionStatus::Unknown,
            Some(TransactionInfo::Pending) => TransactionStatus::Pending,
            Some(TransactionInfo::Confirmed {
                sequence_number,
                fee,
            }) => TransactionStatus::Confirmed {
                sequence_number,
                fee,
            },
            Some(TransactionInfo::Rejected { reason }) => TransactionStatus::Rejected { reason },
        }
    }
}

#[rocket::async_trait]
impl LedgerTransport for RpcTransport {
    async fn account_nonce(&self, address: &str) -> Result<u64, LedgerError> {
        let account: AccountInfo = self
            .call(CallKind::Query, "ledger_getAccount", json!([address]))
            .await?;
        Ok(account.nonce)
    }

    async fn send_transaction(
        &self,
        transaction: &SignedTransaction,
    ) -> Result<String, LedgerError> {
        self.call(
            CallKind::Broadcast,
            "ledger_sendTransaction",
            json!([transaction]),
        )
        .await
    }

    async fn transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionStatus, LedgerError> {
        let info: Option<TransactionInfo> = self
            .call(CallKind::Query, "ledger_getTransaction", json!([transaction_id]))
            .await?;
        Ok(info.into())
    }

    async fn find_by_commitment(
        &self,
        commitment: &Commitment,
    ) -> Result<Option<Receipt>, LedgerError> {
        let found: Option<CommitmentMatch> = self
            .call(
                CallKind::Query,
                "ledger_findByCommitment",
                json!([commitment]),
            )
            .await?;
        Ok(found.map(|found| Receipt {
            transaction_id: found.transaction_id,
            sequence_number: found.sequence_number,
            fee_spent: found.fee,
        }))
    }
}
