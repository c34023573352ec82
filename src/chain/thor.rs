//! HTTP [`ChainGateway`] implementation against a Thor-style node REST API.
//!
//! Endpoints used: `GET /transactions/{id}`, `GET /transactions/{id}/receipt`,
//! `POST /transactions`, `GET /blocks/best`, `GET /accounts/{addr}`, and
//! `POST /accounts/{addr}` for read-only calls. The node answers `null` for
//! unknown transactions, which maps to `Ok(None)` here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Bytes, U256};

use super::{Account, CallResult, ChainError, ChainGateway, PaymentDetails, Receipt, decode_payment};
use crate::tx::Clause;
use crate::types::{TransactionHash, VetAddress};

/// A [`ChainGateway`] speaking the node's REST API over HTTP.
#[derive(Debug, Clone)]
pub struct ThorGateway {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ThorClause {
    to: Option<String>,
    value: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ThorTransaction {
    origin: String,
    clauses: Vec<ThorClause>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThorReceiptMeta {
    block_number: u64,
}

#[derive(Debug, Deserialize)]
struct ThorReceipt {
    reverted: bool,
    meta: ThorReceiptMeta,
}

#[derive(Debug, Deserialize)]
struct ThorBestBlock {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct ThorAccount {
    balance: String,
    energy: String,
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    raw: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct CallBody {
    value: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ThorCallResult {
    data: String,
    reverted: bool,
}

fn parse_hex_quantity(value: &str) -> Result<U256, ChainError> {
    U256::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Node(format!("invalid hex quantity {value:?}: {e}")))
}

fn parse_hex_bytes(value: &str) -> Result<Vec<u8>, ChainError> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| ChainError::Node(format!("invalid hex bytes: {e}")))
}

impl ThorGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        ThorGateway {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ChainError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChainError::Node(format!(
                "{} returned status {}",
                path,
                response.status()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ChainError::Node(e.to_string()))
    }

    async fn best_block_number(&self) -> Result<u64, ChainError> {
        let best: ThorBestBlock = self.get_json("/blocks/best").await?;
        Ok(best.number)
    }
}

#[async_trait]
impl ChainGateway for ThorGateway {
    async fn get_receipt(&self, tx: &TransactionHash) -> Result<Option<Receipt>, ChainError> {
        let receipt: Option<ThorReceipt> =
            self.get_json(&format!("/transactions/{tx}/receipt")).await?;
        Ok(receipt.map(|r| Receipt {
            block_number: r.meta.block_number,
            reverted: r.reverted,
        }))
    }

    async fn submit(&self, signed_tx_hex: &str) -> Result<TransactionHash, ChainError> {
        let url = format!("{}/transactions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SubmitBody { raw: signed_tx_hex })
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Submission(format!(
                "node rejected transaction ({status}): {}",
                body.trim()
            )));
        }
        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Node(e.to_string()))?;
        TransactionHash::from_str(&submitted.id)
            .map_err(|e| ChainError::Node(format!("invalid transaction id: {e}")))
    }

    async fn decode_transaction(
        &self,
        tx: &TransactionHash,
    ) -> Result<Option<PaymentDetails>, ChainError> {
        let transaction: Option<ThorTransaction> =
            self.get_json(&format!("/transactions/{tx}")).await?;
        let Some(transaction) = transaction else {
            return Ok(None);
        };
        let origin = VetAddress::from_str(&transaction.origin)
            .map_err(|e| ChainError::Node(format!("invalid origin address: {e}")))?;
        let mut clauses = Vec::with_capacity(transaction.clauses.len());
        for clause in transaction.clauses {
            let to = match clause.to {
                Some(address) => {
                    let address = VetAddress::from_str(&address)
                        .map_err(|e| ChainError::Node(format!("invalid clause address: {e}")))?;
                    Bytes::copy_from_slice(address.0.as_slice())
                }
                None => Bytes::new(),
            };
            clauses.push(Clause {
                to,
                value: parse_hex_quantity(&clause.value)?,
                data: Bytes::from(parse_hex_bytes(&clause.data)?),
            });
        }
        Ok(Some(decode_payment(origin, clauses)))
    }

    async fn poll_until_confirmed(
        &self,
        tx: &TransactionHash,
        confirmations: u64,
        poll_interval_ms: u64,
        max_attempts: u32,
    ) -> Result<bool, ChainError> {
        for attempt in 0..max_attempts {
            // Transient node errors count as "no receipt yet": a flaky node
            // must not abort a settlement that only needs more time.
            match self.get_receipt(tx).await {
                Ok(Some(receipt)) => {
                    if receipt.reverted {
                        return Ok(false);
                    }
                    let best = self.best_block_number().await.unwrap_or(0);
                    if best.saturating_sub(receipt.block_number) >= confirmations {
                        return Ok(true);
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(%tx, %error, "receipt poll attempt failed");
                }
            }
            if attempt + 1 < max_attempts {
                tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
            }
        }
        Ok(false)
    }

    async fn get_account(&self, address: &VetAddress) -> Result<Option<Account>, ChainError> {
        let account: Option<ThorAccount> =
            self.get_json(&format!("/accounts/{address}")).await?;
        match account {
            Some(account) => Ok(Some(Account {
                balance: parse_hex_quantity(&account.balance)?,
                energy: parse_hex_quantity(&account.energy)?,
            })),
            None => Ok(None),
        }
    }

    async fn contract_call(
        &self,
        contract: &VetAddress,
        data: Vec<u8>,
    ) -> Result<CallResult, ChainError> {
        let url = format!("{}/accounts/{contract}", self.base_url);
        let body = CallBody {
            value: "0x0".to_string(),
            data: format!("0x{}", hex::encode(&data)),
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChainError::Node(format!(
                "contract call returned status {}",
                response.status()
            )));
        }
        let result: ThorCallResult = response
            .json()
            .await
            .map_err(|e| ChainError::Node(e.to_string()))?;
        Ok(CallResult {
            data: parse_hex_bytes(&result.data)?,
            reverted: result.reverted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::balance_of_calldata;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hash(byte: u8) -> TransactionHash {
        TransactionHash([byte; 32])
    }

    #[tokio::test]
    async fn receipt_null_means_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}/receipt", hash(0x11))))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
            .mount(&server)
            .await;

        let gateway = ThorGateway::new(server.uri());
        assert_eq!(gateway.get_receipt(&hash(0x11)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn receipt_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}/receipt", hash(0x22))))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "reverted": true,
                "meta": { "blockNumber": 1234 }
            })))
            .mount(&server)
            .await;

        let gateway = ThorGateway::new(server.uri());
        let receipt = gateway.get_receipt(&hash(0x22)).await.unwrap().unwrap();
        assert!(receipt.reverted);
        assert_eq!(receipt.block_number, 1234);
    }

    #[tokio::test]
    async fn submit_returns_node_assigned_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transactions"))
            .and(body_json(json!({ "raw": "0xf861dead" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": hash(0x33).to_string()
            })))
            .mount(&server)
            .await;

        let gateway = ThorGateway::new(server.uri());
        assert_eq!(gateway.submit("0xf861dead").await.unwrap(), hash(0x33));
    }

    #[tokio::test]
    async fn submit_rejection_is_a_submission_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transactions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad tx"))
            .mount(&server)
            .await;

        let gateway = ThorGateway::new(server.uri());
        let error = gateway.submit("0x00").await.unwrap_err();
        assert!(matches!(error, ChainError::Submission(_)));
    }

    #[tokio::test]
    async fn decode_transaction_reads_native_clause() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}", hash(0x44))))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "origin": "0x7567d83b7b8d80addcb281a71d54fc7b3364ffed",
                "clauses": [{
                    "to": "0x0000000000000000000000000000000000000009",
                    "value": "0xde0b6b3a7640000",
                    "data": "0x"
                }]
            })))
            .mount(&server)
            .await;

        let gateway = ThorGateway::new(server.uri());
        let details = gateway
            .decode_transaction(&hash(0x44))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.token, "VET");
        assert_eq!(details.amount.to_string(), "1000000000000000000");
    }

    #[tokio::test]
    async fn account_balances_are_hex_quantities() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/0x0000000000000000000000000000000000000009"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "balance": "0x10",
                "energy": "0x20"
            })))
            .mount(&server)
            .await;

        let gateway = ThorGateway::new(server.uri());
        let address: VetAddress = "0x0000000000000000000000000000000000000009".parse().unwrap();
        let account = gateway.get_account(&address).await.unwrap().unwrap();
        assert_eq!(account.balance, U256::from(0x10));
        assert_eq!(account.energy, U256::from(0x20));
    }

    #[tokio::test]
    async fn contract_call_round_trips_balance_of() {
        let server = MockServer::start().await;
        let vtho = "0x0000000000000000000000000000456e65726779";
        Mock::given(method("POST"))
            .and(path(format!("/accounts/{vtho}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": format!("0x{:064x}", 42),
                "reverted": false
            })))
            .mount(&server)
            .await;

        let gateway = ThorGateway::new(server.uri());
        let owner: VetAddress = "0x0000000000000000000000000000000000000009".parse().unwrap();
        let contract: VetAddress = vtho.parse().unwrap();
        let result = gateway
            .contract_call(&contract, balance_of_calldata(&owner))
            .await
            .unwrap();
        assert!(!result.reverted);
        assert_eq!(U256::from_be_slice(&result.data), U256::from(42));
    }

    #[tokio::test]
    async fn poll_returns_false_on_reverted_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}/receipt", hash(0x55))))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "reverted": true,
                "meta": { "blockNumber": 10 }
            })))
            .mount(&server)
            .await;

        let gateway = ThorGateway::new(server.uri());
        let confirmed = gateway
            .poll_until_confirmed(&hash(0x55), 1, 1, 3)
            .await
            .unwrap();
        assert!(!confirmed);
    }

    #[tokio::test]
    async fn poll_exhausts_attempts_without_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/transactions/{}/receipt", hash(0x66))))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
            .mount(&server)
            .await;

        let gateway = ThorGateway::new(server.uri());
        let confirmed = gateway
            .poll_until_confirmed(&hash(0x66), 1, 1, 2)
            .await
            .unwrap();
        assert!(!confirmed);
    }
}
