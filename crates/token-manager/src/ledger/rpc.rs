//! JSON-RPC 2.0 ledger client for Solana nodes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};
use tokio::time::Instant;

use super::{ConfirmationOutcome, LedgerClient};
use crate::config::EngineConfig;
use crate::error::LedgerError;
use crate::types::{Address, Blockhash, Commitment, FreshnessToken, Signature};

pub struct RpcLedgerClient {
    http_client: reqwest::Client,
    url: String,
    commitment: Commitment,
    confirm_timeout: Duration,
    confirm_poll_interval: Duration,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(config: &EngineConfig) -> Result<Self, LedgerError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http_client,
            url: config.rpc_url.clone(),
            commitment: config.commitment,
            confirm_timeout: config.confirm_timeout(),
            confirm_poll_interval: config.confirm_poll_interval(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::debug!(method, id, "rpc request");

        let response = self
            .http_client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?;
        let body: Value = response.json().await?;

        parse_rpc_response(body)
    }

    fn commitment_config(&self) -> Value {
        json!({ "commitment": self.commitment.as_str() })
    }
}

impl LedgerClient for RpcLedgerClient {
    async fn get_balance(&self, address: &Address) -> Result<u64, LedgerError> {
        let result = self
            .call(
                "getBalance",
                json!([address.to_string(), self.commitment_config()]),
            )
            .await?;
        value_u64(&result, "getBalance")
    }

    async fn get_latest_blockhash(&self) -> Result<FreshnessToken, LedgerError> {
        let result = self
            .call("getLatestBlockhash", json!([self.commitment_config()]))
            .await?;
        parse_latest_blockhash(&result)
    }

    async fn is_blockhash_valid(&self, token: &FreshnessToken) -> Result<bool, LedgerError> {
        let result = self
            .call(
                "isBlockhashValid",
                json!([token.blockhash.to_string(), self.commitment_config()]),
            )
            .await?;
        result
            .get("value")
            .and_then(Value::as_bool)
            .ok_or_else(|| missing("isBlockhashValid", "value"))
    }

    async fn account_exists(&self, address: &Address) -> Result<bool, LedgerError> {
        let result = self
            .call(
                "getAccountInfo",
                json!([
                    address.to_string(),
                    { "encoding": "base64", "commitment": self.commitment.as_str() }
                ]),
            )
            .await?;
        match result.get("value") {
            Some(Value::Null) => Ok(false),
            Some(Value::Object(_)) => Ok(true),
            _ => Err(missing("getAccountInfo", "value")),
        }
    }

    async fn minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, LedgerError> {
        let result = self
            .call("getMinimumBalanceForRentExemption", json!([data_len]))
            .await?;
        result
            .as_u64()
            .ok_or_else(|| missing("getMinimumBalanceForRentExemption", "result"))
    }

    async fn get_token_account_balance(&self, address: &Address) -> Result<u64, LedgerError> {
        let result = self
            .call(
                "getTokenAccountBalance",
                json!([address.to_string(), self.commitment_config()]),
            )
            .await?;
        result
            .get("value")
            .and_then(|v| v.get("amount"))
            .and_then(Value::as_str)
            .and_then(|amount| amount.parse().ok())
            .ok_or_else(|| missing("getTokenAccountBalance", "value.amount"))
    }

    async fn send_transaction(&self, wire: &[u8]) -> Result<Signature, LedgerError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(wire);
        let result = self
            .call(
                "sendTransaction",
                json!([
                    encoded,
                    {
                        "encoding": "base64",
                        "skipPreflight": false,
                        "preflightCommitment": self.commitment.as_str(),
                        "maxRetries": 0
                    }
                ]),
            )
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| missing("sendTransaction", "result"))?;
        text.parse()
            .map_err(|e| LedgerError::InvalidResponse(format!("sendTransaction signature: {e}")))
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> Result<ConfirmationOutcome, LedgerError> {
        let deadline = Instant::now() + self.confirm_timeout;

        loop {
            let result = self
                .call(
                    "getSignatureStatuses",
                    json!([[signature.to_string()], { "searchTransactionHistory": false }]),
                )
                .await?;

            match parse_signature_status(&result, commitment)? {
                SignatureState::Reached => return Ok(ConfirmationOutcome::Confirmed),
                SignatureState::Failed(reason) => return Ok(ConfirmationOutcome::Failed(reason)),
                SignatureState::Pending => {}
            }

            if Instant::now() >= deadline {
                return Err(LedgerError::Timeout(format!(
                    "{signature} not {commitment} after {}s",
                    self.confirm_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.confirm_poll_interval).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Unwrap a JSON-RPC envelope into its `result`, or the error it carries.
pub(crate) fn parse_rpc_response(mut body: Value) -> Result<Value, LedgerError> {
    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(LedgerError::Rpc { code, message });
    }
    match body.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(LedgerError::InvalidResponse(
            "response has neither result nor error".into(),
        )),
    }
}

fn parse_latest_blockhash(result: &Value) -> Result<FreshnessToken, LedgerError> {
    let value = result
        .get("value")
        .ok_or_else(|| missing("getLatestBlockhash", "value"))?;
    let blockhash: Blockhash = value
        .get("blockhash")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("getLatestBlockhash", "value.blockhash"))?
        .parse()
        .map_err(|e| LedgerError::InvalidResponse(format!("getLatestBlockhash blockhash: {e}")))?;
    let last_valid_block_height = value
        .get("lastValidBlockHeight")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing("getLatestBlockhash", "value.lastValidBlockHeight"))?;

    Ok(FreshnessToken {
        blockhash,
        last_valid_block_height,
    })
}

#[derive(Debug, PartialEq, Eq)]
enum SignatureState {
    Pending,
    Reached,
    Failed(String),
}

fn parse_signature_status(
    result: &Value,
    wanted: Commitment,
) -> Result<SignatureState, LedgerError> {
    let status = result
        .get("value")
        .and_then(Value::as_array)
        .and_then(|statuses| statuses.first())
        .ok_or_else(|| missing("getSignatureStatuses", "value[0]"))?;

    if status.is_null() {
        return Ok(SignatureState::Pending);
    }
    if let Some(err) = status.get("err").filter(|e| !e.is_null()) {
        return Ok(SignatureState::Failed(err.to_string()));
    }

    let reached = status
        .get("confirmationStatus")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Commitment>().ok());
    match reached {
        Some(level) if level >= wanted => Ok(SignatureState::Reached),
        _ => Ok(SignatureState::Pending),
    }
}

fn value_u64(result: &Value, method: &str) -> Result<u64, LedgerError> {
    result
        .get("value")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing(method, "value"))
}

fn missing(method: &str, field: &str) -> LedgerError {
    LedgerError::InvalidResponse(format!("{method}: missing `{field}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_is_surfaced_with_code() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32002, "message": "Transaction simulation failed" }
        });
        match parse_rpc_response(body) {
            Err(LedgerError::Rpc { code, message }) => {
                assert_eq!(code, -32002);
                assert_eq!(message, "Transaction simulation failed");
            }
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[test]
    fn missing_result_is_invalid() {
        let err = parse_rpc_response(json!({ "jsonrpc": "2.0", "id": 1 })).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidResponse(_)));
    }

    #[test]
    fn balance_value_is_read() {
        let result = parse_rpc_response(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "context": { "slot": 1 }, "value": 2_500_000_000u64 }
        }))
        .unwrap();
        assert_eq!(value_u64(&result, "getBalance").unwrap(), 2_500_000_000);
    }

    #[test]
    fn latest_blockhash_is_parsed() {
        let result = json!({
            "context": { "slot": 2792 },
            "value": {
                "blockhash": "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N",
                "lastValidBlockHeight": 3090
            }
        });
        let token = parse_latest_blockhash(&result).unwrap();
        assert_eq!(
            token.blockhash.to_string(),
            "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N"
        );
        assert_eq!(token.last_valid_block_height, 3090);
    }

    #[test]
    fn malformed_blockhash_is_rejected() {
        let result = json!({ "value": { "blockhash": "xyz", "lastValidBlockHeight": 1 } });
        assert!(parse_latest_blockhash(&result).is_err());
    }

    #[test]
    fn signature_status_tracks_commitment() {
        let pending = json!({ "value": [null] });
        assert_eq!(
            parse_signature_status(&pending, Commitment::Confirmed).unwrap(),
            SignatureState::Pending
        );

        let processed = json!({
            "value": [{ "slot": 1, "confirmations": 0, "err": null, "confirmationStatus": "processed" }]
        });
        assert_eq!(
            parse_signature_status(&processed, Commitment::Confirmed).unwrap(),
            SignatureState::Pending
        );

        let finalized = json!({
            "value": [{ "slot": 1, "confirmations": null, "err": null, "confirmationStatus": "finalized" }]
        });
        assert_eq!(
            parse_signature_status(&finalized, Commitment::Confirmed).unwrap(),
            SignatureState::Reached
        );
    }

    #[test]
    fn signature_status_reports_execution_error() {
        let failed = json!({
            "value": [{
                "slot": 1,
                "err": { "InstructionError": [0, { "Custom": 1 }] },
                "confirmationStatus": "confirmed"
            }]
        });
        match parse_signature_status(&failed, Commitment::Confirmed).unwrap() {
            SignatureState::Failed(reason) => assert!(reason.contains("InstructionError")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn client_builds_from_default_config() {
        let client = RpcLedgerClient::new(&EngineConfig::default()).unwrap();
        assert_eq!(client.url(), crate::config::DEVNET_RPC_URL);
    }
}
