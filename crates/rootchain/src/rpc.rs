//! Minimal Ethereum JSON-RPC client over HTTP.
//!
//! Responses are handled as raw JSON and decoded field by field. Transport failures are
//! retried with jittered exponential backoff; RPC error objects are returned at once.

use crate::config::RetryConfig;
use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use rand::Rng;
use sentinel::{BlockHeader, Log, Receipt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Block selector for `eth_getBlockByNumber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
    Finalized,
}

impl BlockTag {
    fn to_param(self) -> Value {
        match self {
            BlockTag::Number(n) => Value::String(format!("0x{:x}", n)),
            BlockTag::Latest => Value::String("latest".into()),
            BlockTag::Finalized => Value::String("finalized".into()),
        }
    }
}

/// Header fields needed for seeds and checkpoint roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcBlock {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
    pub transactions_root: B256,
    pub receipts_root: B256,
}

impl From<RpcBlock> for BlockHeader {
    fn from(b: RpcBlock) -> Self {
        BlockHeader {
            number: b.number,
            hash: b.hash,
            timestamp: b.timestamp,
        }
    }
}

pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    retry: RetryConfig,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration, retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
            retry,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One JSON-RPC call; returns the `result` member.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < attempts && is_transport_error(&e) => {
                    let base = self.retry.backoff_ms(attempt);
                    let jitter = rand::thread_rng().gen_range(0..=base / 2);
                    tracing::debug!(method, attempt, reason = %e, "RPC request failed, retrying");
                    sleep(Duration::from_millis(base + jitter)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.context(format!("{} via {}", method, self.url))),
            }
        }
    }

    async fn send(&self, method: &str, params: &Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("HTTP request failed")?;
        let json: Value = resp.json().await.context("parse response")?;
        if let Some(err) = json.get("error") {
            anyhow::bail!(RpcError(err.to_string()));
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Missing result"))
    }

    pub async fn block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(as_str(&result, "blockNumber")?)
    }

    /// `None` when the node does not know the block (or the tag, for `finalized` on
    /// pre-merge nodes).
    pub async fn block(&self, tag: BlockTag) -> Result<Option<RpcBlock>> {
        let result = self
            .call("eth_getBlockByNumber", json!([tag.to_param(), false]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(decode_block(&result)?))
    }

    /// `None` while the transaction is unknown or pending.
    pub async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>> {
        let result = self
            .call("eth_getTransactionReceipt", json!([format!("0x{}", hex::encode(tx_hash))]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(decode_receipt(tx_hash, &result)?))
    }

    pub async fn eth_call(&self, to: Address, calldata: &[u8]) -> Result<Vec<u8>> {
        let params = json!([{
            "to": format!("0x{}", hex::encode(to)),
            "data": format!("0x{}", hex::encode(calldata)),
        }, "latest"]);
        let result = self.call("eth_call", params).await?;
        parse_hex_bytes(as_str(&result, "eth_call result")?)
    }
}

/// Error object returned by the node. Not retried.
#[derive(Debug, thiserror::Error)]
#[error("RPC error: {0}")]
pub struct RpcError(pub String);

fn is_transport_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<RpcError>().is_none()
}

fn as_str<'a>(v: &'a Value, what: &str) -> Result<&'a str> {
    v.as_str()
        .ok_or_else(|| anyhow::anyhow!("{} not string", what))
}

fn field<'a>(v: &'a Value, name: &str) -> Result<&'a str> {
    v.get(name)
        .and_then(|x| x.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing {}", name))
}

pub fn parse_hex_u64(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(s, 16).with_context(|| format!("parse hex u64 {:?}", s))
}

pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).context("decode hex")
}

pub fn parse_b256(s: &str) -> Result<B256> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32 bytes, got {}", bytes.len());
    }
    Ok(B256::from_slice(&bytes))
}

pub fn parse_address(s: &str) -> Result<Address> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 20 {
        anyhow::bail!("expected 20 bytes, got {}", bytes.len());
    }
    Ok(Address::from_slice(&bytes))
}

pub fn decode_block(v: &Value) -> Result<RpcBlock> {
    Ok(RpcBlock {
        number: parse_hex_u64(field(v, "number")?)?,
        hash: parse_b256(field(v, "hash")?)?,
        timestamp: parse_hex_u64(field(v, "timestamp")?)?,
        transactions_root: parse_b256(field(v, "transactionsRoot")?)?,
        receipts_root: parse_b256(field(v, "receiptsRoot")?)?,
    })
}

pub fn decode_receipt(tx_hash: B256, v: &Value) -> Result<Receipt> {
    let block_number = parse_hex_u64(field(v, "blockNumber")?)?;
    let logs = v
        .get("logs")
        .and_then(|l| l.as_array())
        .ok_or_else(|| anyhow::anyhow!("Missing logs"))?
        .iter()
        .map(decode_log)
        .collect::<Result<Vec<_>>>()?;
    Ok(Receipt {
        tx_hash,
        block_number,
        logs,
    })
}

fn decode_log(v: &Value) -> Result<Log> {
    let topics = v
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow::anyhow!("Missing topics"))?
        .iter()
        .map(|t| parse_b256(as_str(t, "topic")?))
        .collect::<Result<Vec<_>>>()?;
    Ok(Log {
        address: parse_address(field(v, "address")?)?,
        topics,
        data: parse_hex_bytes(field(v, "data")?)?,
        log_index: parse_hex_u64(field(v, "logIndex")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_quantities() {
        assert_eq!(parse_hex_u64("0x1f").unwrap(), 31);
        assert_eq!(parse_hex_u64("0x").unwrap(), 0);
        assert!(parse_hex_u64("0xzz").is_err());
        assert!(parse_b256("0x01").is_err());
    }

    #[test]
    fn receipt_from_json() {
        let v = json!({
            "blockNumber": "0x10",
            "logs": [{
                "address": "0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a",
                "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
                "data": "0x",
                "logIndex": "0x3"
            }]
        });
        let r = decode_receipt(B256::ZERO, &v).unwrap();
        assert_eq!(r.block_number, 16);
        assert_eq!(r.logs[0].log_index, 3);
        assert_eq!(r.logs[0].address, Address::repeat_byte(0x5a));
        assert!(r.logs[0].data.is_empty());
    }

    #[test]
    fn rpc_errors_are_not_retried() {
        let e = anyhow::Error::new(RpcError("execution reverted".into()));
        assert!(!is_transport_error(&e));
        assert!(is_transport_error(&anyhow::anyhow!("HTTP request failed")));
    }
}
