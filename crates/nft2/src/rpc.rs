//! [ChainClient] over HTTP JSON-RPC.
//!
//! Endpoints are tried in order; a transport failure moves the client to the next endpoint
//! and the failing one is retried last. RPC-level errors are returned as-is, since the node
//! answered and another node would likely answer the same.

use crate::chain::{BlockHeader, ChainClient, LogEntry, LogFilter, TransactionEntry};
use crate::error::ClientError;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

fn hex_quantity(n: u64) -> String {
    format!("0x{:x}", n)
}

fn build_logs_filter(filter: &LogFilter) -> Value {
    let addresses: Vec<String> = filter
        .addresses
        .iter()
        .map(|a| format!("0x{}", hex::encode(a.as_slice())))
        .collect();
    let mut value = json!({
        "address": addresses,
        "fromBlock": hex_quantity(filter.from_block),
        "toBlock": hex_quantity(filter.to_block),
    });
    // topic0 OR-list in position 0 only.
    if !filter.topics.is_empty() {
        let topics: Vec<String> = filter
            .topics
            .iter()
            .map(|t| format!("0x{}", hex::encode(t.as_slice())))
            .collect();
        value["topics"] = json!([topics]);
    }
    value
}

/// Address-only filter for nodes that reject topic OR-lists; topics are matched client-side.
fn build_logs_filter_address_only(filter: &LogFilter) -> Value {
    build_logs_filter(&LogFilter {
        topics: Vec::new(),
        ..filter.clone()
    })
}

fn field<'a>(v: &'a Value, name: &str) -> Result<&'a str, ClientError> {
    v.get(name)
        .and_then(|f| f.as_str())
        .ok_or_else(|| ClientError::Malformed(format!("missing {name}")))
}

fn parse_hex_u64(s: &str) -> Result<u64, ClientError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| ClientError::Malformed(format!("hex quantity {s}: {e}")))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, ClientError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| ClientError::Malformed(format!("hex bytes: {e}")))
}

fn parse_b256(s: &str) -> Result<B256, ClientError> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        return Err(ClientError::Malformed(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

fn parse_address(s: &str) -> Result<Address, ClientError> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 20 {
        return Err(ClientError::Malformed(format!(
            "expected 20 address bytes, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

/// Parse one eth_getLogs entry. `Ok(None)` for logs flagged `removed`.
fn parse_log(v: &Value) -> Result<Option<LogEntry>, ClientError> {
    if v.get("removed").and_then(|r| r.as_bool()) == Some(true) {
        return Ok(None);
    }
    let topics = v
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| ClientError::Malformed("missing topics".into()))?
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| ClientError::Malformed("topic not a string".into()))
                .and_then(parse_b256)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(LogEntry {
        address: parse_address(field(v, "address")?)?,
        block_number: parse_hex_u64(field(v, "blockNumber")?)?,
        transaction_hash: parse_b256(field(v, "transactionHash")?)?,
        transaction_index: parse_hex_u64(field(v, "transactionIndex")?)?,
        log_index: parse_hex_u64(field(v, "logIndex")?)?,
        topics,
        data: Bytes::from(parse_hex_bytes(field(v, "data")?)?),
    }))
}

fn parse_transaction(v: &Value) -> Result<TransactionEntry, ClientError> {
    let to = match v.get("to").and_then(|t| t.as_str()) {
        Some(s) => Some(parse_address(s)?),
        None => None,
    };
    Ok(TransactionEntry {
        hash: parse_b256(field(v, "hash")?)?,
        block_number: parse_hex_u64(field(v, "blockNumber")?)?,
        transaction_index: parse_hex_u64(field(v, "transactionIndex")?)?,
        from: parse_address(field(v, "from")?)?,
        to,
        input: Bytes::from(parse_hex_bytes(field(v, "input")?)?),
    })
}

fn matches_topics(log: &LogEntry, topics: &[B256]) -> bool {
    topics.is_empty() || log.topic0().is_some_and(|t| topics.contains(t))
}

/// JSON-RPC client over one or more HTTP endpoints.
pub struct HttpChainClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
    active: AtomicUsize,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl HttpChainClient {
    pub fn new(endpoints: Vec<String>, request_timeout: Duration) -> Result<Self, ClientError> {
        if endpoints.is_empty() {
            return Err(ClientError::Transport("no RPC endpoints".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoints,
            active: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            request_timeout,
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, ClientError> {
        let resp = self.client.post(url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout(self.request_timeout)
            } else {
                ClientError::from(e)
            }
        })?;
        let json: Value = resp
            .json()
            .await
            .map_err(|e| ClientError::Malformed(format!("parse response: {e}")))?;
        if let Some(err) = json.get("error") {
            return Err(ClientError::Rpc(err.to_string()));
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| ClientError::Malformed("missing result".into()))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let start = self.active.load(Ordering::Relaxed);
        let mut last = None;
        for offset in 0..self.endpoints.len() {
            let idx = (start + offset) % self.endpoints.len();
            let url = &self.endpoints[idx];
            match self.post(url, &body).await {
                Ok(result) => {
                    if idx != start {
                        tracing::info!(endpoint = %url, "switched RPC endpoint");
                        self.active.store(idx, Ordering::Relaxed);
                    }
                    return Ok(result);
                }
                Err(e @ (ClientError::Transport(_) | ClientError::Timeout(_))) => {
                    tracing::warn!(endpoint = %url, method, reason = %e, "RPC endpoint failed");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(ClientError::Exhausted(Box::new(last.unwrap_or_else(|| {
            ClientError::Transport("no RPC endpoints".into())
        }))))
    }

    async fn get_logs_raw(&self, filter: Value) -> Result<Vec<Value>, ClientError> {
        let result = self.request("eth_getLogs", json!([filter])).await?;
        result
            .as_array()
            .cloned()
            .ok_or_else(|| ClientError::Malformed("getLogs not array".into()))
    }

    async fn get_block(&self, number: u64, full: bool) -> Result<Value, ClientError> {
        let result = self
            .request("eth_getBlockByNumber", json!([hex_quantity(number), full]))
            .await?;
        if result.is_null() {
            return Err(ClientError::Rpc(format!("block {number} not available")));
        }
        Ok(result)
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn block_number(&self) -> Result<u64, ClientError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        let s = result
            .as_str()
            .ok_or_else(|| ClientError::Malformed("blockNumber not string".into()))?;
        parse_hex_u64(s)
    }

    async fn get_block_header(&self, number: u64) -> Result<BlockHeader, ClientError> {
        let block = self.get_block(number, false).await?;
        Ok(BlockHeader {
            number: parse_hex_u64(field(&block, "number")?)?,
            hash: parse_b256(field(&block, "hash")?)?,
            timestamp: parse_hex_u64(field(&block, "timestamp")?)?,
        })
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ClientError> {
        let raw = match self.get_logs_raw(build_logs_filter(filter)).await {
            Ok(raw) => raw,
            Err(ClientError::Rpc(e)) if !filter.topics.is_empty() => {
                tracing::debug!(reason = %e, "eth_getLogs with topic filter failed, trying address-only");
                self.get_logs_raw(build_logs_filter_address_only(filter))
                    .await?
            }
            Err(e) => return Err(e),
        };
        let mut logs = Vec::with_capacity(raw.len());
        for v in &raw {
            if let Some(log) = parse_log(v)? {
                if matches_topics(&log, &filter.topics) {
                    logs.push(log);
                }
            }
        }
        Ok(logs)
    }

    async fn get_block_transactions(
        &self,
        number: u64,
    ) -> Result<Vec<TransactionEntry>, ClientError> {
        let block = self.get_block(number, true).await?;
        let txs = block
            .get("transactions")
            .and_then(|t| t.as_array())
            .ok_or_else(|| ClientError::Malformed("missing transactions".into()))?;
        let mut out = txs.iter().map(parse_transaction).collect::<Result<Vec<_>, _>>()?;
        out.sort_by_key(|tx| tx.transaction_index);
        Ok(out)
    }

    async fn call(
        &self,
        to: Address,
        calldata: Bytes,
        block: Option<u64>,
    ) -> Result<Bytes, ClientError> {
        let tag = block.map_or_else(|| "latest".to_string(), hex_quantity);
        let params = json!([{
            "to": format!("0x{}", hex::encode(to.as_slice())),
            "data": format!("0x{}", hex::encode(&calldata)),
        }, tag]);
        let result = self.request("eth_call", params).await?;
        let s = result
            .as_str()
            .ok_or_else(|| ClientError::Malformed("eth_call result not string".into()))?;
        Ok(Bytes::from(parse_hex_bytes(s)?))
    }
}
