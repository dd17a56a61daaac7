//! JSON-RPC Client
//!
//! Talks to an Ethereum-style node over HTTP using the `eth_*` namespace.
//! Requests are blocking `ureq` calls moved onto tokio's blocking pool and
//! wrapped in [`with_retries`].
//!
//! Transactions are submitted unsigned through `eth_sendTransaction`, so the
//! node must manage the sender accounts (development nodes, or nodes behind a
//! signing proxy).
//!
//! ## Usage
//!
//! ```ignore
//! let client = JsonRpcClient::new("http://127.0.0.1:8545");
//! let fees = client.network_fees().await?;
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledgerplan_types::{
    Address, Block, BlockTag, Bytes, CallRequest, Log, NetworkFees, RawCallResult, ReceiptStatus,
    RetryConfig, TransactionInfo, TransactionReceipt, TransactionRequest, TxHash,
};

use crate::retry::with_retries;
use crate::{NetworkClient, RpcError};

/// Priority fee used when the node does not implement `eth_maxPriorityFeePerGas`.
const DEFAULT_PRIORITY_FEE: u128 = 1_000_000_000;

#[derive(Clone)]
pub struct JsonRpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    agent: ureq::Agent,
    retry: RetryConfig,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Default request timeout in seconds (can be overridden by env).
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    /// Default connect timeout in seconds (can be overridden by env).
    const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

    fn default_timeouts() -> (Duration, Duration) {
        let timeout_secs = std::env::var("LEDGERPLAN_RPC_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS);
        let connect_secs = std::env::var("LEDGERPLAN_RPC_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_CONNECT_TIMEOUT_SECS);
        (
            Duration::from_secs(timeout_secs),
            Duration::from_secs(connect_secs),
        )
    }

    fn build_agent(timeout: Duration, connect_timeout: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout(timeout)
            .timeout_connect(connect_timeout)
            .build()
    }

    pub fn new(endpoint: &str) -> Self {
        let (timeout, connect_timeout) = Self::default_timeouts();
        Self::with_config(endpoint, timeout, connect_timeout, RetryConfig::default())
    }

    pub fn with_config(
        endpoint: &str,
        timeout: Duration,
        connect_timeout: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.to_string(),
                agent: Self::build_agent(timeout, connect_timeout),
                retry,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// One blocking request, no retries.
    fn request_blocking(&self, method: &str, params: &Value) -> Result<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response: Value = match self
            .inner
            .agent
            .post(&self.inner.endpoint)
            .set("Content-Type", "application/json")
            .send_json(&body)
        {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| RpcError::Decode(format!("{}: {}", method, e)))?,
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                if code == 429 || code >= 500 {
                    return Err(RpcError::Transport(format!("HTTP {}: {}", code, text)).into());
                }
                // Some nodes answer errors with a 4xx status and a JSON-RPC body.
                serde_json::from_str(&text)
                    .map_err(|_| RpcError::Decode(format!("HTTP {}: {}", code, text)))?
            }
            Err(e) => return Err(RpcError::Transport(e.to_string()).into()),
        };

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let data = error
                .get("data")
                .and_then(|d| d.as_str())
                .and_then(|s| Bytes::from_hex(s).ok());
            return Err(RpcError::Rpc {
                code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
                data,
            }
            .into());
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!(RpcError::Decode(format!("{}: no result", method))))
    }

    /// Run `method` on the blocking pool, retrying transient failures.
    async fn request(&self, method: &'static str, params: Value) -> Result<Value> {
        with_retries(self.inner.retry, || {
            let this = self.clone();
            let params = params.clone();
            async move {
                tokio::task::spawn_blocking(move || this.request_blocking(method, &params))
                    .await
                    .map_err(|e| anyhow!("{} task failed: {}", method, e))?
            }
        })
        .await
    }
}

fn quantity(v: u128) -> String {
    format!("0x{:x}", v)
}

fn parse_quantity(value: &Value, field: &str) -> Result<u128> {
    let s = value
        .as_str()
        .ok_or_else(|| anyhow!(RpcError::Decode(format!("{} is not a string", field))))?;
    let raw = s.strip_prefix("0x").unwrap_or(s);
    if raw.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(raw, 16)
        .map_err(|e| anyhow!(RpcError::Decode(format!("{} {:?}: {}", field, s, e))))
}

fn parse_u64(value: &Value, field: &str) -> Result<u64> {
    let v = parse_quantity(value, field)?;
    u64::try_from(v).map_err(|_| anyhow!(RpcError::Decode(format!("{} overflows u64", field))))
}

fn field<'a>(obj: &'a Value, name: &str) -> Result<&'a Value> {
    obj.get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| anyhow!(RpcError::Decode(format!("missing field {}", name))))
}

fn parse_hex<T, E: std::fmt::Display>(value: &Value, name: &str, f: fn(&str) -> Result<T, E>) -> Result<T> {
    let s = value
        .as_str()
        .ok_or_else(|| anyhow!(RpcError::Decode(format!("{} is not a string", name))))?;
    f(s).map_err(|e| anyhow!(RpcError::Decode(format!("{}: {}", name, e))))
}

fn call_object(request: &CallRequest) -> Value {
    let mut obj = json!({
        "from": request.from.to_hex(),
        "data": request.data.to_hex(),
        "value": quantity(request.value),
    });
    if let Some(to) = request.to {
        obj["to"] = json!(to.to_hex());
    }
    obj
}

fn parse_block(value: &Value) -> Result<Block> {
    Ok(Block {
        number: parse_u64(field(value, "number")?, "number")?,
        hash: field(value, "hash")?
            .as_str()
            .unwrap_or_default()
            .to_string(),
        base_fee_per_gas: match value.get("baseFeePerGas").filter(|v| !v.is_null()) {
            Some(v) => Some(parse_quantity(v, "baseFeePerGas")?),
            None => None,
        },
    })
}

fn parse_log(value: &Value) -> Result<Log> {
    let topics = field(value, "topics")?
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|t| parse_hex(t, "topic", Bytes::from_hex))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    Ok(Log {
        address: parse_hex(field(value, "address")?, "address", Address::from_hex)?,
        topics,
        data: parse_hex(field(value, "data")?, "data", Bytes::from_hex)?,
        log_index: parse_u64(field(value, "logIndex")?, "logIndex")?,
    })
}

fn parse_receipt(value: &Value) -> Result<TransactionReceipt> {
    let status = match value.get("status").and_then(|s| s.as_str()) {
        Some("0x1") | Some("0x01") => ReceiptStatus::Success,
        _ => ReceiptStatus::Failure,
    };
    let contract_address = match value.get("contractAddress").filter(|v| !v.is_null()) {
        Some(v) => Some(parse_hex(v, "contractAddress", Address::from_hex)?),
        None => None,
    };
    let logs = match value.get("logs").and_then(|l| l.as_array()) {
        Some(arr) => arr.iter().map(parse_log).collect::<Result<Vec<_>>>()?,
        None => vec![],
    };
    Ok(TransactionReceipt {
        transaction_hash: parse_hex(
            field(value, "transactionHash")?,
            "transactionHash",
            TxHash::from_hex,
        )?,
        block_number: parse_u64(field(value, "blockNumber")?, "blockNumber")?,
        block_hash: field(value, "blockHash")?
            .as_str()
            .unwrap_or_default()
            .to_string(),
        status,
        contract_address,
        logs,
    })
}

fn parse_transaction(value: &Value) -> Result<TransactionInfo> {
    Ok(TransactionInfo {
        hash: parse_hex(field(value, "hash")?, "hash", TxHash::from_hex)?,
        from: parse_hex(field(value, "from")?, "from", Address::from_hex)?,
        nonce: parse_u64(field(value, "nonce")?, "nonce")?,
        block_number: match value.get("blockNumber").filter(|v| !v.is_null()) {
            Some(v) => Some(parse_u64(v, "blockNumber")?),
            None => None,
        },
    })
}

#[async_trait]
impl NetworkClient for JsonRpcClient {
    async fn chain_id(&self) -> Result<u64> {
        let v = self.request("eth_chainId", json!([])).await?;
        parse_u64(&v, "chainId")
    }

    async fn latest_block(&self) -> Result<Block> {
        let v = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        parse_block(&v).context("eth_getBlockByNumber")
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> Result<u64> {
        let v = self
            .request(
                "eth_getTransactionCount",
                json!([address.to_hex(), tag.to_string()]),
            )
            .await?;
        parse_u64(&v, "transactionCount")
    }

    async fn network_fees(&self) -> Result<NetworkFees> {
        let block = self.latest_block().await?;
        match block.base_fee_per_gas {
            Some(base_fee) => {
                let priority = match self.request("eth_maxPriorityFeePerGas", json!([])).await {
                    Ok(v) => parse_quantity(&v, "maxPriorityFeePerGas")?,
                    Err(e) => {
                        tracing::debug!(error = %e, "eth_maxPriorityFeePerGas unavailable, using default");
                        DEFAULT_PRIORITY_FEE
                    }
                };
                Ok(NetworkFees::Eip1559 {
                    max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(priority),
                    max_priority_fee_per_gas: priority,
                })
            }
            None => {
                let v = self.request("eth_gasPrice", json!([])).await?;
                Ok(NetworkFees::Legacy {
                    gas_price: parse_quantity(&v, "gasPrice")?,
                })
            }
        }
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        let v = self
            .request("eth_estimateGas", json!([call_object(request)]))
            .await?;
        parse_u64(&v, "gas")
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash> {
        let mut tx = call_object(&CallRequest::from(request));
        tx["nonce"] = json!(quantity(request.nonce as u128));
        tx["gas"] = json!(quantity(request.gas_limit as u128));
        tx["chainId"] = json!(quantity(request.chain_id as u128));
        match request.fees {
            NetworkFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                tx["maxFeePerGas"] = json!(quantity(max_fee_per_gas));
                tx["maxPriorityFeePerGas"] = json!(quantity(max_priority_fee_per_gas));
            }
            NetworkFees::Legacy { gas_price } => {
                tx["gasPrice"] = json!(quantity(gas_price));
            }
        }
        let v = self.request("eth_sendTransaction", json!([tx])).await?;
        parse_hex(&v, "transactionHash", TxHash::from_hex)
    }

    async fn transaction(&self, hash: TxHash) -> Result<Option<TransactionInfo>> {
        let v = self
            .request("eth_getTransactionByHash", json!([hash.to_hex()]))
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        parse_transaction(&v).map(Some)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        let v = self
            .request("eth_getTransactionReceipt", json!([hash.to_hex()]))
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        parse_receipt(&v).map(Some)
    }

    async fn call(&self, request: &CallRequest, tag: BlockTag) -> Result<RawCallResult> {
        match self
            .request("eth_call", json!([call_object(request), tag.to_string()]))
            .await
        {
            Ok(v) => Ok(RawCallResult {
                return_data: parse_hex(&v, "result", Bytes::from_hex)?,
                success: true,
            }),
            Err(e) => match e.downcast_ref::<RpcError>() {
                Some(err) if err.is_execution_error() => Ok(RawCallResult {
                    return_data: err.revert_data().cloned().unwrap_or_default(),
                    success: false,
                }),
                _ => Err(e),
            },
        }
    }
}
