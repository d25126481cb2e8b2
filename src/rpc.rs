//! JSON-RPC client for Ethereum nodes
//!
//! Provides the two calls the indexer needs: `eth_getLogs` and
//! `eth_blockNumber`. Handles hex string parsing and error handling.

use crate::filter::{LogQuery, LogSource};
use crate::types::Log;
use crate::watcher::ChainTip;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a new RPC client.
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))?;

        let json: Value = response
            .json()
            .await
            .context("Failed to parse RPC response")?;

        // Check for RPC error
        if let Some(error) = json.get("error") {
            anyhow::bail!("RPC error: {}", error);
        }

        // Extract result
        json.get("result")
            .cloned()
            .context("RPC response missing 'result' field")
    }

    /// Get the number of the most recent block.
    pub async fn get_block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;

        let number_str = result
            .as_str()
            .context("Block number response is not a string")?;
        let number_str = number_str.strip_prefix("0x").unwrap_or(number_str);
        if number_str.is_empty() {
            anyhow::bail!("Block number is empty");
        }
        u64::from_str_radix(number_str, 16).context("Failed to parse block number")
    }

    /// Fetch logs for an inclusive block range, optionally restricted to
    /// a set of emitting addresses.
    pub async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>> {
        let mut filter = json!({
            "fromBlock": format!("0x{:x}", query.from_block),
            "toBlock": format!("0x{:x}", query.to_block),
        });
        if let Some(addresses) = &query.addresses {
            filter["address"] = json!(addresses);
        }

        let result = self.call("eth_getLogs", json!([filter])).await?;
        serde_json::from_value(result).context("Failed to deserialize logs")
    }
}

#[async_trait]
impl LogSource for RpcClient {
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>> {
        RpcClient::get_logs(self, query).await
    }
}

#[async_trait]
impl ChainTip for RpcClient {
    async fn latest_block(&self) -> Result<u64> {
        self.get_block_number().await
    }
}
