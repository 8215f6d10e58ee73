// Copyright 2025 Orderscan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::{from_value, json};

use super::rpc_client_api::*;
use crate::rpc_utils;

#[derive(Clone)]
pub struct SolRpcClient {
	// Internally the Client is Arc'd
	client: Client,
	endpoint: String,
}

impl SolRpcClient {
	pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
		let client = Client::builder().timeout(timeout).build()?;
		Ok(Self { client, endpoint })
	}

	async fn call_rpc(
		&self,
		method: &str,
		params: Option<serde_json::Value>,
	) -> Result<serde_json::Value, rpc_utils::Error> {
		rpc_utils::call_rpc_raw(&self.client, &self.endpoint, method, params).await
	}
}

#[async_trait::async_trait]
pub trait SolRpcApi: Send + Sync {
	async fn get_slot(&self, commitment: super::commitment_config::CommitmentConfig)
		-> Result<u64>;

	async fn get_health(&self) -> Result<()>;

	/// Signatures for `address`, newest first, strictly older than
	/// `config.before` when set.
	async fn get_signatures_for_address(
		&self,
		address: &str,
		config: RpcSignaturesForAddressConfig,
	) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>>;

	/// `None` when the node does not know the signature.
	async fn get_transaction(
		&self,
		signature: &str,
		config: RpcTransactionConfig,
	) -> Result<Option<EncodedConfirmedTransactionWithStatusMeta>>;

	/// One JSON-RPC batch request of `getTransaction` calls. The result has
	/// one entry per input signature in input order; `None` marks a
	/// not-found transaction. Any per-slot error fails the whole batch.
	async fn get_transactions_batch(
		&self,
		signatures: &[String],
		config: RpcTransactionConfig,
	) -> Result<Vec<Option<EncodedConfirmedTransactionWithStatusMeta>>>;
}

#[async_trait::async_trait]
impl SolRpcApi for SolRpcClient {
	async fn get_slot(
		&self,
		commitment: super::commitment_config::CommitmentConfig,
	) -> Result<u64> {
		let response = self.call_rpc("getSlot", Some(json!([json!(commitment)]))).await?;
		let slot: u64 =
			from_value(response).map_err(|err| anyhow!("Failed to parse slot: {}", err))?;
		Ok(slot)
	}

	async fn get_health(&self) -> Result<()> {
		let response = self.call_rpc("getHealth", None).await?;
		match response.as_str() {
			Some("ok") => Ok(()),
			other => Err(anyhow!("Unhealthy node response: {other:?}")),
		}
	}

	async fn get_signatures_for_address(
		&self,
		address: &str,
		config: RpcSignaturesForAddressConfig,
	) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
		let response = self
			.call_rpc("getSignaturesForAddress", Some(json!([address, json!(config)])))
			.await?;
		let signatures: Vec<RpcConfirmedTransactionStatusWithSignature> = from_value(response)
			.map_err(|err| anyhow!("Failed to parse signatures page: {}", err))?;
		Ok(signatures)
	}

	async fn get_transaction(
		&self,
		signature: &str,
		config: RpcTransactionConfig,
	) -> Result<Option<EncodedConfirmedTransactionWithStatusMeta>> {
		let response =
			self.call_rpc("getTransaction", Some(json!([signature, json!(config)]))).await?;

		if response.is_null() {
			return Ok(None);
		}

		let transaction_data = from_value(response)
			.map_err(|err| anyhow!("Failed to parse transaction data: {}", err))?;

		Ok(Some(transaction_data))
	}

	async fn get_transactions_batch(
		&self,
		signatures: &[String],
		config: RpcTransactionConfig,
	) -> Result<Vec<Option<EncodedConfirmedTransactionWithStatusMeta>>> {
		let params_list = signatures
			.iter()
			.map(|signature| json!([signature, json!(config)]))
			.collect::<Vec<_>>();

		let responses = rpc_utils::call_rpc_batch_raw(
			&self.client,
			&self.endpoint,
			"getTransaction",
			params_list,
		)
		.await?;

		responses
			.into_iter()
			.map(|response| {
				let value = response?;
				if value.is_null() {
					Ok(None)
				} else {
					let transaction = from_value(value)
						.map_err(|err| anyhow!("Failed to parse transaction data: {}", err))?;
					Ok(Some(transaction))
				}
			})
			.collect()
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::sol::commitment_config::CommitmentConfig;

	#[ignore = "requires access to external RPC"]
	#[tokio::test]
	async fn test_get_slot_mainnet() {
		let client = SolRpcClient::new(
			"https://api.mainnet-beta.solana.com".to_string(),
			Duration::from_secs(30),
		)
		.unwrap();

		let slot = client.get_slot(CommitmentConfig::confirmed()).await.unwrap();
		assert!(slot > 0);
	}
}
