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

//! Serde model of the JSON-RPC surface the collector consumes. Transactions
//! are always requested with the `jsonParsed` encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::commitment_config::CommitmentConfig;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum UiTransactionEncoding {
	Binary, // Legacy. Retained for RPC backwards compatibility
	Base58,
	Base64,
	Json,
	JsonParsed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcSignaturesForAddressConfig {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub before: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub until: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub limit: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub commitment: Option<CommitmentConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransactionConfig {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub encoding: Option<UiTransactionEncoding>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub commitment: Option<CommitmentConfig>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_supported_transaction_version: Option<u8>,
}

/// One entry of a `getSignaturesForAddress` page, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcConfirmedTransactionStatusWithSignature {
	pub signature: String,
	pub slot: u64,
	#[serde(default)]
	pub err: Option<Value>,
	#[serde(default)]
	pub memo: Option<String>,
	#[serde(default)]
	pub block_time: Option<i64>,
	#[serde(default)]
	pub confirmation_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedConfirmedTransactionWithStatusMeta {
	pub slot: u64,
	#[serde(default)]
	pub block_time: Option<i64>,
	pub transaction: UiTransaction,
	#[serde(default)]
	pub meta: Option<UiTransactionStatusMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTransaction {
	pub signatures: Vec<String>,
	pub message: UiMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
	#[serde(default)]
	pub account_keys: Vec<UiAccountKey>,
	#[serde(default)]
	pub instructions: Vec<UiInstruction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiAccountKey {
	pub pubkey: String,
	#[serde(default)]
	pub signer: bool,
	#[serde(default)]
	pub writable: bool,
}

/// Parsed-encoding instruction. Only the program id matters to the
/// collector; everything else passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiInstruction {
	#[serde(default)]
	pub program_id: Option<String>,
	#[serde(default)]
	pub program: Option<String>,
	#[serde(default)]
	pub parsed: Option<Value>,
	#[serde(default)]
	pub data: Option<String>,
	#[serde(default)]
	pub accounts: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTransactionStatusMeta {
	#[serde(default)]
	pub err: Option<Value>,
	#[serde(default)]
	pub fee: Option<u64>,
	#[serde(default)]
	pub log_messages: Option<Vec<String>>,
	#[serde(default)]
	pub pre_token_balances: Option<Vec<UiTransactionTokenBalance>>,
	#[serde(default)]
	pub post_token_balances: Option<Vec<UiTransactionTokenBalance>>,
	#[serde(default)]
	pub inner_instructions: Option<Vec<UiInnerInstructions>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiInnerInstructions {
	pub index: u8,
	pub instructions: Vec<UiInstruction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTransactionTokenBalance {
	pub account_index: u8,
	pub mint: String,
	#[serde(default)]
	pub owner: Option<String>,
	pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTokenAmount {
	/// Raw atomic amount as a decimal string. May exceed 64 bits.
	pub amount: String,
	pub decimals: u32,
	#[serde(default)]
	pub ui_amount: Option<f64>,
	#[serde(default)]
	pub ui_amount_string: Option<String>,
}
