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

//! JSON-RPC 2.0 transport. Single calls and batches share one typed
//! request/response envelope; a single call is a batch of one.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcErrorObject {
	/// The integer identifier of the error
	pub code: i32,
	/// A string describing the error
	pub message: String,
	/// Additional data specific to the error
	pub data: Option<Box<serde_json::value::RawValue>>,
}

#[derive(Error, Debug)]
pub enum Error {
	#[error("Transport error: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("RPC error response: code {}: {}", .0.code, .0.message)]
	Rpc(RpcErrorObject),
	#[error("No response for request {0} in rpc batch")]
	MissingBatchResponse(usize),
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
	jsonrpc: &'static str,
	id: usize,
	method: &'a str,
	params: serde_json::Value,
}

impl<'a> RpcRequest<'a> {
	fn new(id: usize, method: &'a str, params: serde_json::Value) -> Self {
		Self { jsonrpc: "2.0", id, method, params }
	}
}

/// One envelope of a response. Servers answer either `result` or `error`;
/// an absent `result` on a success envelope is a legitimate null (an
/// unknown transaction, for instance).
#[derive(Debug, Deserialize)]
struct RpcResponse {
	#[serde(default)]
	id: Option<usize>,
	#[serde(default)]
	result: Option<serde_json::Value>,
	#[serde(default)]
	error: Option<RpcErrorObject>,
}

impl RpcResponse {
	fn into_result(self) -> Result<serde_json::Value, Error> {
		match self.error {
			Some(error) => Err(Error::Rpc(error)),
			None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
		}
	}
}

/// Make a single JSON-RPC 2.0 call, returning the `result` value.
pub async fn call_rpc_raw(
	client: &Client,
	url: &str,
	method: &str,
	params: Option<serde_json::Value>,
) -> Result<serde_json::Value, Error> {
	let request = RpcRequest::new(0, method, params.unwrap_or_else(|| json!([])));
	let response: RpcResponse = client.post(url).json(&request).send().await?.json().await?;
	response.into_result()
}

/// Make a JSON-RPC 2.0 batch call: one request object per params entry, all
/// with the same method. Results come back in request order, `Err` per slot
/// for error responses. Responses may arrive in any order; they are matched
/// back up by id.
pub async fn call_rpc_batch_raw(
	client: &Client,
	url: &str,
	method: &str,
	params_list: Vec<serde_json::Value>,
) -> Result<Vec<Result<serde_json::Value, Error>>, Error> {
	let requests = params_list
		.into_iter()
		.enumerate()
		.map(|(id, params)| RpcRequest::new(id, method, params))
		.collect::<Vec<_>>();
	let expected = requests.len();

	let responses: Vec<RpcResponse> =
		client.post(url).json(&requests).send().await?.json().await?;

	let mut results = (0..expected)
		.map(|id| Err(Error::MissingBatchResponse(id)))
		.collect::<Vec<_>>();

	for response in responses {
		match response.id {
			Some(id) if id < expected => results[id] = response.into_result(),
			_ => {},
		}
	}

	Ok(results)
}
