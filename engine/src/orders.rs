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

//! Order event model. Events are immutable once written; at most one record
//! per `(signature, event_type)` is authoritative.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
	Created,
	Fulfilled,
}

impl fmt::Display for EventType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Created => "created",
			Self::Fulfilled => "fulfilled",
		}
		.fmt(f)
	}
}

impl FromStr for EventType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"created" => Ok(Self::Created),
			"fulfilled" => Ok(Self::Fulfilled),
			invalid => Err(format!("Invalid event type: {invalid}. Expected created|fulfilled")),
		}
	}
}

/// Large amounts cross every serialized boundary as decimal strings.
pub mod amount_string {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(
		amount: &Option<u128>,
		serializer: S,
	) -> Result<S::Ok, S::Error> {
		match amount {
			Some(amount) => serializer.serialize_some(&amount.to_string()),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<Option<u128>, D::Error> {
		let value: Option<String> = Option::deserialize(deserializer)?;
		value
			.map(|value| value.parse::<u128>().map_err(serde::de::Error::custom))
			.transpose()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
	/// 32-byte deterministic order hash, lowercase hex.
	pub order_id: String,
	pub event_type: EventType,
	pub signature: String,
	pub slot: u64,
	pub block_time: DateTime<Utc>,

	// Populated for `created` only.
	#[serde(default)]
	pub maker: Option<String>,
	#[serde(default)]
	pub give_token_address: Option<String>,
	#[serde(default)]
	pub give_token_symbol: Option<String>,
	#[serde(default, with = "amount_string")]
	pub give_amount: Option<u128>,
	#[serde(default)]
	pub give_amount_usd: Option<f64>,
	#[serde(default, with = "amount_string")]
	pub give_chain_id: Option<u128>,
	#[serde(default)]
	pub take_token_address: Option<String>,
	#[serde(default)]
	pub take_token_symbol: Option<String>,
	#[serde(default, with = "amount_string")]
	pub take_amount: Option<u128>,
	#[serde(default)]
	pub take_amount_usd: Option<f64>,
	#[serde(default, with = "amount_string")]
	pub take_chain_id: Option<u128>,
	#[serde(default)]
	pub receiver: Option<String>,

	// Populated for `fulfilled` only.
	#[serde(default)]
	pub taker: Option<String>,
	#[serde(default, with = "amount_string")]
	pub fulfilled_amount: Option<u128>,
	#[serde(default)]
	pub fulfilled_amount_usd: Option<f64>,
}

impl OrderEvent {
	pub fn new(
		order_id: String,
		event_type: EventType,
		signature: String,
		slot: u64,
		block_time: DateTime<Utc>,
	) -> Self {
		Self {
			order_id,
			event_type,
			signature,
			slot,
			block_time,
			maker: None,
			give_token_address: None,
			give_token_symbol: None,
			give_amount: None,
			give_amount_usd: None,
			give_chain_id: None,
			take_token_address: None,
			take_token_symbol: None,
			take_amount: None,
			take_amount_usd: None,
			take_chain_id: None,
			receiver: None,
			taker: None,
			fulfilled_amount: None,
			fulfilled_amount_usd: None,
		}
	}
}
