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

//! Table definitions. Both tables merge on their sort key, keeping the row
//! with the highest version column, so re-inserting an existing key can
//! never produce a second authoritative row.

pub const ORDERS_TABLE: &str = "orders";
pub const PROGRESS_TABLE: &str = "collection_progress";

pub const CREATE_ORDERS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS orders (
	signature String,
	event_type LowCardinality(String),
	order_id String,
	slot UInt64,
	block_time DateTime,
	maker Nullable(String),
	give_token_address Nullable(String),
	give_token_symbol Nullable(String),
	give_amount Nullable(UInt128),
	give_amount_usd Nullable(Float64),
	give_chain_id Nullable(UInt64),
	take_token_address Nullable(String),
	take_token_symbol Nullable(String),
	take_amount Nullable(UInt128),
	take_amount_usd Nullable(Float64),
	take_chain_id Nullable(UInt64),
	receiver Nullable(String),
	taker Nullable(String),
	fulfilled_amount Nullable(UInt128),
	fulfilled_amount_usd Nullable(Float64),
	version UInt64 DEFAULT toUnixTimestamp(now())
)
ENGINE = ReplacingMergeTree(version)
PARTITION BY toYYYYMM(block_time)
ORDER BY (signature, event_type)";

pub const CREATE_PROGRESS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS collection_progress (
	program_id String,
	event_type LowCardinality(String),
	last_signature String,
	total_collected UInt64,
	updated_at DateTime DEFAULT now()
)
ENGINE = ReplacingMergeTree(updated_at)
ORDER BY (program_id, event_type)";
