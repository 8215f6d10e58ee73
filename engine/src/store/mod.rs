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

//! Idempotent storage layer. Inserts pre-check the replacing-on-merge
//! `orders` table so a signature/event-type pair is only ever written once;
//! the checkpoint table records how far each collector has walked.
//!
//! Writes propagate errors to the caller. Reads are wrapped: on any error
//! they log and return a safe empty result, so the push fan-out and UI keep
//! serving stale-but-monotonic data through transient outages.

pub mod client;
#[cfg(test)]
pub mod memory;
pub mod schema;

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
	orders::{EventType, OrderEvent},
	settings,
};
use client::{escape, ClickhouseClient};
use schema::{CREATE_ORDERS_TABLE, CREATE_PROGRESS_TABLE, ORDERS_TABLE, PROGRESS_TABLE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
	pub program_id: String,
	pub event_type: EventType,
	pub last_signature: String,
	pub total_collected: u64,
	pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalStats {
	pub created_count: u64,
	pub fulfilled_count: u64,
	pub created_volume_usd: f64,
	pub fulfilled_volume_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyVolume {
	pub day: String,
	pub created_count: u64,
	pub fulfilled_count: u64,
	pub created_volume_usd: f64,
	pub fulfilled_volume_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenVolume {
	pub symbol: String,
	pub orders: u64,
	pub volume_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
	pub order_id: String,
	pub event_type: String,
	pub signature: String,
	pub slot: u64,
	pub block_time: String,
	#[serde(default)]
	pub maker: Option<String>,
	#[serde(default)]
	pub taker: Option<String>,
	#[serde(default)]
	pub give_token_symbol: Option<String>,
	#[serde(default)]
	pub give_amount_usd: Option<f64>,
	#[serde(default)]
	pub fulfilled_amount_usd: Option<f64>,
}

#[async_trait::async_trait]
pub trait OrderStore: Send + Sync {
	async fn initialize(&self) -> Result<()>;

	/// Inserts events not already present, returning
	/// `(inserted, duplicates)`. Re-storing the same input is a no-op with
	/// every event counted as a duplicate.
	async fn store_events(&self, events: &[OrderEvent]) -> Result<(u64, u64)>;

	async fn get_checkpoint(
		&self,
		program_id: &str,
		event_type: EventType,
	) -> Result<Option<CheckpointRecord>>;

	async fn update_checkpoint(
		&self,
		program_id: &str,
		event_type: EventType,
		last_signature: &str,
		total_collected: u64,
	) -> Result<()>;

	/// Authoritative count from the orders table itself.
	async fn count_orders(&self, event_type: EventType) -> Result<u64>;

	async fn total_stats(&self) -> TotalStats;
	async fn daily_volumes(&self, days: u32) -> Vec<DailyVolume>;
	async fn top_tokens(&self, limit: u32) -> Vec<TokenVolume>;
	async fn recent_orders(&self, limit: u32) -> Vec<OrderSummary>;
}

/// Insert-side row shape. Amounts go out as decimal strings (the columns are
/// UInt128); chain ids that overflow the UInt64 columns are coerced to null
/// rather than truncated.
#[derive(Debug, Serialize)]
struct OrderRow<'a> {
	signature: &'a str,
	event_type: String,
	order_id: &'a str,
	slot: u64,
	block_time: String,
	maker: Option<&'a str>,
	give_token_address: Option<&'a str>,
	give_token_symbol: Option<&'a str>,
	give_amount: Option<String>,
	give_amount_usd: Option<f64>,
	give_chain_id: Option<u64>,
	take_token_address: Option<&'a str>,
	take_token_symbol: Option<&'a str>,
	take_amount: Option<String>,
	take_amount_usd: Option<f64>,
	take_chain_id: Option<u64>,
	receiver: Option<&'a str>,
	taker: Option<&'a str>,
	fulfilled_amount: Option<String>,
	fulfilled_amount_usd: Option<f64>,
}

fn coerce_chain_id(chain_id: Option<u128>) -> Option<u64> {
	chain_id.and_then(|chain_id| u64::try_from(chain_id).ok())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
	at.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl<'a> From<&'a OrderEvent> for OrderRow<'a> {
	fn from(event: &'a OrderEvent) -> Self {
		Self {
			signature: &event.signature,
			event_type: event.event_type.to_string(),
			order_id: &event.order_id,
			slot: event.slot,
			block_time: format_timestamp(event.block_time),
			maker: event.maker.as_deref(),
			give_token_address: event.give_token_address.as_deref(),
			give_token_symbol: event.give_token_symbol.as_deref(),
			give_amount: event.give_amount.map(|amount| amount.to_string()),
			give_amount_usd: event.give_amount_usd,
			give_chain_id: coerce_chain_id(event.give_chain_id),
			take_token_address: event.take_token_address.as_deref(),
			take_token_symbol: event.take_token_symbol.as_deref(),
			take_amount: event.take_amount.map(|amount| amount.to_string()),
			take_amount_usd: event.take_amount_usd,
			take_chain_id: coerce_chain_id(event.take_chain_id),
			receiver: event.receiver.as_deref(),
			taker: event.taker.as_deref(),
			fulfilled_amount: event.fulfilled_amount.map(|amount| amount.to_string()),
			fulfilled_amount_usd: event.fulfilled_amount_usd,
		}
	}
}

pub struct ClickhouseStore {
	client: ClickhouseClient,
}

impl ClickhouseStore {
	pub fn from_settings(database: &settings::Database) -> Result<Self> {
		Ok(Self {
			client: ClickhouseClient::from_settings(database)
				.context("Could not create database client")?,
		})
	}
}

#[async_trait::async_trait]
impl OrderStore for ClickhouseStore {
	async fn initialize(&self) -> Result<()> {
		self.client
			.execute(&format!("CREATE DATABASE IF NOT EXISTS {}", self.client.database()))
			.await
			.context("Could not create database")?;
		self.client
			.execute_in_database(CREATE_ORDERS_TABLE)
			.await
			.context("Could not create orders table")?;
		self.client
			.execute_in_database(CREATE_PROGRESS_TABLE)
			.await
			.context("Could not create collection_progress table")?;
		info!("Database initialized");
		Ok(())
	}

	async fn store_events(&self, events: &[OrderEvent]) -> Result<(u64, u64)> {
		if events.is_empty() {
			return Ok((0, 0));
		}

		let signatures = events
			.iter()
			.map(|event| format!("'{}'", escape(&event.signature)))
			.unique()
			.join(",");

		#[derive(Deserialize)]
		struct ExistingRow {
			signature: String,
			event_type: String,
		}

		let existing: HashSet<(String, String)> = self
			.client
			.query_rows::<ExistingRow>(&format!(
				"SELECT signature, event_type FROM {ORDERS_TABLE} FINAL \
				 WHERE signature IN ({signatures})"
			))
			.await
			.context("Could not check for existing events")?
			.into_iter()
			.map(|row| (row.signature, row.event_type))
			.collect();

		let mut seen = existing;
		let mut rows = Vec::new();
		for event in events {
			let key = (event.signature.clone(), event.event_type.to_string());
			if seen.insert(key) {
				rows.push(OrderRow::from(event));
			}
		}

		self.client
			.insert_rows(ORDERS_TABLE, &rows)
			.await
			.context("Could not insert order events")?;

		let inserted = rows.len() as u64;
		Ok((inserted, events.len() as u64 - inserted))
	}

	async fn get_checkpoint(
		&self,
		program_id: &str,
		event_type: EventType,
	) -> Result<Option<CheckpointRecord>> {
		#[derive(Deserialize)]
		struct ProgressRow {
			program_id: String,
			event_type: String,
			last_signature: String,
			total_collected: u64,
			updated_at: String,
		}

		let rows = self
			.client
			.query_rows::<ProgressRow>(&format!(
				"SELECT program_id, event_type, last_signature, total_collected, \
				 toString(updated_at) AS updated_at FROM {PROGRESS_TABLE} FINAL \
				 WHERE program_id = '{}' AND event_type = '{}'",
				escape(program_id),
				event_type,
			))
			.await
			.context("Could not read checkpoint")?;

		Ok(rows.into_iter().next().map(|row| CheckpointRecord {
			program_id: row.program_id,
			event_type,
			last_signature: row.last_signature,
			total_collected: row.total_collected,
			updated_at: row.updated_at,
		}))
	}

	async fn update_checkpoint(
		&self,
		program_id: &str,
		event_type: EventType,
		last_signature: &str,
		total_collected: u64,
	) -> Result<()> {
		#[derive(Serialize)]
		struct ProgressRow<'a> {
			program_id: &'a str,
			event_type: String,
			last_signature: &'a str,
			total_collected: u64,
			updated_at: String,
		}

		self.client
			.insert_rows(
				PROGRESS_TABLE,
				&[ProgressRow {
					program_id,
					event_type: event_type.to_string(),
					last_signature,
					total_collected,
					updated_at: format_timestamp(Utc::now()),
				}],
			)
			.await
			.context("Could not update checkpoint")?;
		Ok(())
	}

	async fn count_orders(&self, event_type: EventType) -> Result<u64> {
		#[derive(Deserialize)]
		struct CountRow {
			count: u64,
		}

		let rows = self
			.client
			.query_rows::<CountRow>(&format!(
				"SELECT count() AS count FROM {ORDERS_TABLE} FINAL WHERE event_type = '{event_type}'"
			))
			.await
			.context("Could not count orders")?;
		Ok(rows.into_iter().next().map(|row| row.count).unwrap_or(0))
	}

	async fn total_stats(&self) -> TotalStats {
		self.client
			.query_rows::<TotalStats>(&format!(
				"SELECT \
				 countIf(event_type = 'created') AS created_count, \
				 countIf(event_type = 'fulfilled') AS fulfilled_count, \
				 sumIf(coalesce(give_amount_usd, 0), event_type = 'created') AS created_volume_usd, \
				 sumIf(coalesce(fulfilled_amount_usd, 0), event_type = 'fulfilled') AS fulfilled_volume_usd \
				 FROM {ORDERS_TABLE} FINAL"
			))
			.await
			.map(|rows| rows.into_iter().next().unwrap_or_default())
			.unwrap_or_else(|error| {
				error!("Failed to read total stats: {error}");
				TotalStats::default()
			})
	}

	async fn daily_volumes(&self, days: u32) -> Vec<DailyVolume> {
		self.client
			.query_rows::<DailyVolume>(&format!(
				"SELECT toString(toDate(block_time)) AS day, \
				 countIf(event_type = 'created') AS created_count, \
				 countIf(event_type = 'fulfilled') AS fulfilled_count, \
				 sumIf(coalesce(give_amount_usd, 0), event_type = 'created') AS created_volume_usd, \
				 sumIf(coalesce(fulfilled_amount_usd, 0), event_type = 'fulfilled') AS fulfilled_volume_usd \
				 FROM {ORDERS_TABLE} FINAL \
				 WHERE block_time >= now() - INTERVAL {days} DAY \
				 GROUP BY day ORDER BY day"
			))
			.await
			.unwrap_or_else(|error| {
				error!("Failed to read daily volumes: {error}");
				Vec::new()
			})
	}

	async fn top_tokens(&self, limit: u32) -> Vec<TokenVolume> {
		self.client
			.query_rows::<TokenVolume>(&format!(
				"SELECT give_token_symbol AS symbol, count() AS orders, \
				 sum(coalesce(give_amount_usd, 0)) AS volume_usd \
				 FROM {ORDERS_TABLE} FINAL \
				 WHERE event_type = 'created' AND give_token_symbol IS NOT NULL \
				 GROUP BY symbol ORDER BY volume_usd DESC LIMIT {limit}"
			))
			.await
			.unwrap_or_else(|error| {
				error!("Failed to read top tokens: {error}");
				Vec::new()
			})
	}

	async fn recent_orders(&self, limit: u32) -> Vec<OrderSummary> {
		self.client
			.query_rows::<OrderSummary>(&format!(
				"SELECT order_id, event_type, signature, slot, \
				 toString(block_time) AS block_time, maker, taker, give_token_symbol, \
				 give_amount_usd, fulfilled_amount_usd \
				 FROM {ORDERS_TABLE} FINAL ORDER BY block_time DESC LIMIT {limit}"
			))
			.await
			.unwrap_or_else(|error| {
				error!("Failed to read recent orders: {error}");
				Vec::new()
			})
	}
}
