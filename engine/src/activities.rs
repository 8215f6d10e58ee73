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

//! The side-effectful units the workflow invokes. Every fallible outcome is
//! classified at this boundary as retryable or non-retryable so the driver
//! can apply its declarative retry policy; heartbeats are emitted at phase
//! transitions and per 50 items of progress.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
	orders::{EventType, OrderEvent},
	settings,
	sol::{
		commitment_config::{CommitmentConfig, CommitmentLevel},
		fetcher::{FetchProgress, ParallelFetcher},
		pool::{classify_rpc_error, PoolStats, RpcFailure, RpcPool},
		rpc_client_api::{
			RpcSignaturesForAddressConfig, RpcTransactionConfig, UiTransactionEncoding,
		},
	},
	parser::Parser,
	store::OrderStore,
};

#[derive(Error, Debug)]
pub enum ActivityError {
	/// Transient: the engine-level retry policy resubmits these.
	#[error("Retryable activity error: {0}")]
	Retryable(#[source] anyhow::Error),
	/// Permanent for this input: fails the activity and surfaces on the
	/// workflow.
	#[error("Non-retryable activity error: {0}")]
	NonRetryable(#[source] anyhow::Error),
	/// The process is misconfigured (credentials, missing database). No
	/// input will ever succeed; never retried at any layer.
	#[error("Fatal activity error: {0}")]
	Fatal(#[source] anyhow::Error),
}

/// Faults no retry can cure: the deployment itself is wrong.
const FATAL_PATTERNS: &[&str] = &[
	"authentication failed",
	"access denied",
	"unauthorized",
	"invalid credentials",
	"unknown database",
];

/// Centralized classification. Unknown errors default to retryable.
pub fn classify(error: anyhow::Error) -> ActivityError {
	let message = format!("{error:#}").to_lowercase();
	if FATAL_PATTERNS.iter().any(|pattern| message.contains(pattern)) {
		return ActivityError::Fatal(error);
	}
	match classify_rpc_error(&message) {
		RpcFailure::Retryable => ActivityError::Retryable(error),
		RpcFailure::NonRetryable => ActivityError::NonRetryable(error),
	}
}

/// Emitted at phase transitions and on progress milestones so the driver
/// knows a long activity is alive.
#[derive(Clone)]
pub struct Heartbeat {
	callback: Arc<dyn Fn(&str) + Send + Sync>,
}

impl Heartbeat {
	pub fn new(callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
		Self { callback: Arc::new(callback) }
	}

	pub fn noop() -> Self {
		Self::new(|_| {})
	}

	pub fn beat(&self, phase: &str) {
		debug!("Activity heartbeat: {phase}");
		(self.callback)(phase);
	}
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub initial_delay: Duration,
	pub max_delay: Duration,
}

impl From<&settings::Retry> for RetryPolicy {
	fn from(retry: &settings::Retry) -> Self {
		Self {
			max_retries: retry.max_retries,
			initial_delay: Duration::from_millis(retry.initial_delay_ms),
			max_delay: Duration::from_millis(retry.max_delay_ms),
		}
	}
}

/// Engine-level retry around a whole activity. Each attempt runs under
/// `timeout`; timeouts count as retryable failures. Non-retryable errors
/// stop immediately.
pub async fn with_retry<T, F, Fut>(
	policy: &RetryPolicy,
	name: &str,
	timeout: Duration,
	mut activity: F,
) -> Result<T, ActivityError>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, ActivityError>>,
{
	let mut attempt = 0u32;
	loop {
		let result = match tokio::time::timeout(timeout, activity()).await {
			Ok(result) => result,
			Err(_) => Err(ActivityError::Retryable(anyhow!("Activity {name} timed out"))),
		};

		match result {
			Ok(value) => return Ok(value),
			Err(fatal @ ActivityError::Fatal(_)) => {
				error!("Activity {name} hit a fatal error: {fatal}");
				return Err(fatal);
			},
			Err(permanent @ ActivityError::NonRetryable(_)) => {
				warn!("Activity {name} failed permanently: {permanent}");
				return Err(permanent);
			},
			Err(ActivityError::Retryable(error)) => {
				attempt += 1;
				if attempt > policy.max_retries {
					warn!("Activity {name} exhausted {} retries: {error:#}", policy.max_retries);
					return Err(ActivityError::Retryable(error));
				}
				let delay = utilities::backoff_with_jitter(
					policy.initial_delay,
					attempt,
					policy.max_delay,
				);
				warn!(
					"Activity {name} attempt {attempt} failed: {error:#}. Retrying in {}ms",
					delay.as_millis()
				);
				tokio::time::sleep(delay).await;
			},
		}
	}
}

// ==== Serialized activity results ====
// Large integers cross as strings (via the order event model) and times as
// ISO strings.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressInfo {
	pub last_signature: Option<String>,
	pub total_collected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureInfo {
	pub signature: String,
	pub slot: u64,
	pub block_time: Option<i64>,
	/// The transaction failed on chain; its events are not collectable.
	pub err: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignaturesPage {
	pub signatures: Vec<SignatureInfo>,
	pub last_signature: Option<String>,
	pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedBatch {
	pub events: Vec<OrderEvent>,
	pub processed_count: u64,
	pub error_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOutcome {
	pub inserted_count: u64,
	pub duplicate_count: u64,
	pub total_collected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCounts {
	pub created: u64,
	pub fulfilled: u64,
	pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcHealth {
	pub healthy: bool,
	pub slot: Option<u64>,
	pub latency_ms: Option<u64>,
	pub pool_stats: PoolStats,
}

pub struct Activities {
	pool: Arc<RpcPool>,
	store: Arc<dyn OrderStore>,
	fetcher: ParallelFetcher,
	parser: Parser,
	commitment: CommitmentConfig,
}

impl Activities {
	pub fn new(
		pool: Arc<RpcPool>,
		store: Arc<dyn OrderStore>,
		fetcher: ParallelFetcher,
		parser: Parser,
		commitment_level: CommitmentLevel,
	) -> Self {
		Self {
			pool,
			store,
			fetcher,
			parser,
			commitment: CommitmentConfig { commitment: commitment_level },
		}
	}

	fn transaction_config(&self) -> RpcTransactionConfig {
		RpcTransactionConfig {
			encoding: Some(UiTransactionEncoding::JsonParsed),
			commitment: Some(self.commitment),
			max_supported_transaction_version: Some(0),
		}
	}

	pub async fn initialize_database(&self) -> Result<(), ActivityError> {
		self.store.initialize().await.map_err(classify)
	}

	/// Checkpoint plus an authoritative recount from the orders table.
	pub async fn get_progress(
		&self,
		program_id: &str,
		event_type: EventType,
	) -> Result<ProgressInfo, ActivityError> {
		let checkpoint =
			self.store.get_checkpoint(program_id, event_type).await.map_err(classify)?;
		let total_collected = self.store.count_orders(event_type).await.map_err(classify)?;
		Ok(ProgressInfo {
			last_signature: checkpoint.map(|checkpoint| checkpoint.last_signature),
			total_collected,
		})
	}

	pub async fn fetch_signatures_batch(
		&self,
		program_id: &str,
		before: Option<&str>,
		limit: usize,
		heartbeat: &Heartbeat,
	) -> Result<SignaturesPage, ActivityError> {
		heartbeat.beat("fetch-signatures");

		let (client, endpoint) = self.pool.acquire().await;
		let started = Instant::now();
		let result = client
			.get_signatures_for_address(
				program_id,
				RpcSignaturesForAddressConfig {
					before: before.map(str::to_string),
					until: None,
					limit: Some(limit),
					commitment: Some(self.commitment),
				},
			)
			.await;

		let page = match result {
			Ok(page) => {
				endpoint.report_success(started.elapsed().as_millis() as u64);
				page
			},
			Err(error) => {
				endpoint.report_failure(&error.to_string());
				return Err(classify(error));
			},
		};

		let has_more = page.len() == limit;
		let last_signature = page.last().map(|entry| entry.signature.clone());
		let signatures = page
			.into_iter()
			.map(|entry| SignatureInfo {
				signature: entry.signature,
				slot: entry.slot,
				block_time: entry.block_time,
				err: entry.err.is_some(),
			})
			.collect::<Vec<_>>();

		debug!(
			"Fetched {} signatures for {program_id} (before: {before:?}, has_more: {has_more})",
			signatures.len()
		);
		Ok(SignaturesPage { signatures, last_signature, has_more })
	}

	pub async fn fetch_and_parse_transactions(
		&self,
		signatures: &[String],
		program_id: &str,
		event_type: EventType,
		heartbeat: &Heartbeat,
	) -> Result<ParsedBatch, ActivityError> {
		heartbeat.beat("fetch-transactions");

		let fetch_heartbeat = heartbeat.clone();
		let transactions = self
			.fetcher
			.fetch(
				signatures,
				self.transaction_config(),
				None,
				Some(Arc::new(move |progress: FetchProgress| {
					fetch_heartbeat.beat(progress.phase);
				})),
			)
			.await;

		heartbeat.beat("parse-transactions");
		let processed_count = transactions.iter().filter(|slot| slot.is_some()).count() as u64;
		let error_count = transactions.len() as u64 - processed_count;
		let events = self.parser.parse_batch(&transactions, signatures, program_id, event_type);

		Ok(ParsedBatch { events, processed_count, error_count })
	}

	/// Stores a parsed batch, then advances the checkpoint to
	/// `last_signature` with the authoritative collected count. The
	/// checkpoint write strictly follows the successful store.
	pub async fn store_events(
		&self,
		events: &[OrderEvent],
		program_id: &str,
		event_type: EventType,
		last_signature: &str,
		heartbeat: &Heartbeat,
	) -> Result<StoreOutcome, ActivityError> {
		heartbeat.beat("store-events");

		let (inserted_count, duplicate_count) =
			self.store.store_events(events).await.map_err(classify)?;

		let total_collected = self.store.count_orders(event_type).await.map_err(classify)?;

		heartbeat.beat("update-checkpoint");
		self.store
			.update_checkpoint(program_id, event_type, last_signature, total_collected)
			.await
			.map_err(classify)?;

		if inserted_count > 0 || duplicate_count > 0 {
			info!(
				"Stored {inserted_count} events ({duplicate_count} duplicates) for \
				 {program_id}/{event_type}, total {total_collected}"
			);
		}
		Ok(StoreOutcome { inserted_count, duplicate_count, total_collected })
	}

	pub async fn get_order_counts(&self) -> Result<OrderCounts, ActivityError> {
		let created = self.store.count_orders(EventType::Created).await.map_err(classify)?;
		let fulfilled = self.store.count_orders(EventType::Fulfilled).await.map_err(classify)?;
		Ok(OrderCounts { created, fulfilled, total: created + fulfilled })
	}

	/// Never fails; reports whatever it can observe.
	pub async fn check_rpc_health(&self) -> RpcHealth {
		let (client, endpoint) = self.pool.acquire().await;
		let started = Instant::now();

		match client.get_slot(self.commitment).await {
			Ok(slot) => {
				let latency_ms = started.elapsed().as_millis() as u64;
				endpoint.report_success(latency_ms);
				RpcHealth {
					healthy: true,
					slot: Some(slot),
					latency_ms: Some(latency_ms),
					pool_stats: self.pool.stats(),
				}
			},
			Err(error) => {
				endpoint.report_failure(&error.to_string());
				RpcHealth {
					healthy: false,
					slot: None,
					latency_ms: None,
					pool_stats: self.pool.stats(),
				}
			},
		}
	}

	pub fn pool(&self) -> &Arc<RpcPool> {
		&self.pool
	}

	pub fn store(&self) -> &Arc<dyn OrderStore> {
		&self.store
	}

	pub fn parse_stats(&self) -> Arc<crate::parser::ParseStats> {
		self.parser.stats()
	}
}
