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

//! Parallel transaction fetcher. Fans a signature list out across the pool,
//! bounded by an adaptive concurrency level, and returns one result slot per
//! input signature (`None` for unknown signatures and unrecoverable
//! failures). Workers finish out of order; slots are placed by input index.

use std::{
	pin::Pin,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use futures::Future;
use futures_util::{stream::FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
	pool::{classify_rpc_error, RpcFailure, RpcPool},
	rpc_client_api::{EncodedConfirmedTransactionWithStatusMeta, RpcTransactionConfig},
};
use crate::constants::{
	FETCH_DEFAULT_BATCH_SIZE, FETCH_DEFAULT_MAX_RETRIES, FETCH_DEFAULT_RETRY_BASE_DELAY,
	FETCH_MAX_CONCURRENCY, FETCH_MIN_CONCURRENCY, HEARTBEAT_EVERY_ITEMS,
};

const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct FetchOptions {
	pub concurrency: usize,
	pub max_retries: u32,
	pub retry_base_delay: Duration,
	pub use_batch_api: bool,
	pub batch_size: usize,
}

impl Default for FetchOptions {
	fn default() -> Self {
		Self {
			concurrency: 10,
			max_retries: FETCH_DEFAULT_MAX_RETRIES,
			retry_base_delay: FETCH_DEFAULT_RETRY_BASE_DELAY,
			use_batch_api: false,
			batch_size: FETCH_DEFAULT_BATCH_SIZE,
		}
	}
}

#[derive(Debug, Clone)]
pub struct FetchProgress {
	pub phase: &'static str,
	pub completed: usize,
	pub total: usize,
	pub success_rate: f64,
}

pub type ProgressCallback = Arc<dyn Fn(FetchProgress) + Send + Sync>;

/// A unit of submission: one signature, or one fixed-size run of signatures
/// under the batch API.
struct Job {
	start_index: usize,
	signatures: Vec<String>,
	attempt: u32,
}

enum JobOutcome {
	/// Result slots for the job, placed from `start_index`. `failed` marks
	/// slots lost to unrecoverable errors (not merely unknown signatures).
	Done { start_index: usize, results: Vec<Option<EncodedConfirmedTransactionWithStatusMeta>>, failed: usize },
	Retry(Job),
}

type JobFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send>>;
type DelayFuture = Pin<Box<dyn Future<Output = Job> + Send>>;

pub struct ParallelFetcher {
	pool: Arc<RpcPool>,
	options: FetchOptions,
	current_concurrency: AtomicUsize,
}

impl ParallelFetcher {
	pub fn new(pool: Arc<RpcPool>, options: FetchOptions) -> Self {
		let initial = options
			.concurrency
			.min(3 * pool.healthy_endpoint_count().max(1))
			.clamp(FETCH_MIN_CONCURRENCY, FETCH_MAX_CONCURRENCY);
		Self { pool, options, current_concurrency: AtomicUsize::new(initial) }
	}

	pub fn current_concurrency(&self) -> usize {
		self.current_concurrency.load(Ordering::Relaxed)
	}

	/// Fetches all signatures, returning a result vector of the same length.
	#[tracing::instrument(name = "parallel-fetch", skip_all, fields(total = signatures.len()))]
	pub async fn fetch(
		&self,
		signatures: &[String],
		config: RpcTransactionConfig,
		progress: Option<ProgressCallback>,
		heartbeat: Option<ProgressCallback>,
	) -> Vec<Option<EncodedConfirmedTransactionWithStatusMeta>> {
		let total = signatures.len();
		if total == 0 {
			return Vec::new();
		}

		let mut pending: Vec<Job> = if self.options.use_batch_api {
			signatures
				.chunks(self.options.batch_size)
				.enumerate()
				.map(|(run, chunk)| Job {
					start_index: run * self.options.batch_size,
					signatures: chunk.to_vec(),
					attempt: 0,
				})
				.collect()
		} else {
			signatures
				.iter()
				.enumerate()
				.map(|(index, signature)| Job {
					start_index: index,
					signatures: vec![signature.clone()],
					attempt: 0,
				})
				.collect()
		};
		pending.reverse(); // pop() walks input order

		let concurrency = self.current_concurrency();
		let mut results: Vec<Option<EncodedConfirmedTransactionWithStatusMeta>> = Vec::new();
		results.resize_with(total, || None);

		let mut in_flight: FuturesUnordered<JobFuture> = FuturesUnordered::new();
		let mut retry_delays: FuturesUnordered<DelayFuture> = FuturesUnordered::new();

		let mut completed = 0usize;
		let mut failed = 0usize;
		let mut retries = 0usize;
		let mut last_reported = 0usize;

		loop {
			while in_flight.len() < concurrency {
				match pending.pop() {
					Some(job) => in_flight.push(self.run_job(job, config)),
					None => break,
				}
			}

			if in_flight.is_empty() && retry_delays.is_empty() && pending.is_empty() {
				break;
			}

			tokio::select! {
				Some(outcome) = in_flight.next(), if !in_flight.is_empty() => match outcome {
					JobOutcome::Done { start_index, results: job_results, failed: job_failed } => {
						completed += job_results.len();
						failed += job_failed;
						for (offset, result) in job_results.into_iter().enumerate() {
							results[start_index + offset] = result;
						}

						if completed - last_reported >= HEARTBEAT_EVERY_ITEMS || completed == total {
							last_reported = completed;
							let report = FetchProgress {
								phase: "fetch-transactions",
								completed,
								total,
								success_rate: if completed == 0 {
									1.0
								} else {
									(completed - failed) as f64 / completed as f64
								},
							};
							if let Some(progress) = &progress {
								progress(report.clone());
							}
							if let Some(heartbeat) = &heartbeat {
								heartbeat(report);
							}
						}
					},
					JobOutcome::Retry(job) => {
						retries += 1;
						let delay = utilities::backoff_with_jitter(
							self.options.retry_base_delay,
							job.attempt,
							RETRY_MAX_DELAY,
						);
						debug!(
							"Retrying run at index {} (attempt {}) in {}ms",
							job.start_index,
							job.attempt,
							delay.as_millis()
						);
						retry_delays.push(Box::pin(async move {
							tokio::time::sleep(delay).await;
							job
						}));
					},
				},
				Some(job) = retry_delays.next(), if !retry_delays.is_empty() => {
					pending.push(job);
				},
			}
		}

		self.adapt_concurrency(total, failed, retries);
		results
	}

	fn run_job(&self, job: Job, config: RpcTransactionConfig) -> JobFuture {
		let pool = self.pool.clone();
		let max_retries = self.options.max_retries;
		let use_batch_api = self.options.use_batch_api;

		Box::pin(async move {
			let (client, endpoint) = pool.acquire().await;
			let started = Instant::now();

			let call = if use_batch_api {
				client.get_transactions_batch(&job.signatures, config).await
			} else {
				client
					.get_transaction(&job.signatures[0], config)
					.await
					.map(|transaction| vec![transaction])
			};

			match call {
				Ok(job_results) => {
					endpoint.report_success(started.elapsed().as_millis() as u64);
					JobOutcome::Done { start_index: job.start_index, results: job_results, failed: 0 }
				},
				Err(error) => {
					let message = error.to_string();
					endpoint.report_failure(&message);

					let next_attempt = job.attempt + 1;
					match classify_rpc_error(&message) {
						RpcFailure::Retryable if next_attempt <= max_retries => {
							JobOutcome::Retry(Job { attempt: next_attempt, ..job })
						},
						classification => {
							warn!(
								"Dropping run at index {} after attempt {} ({classification:?}): {message}",
								job.start_index, job.attempt
							);
							let slots = job.signatures.len();
							JobOutcome::Done {
								start_index: job.start_index,
								results: vec![None; slots],
								failed: slots,
							}
						},
					}
				},
			}
		})
	}

	/// Shrink on a bad batch, creep up on a clean one.
	fn adapt_concurrency(&self, total: usize, failed: usize, retries: usize) {
		let failure_rate = failed as f64 / total as f64;
		let retry_rate = retries as f64 / total as f64;
		let current = self.current_concurrency();

		let adapted = if failure_rate > 0.10 || retry_rate > 0.20 {
			((current as f64 * 0.7) as usize).max(FETCH_MIN_CONCURRENCY)
		} else if failure_rate < 0.01 && retry_rate < 0.05 {
			(current + 1).min(FETCH_MAX_CONCURRENCY)
		} else {
			current
		};

		if adapted != current {
			debug!(
				"Adapting fetch concurrency {current} -> {adapted} \
				 (failure_rate {failure_rate:.3}, retry_rate {retry_rate:.3})"
			);
			self.current_concurrency.store(adapted, Ordering::Relaxed);
		}
	}
}
