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

//! Child collector: walks one program's signature history backwards, page by
//! page, persisting parsed events and advancing the checkpoint after every
//! stored batch. `last_signature` only ever points at a signature whose
//! events are persisted and checkpointed, so resuming with
//! `before = last_signature` cannot skip unprocessed work.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
	activities::{with_retry, Activities, ActivityError, Heartbeat, RetryPolicy},
	constants::{
		FETCH_AND_PARSE_TIMEOUT, FETCH_SIGNATURES_TIMEOUT, PAUSE_WAIT_LIMIT, STORE_EVENTS_TIMEOUT,
	},
	orders::EventType,
	settings,
};

use super::state::{CollectorState, CollectorStatus};

#[derive(Debug, Clone)]
pub struct CollectorConfig {
	pub program_id: String,
	pub event_type: EventType,
	pub target_count: u64,
	pub signatures_batch: usize,
	pub tx_batch: usize,
	pub batch_delay: Duration,
	pub max_iterations_per_run: u32,
}

impl CollectorConfig {
	pub fn from_settings(
		collection: &settings::Collection,
		program_id: String,
		event_type: EventType,
	) -> Self {
		Self {
			program_id,
			event_type,
			target_count: match event_type {
				EventType::Created => collection.target_created,
				EventType::Fulfilled => collection.target_fulfilled,
			},
			signatures_batch: collection.signatures_batch,
			tx_batch: collection.tx_batch,
			batch_delay: Duration::from_millis(collection.batch_delay_ms),
			max_iterations_per_run: collection.max_iterations_per_run,
		}
	}
}

/// How a single run of the child ended.
#[derive(Debug)]
pub enum CollectorRun {
	/// The per-run iteration budget is spent; re-invoke with this state.
	ContinueAsNew(Box<CollectorState>),
	/// Terminal for this workflow: completed, still paused after the wait
	/// limit, or errored.
	Finished(CollectorState),
}

/// One run of the child collector. `resume_state` (from continue-as-new) is
/// used verbatim; otherwise the state is seeded from the checkpoint.
pub async fn run_collector(
	activities: &Activities,
	policy: &RetryPolicy,
	config: &CollectorConfig,
	resume_state: Option<CollectorState>,
	mut pause_rx: watch::Receiver<bool>,
	state_tx: &watch::Sender<CollectorState>,
) -> CollectorRun {
	let heartbeat_owned = Heartbeat::new({
		let program_id = config.program_id.clone();
		move |phase: &str| {
			tracing::trace!("Collector {program_id} heartbeat: {phase}");
		}
	});
	// Shared reference so retried activity futures borrow the original, not
	// the retry closure.
	let heartbeat = &heartbeat_owned;
	let publish = |state: &CollectorState| {
		let _ = state_tx.send(state.clone());
	};

	let mut state = match resume_state {
		Some(state) => {
			info!(
				"Collector {}/{} continuing with {} collected after {} iterations",
				config.program_id, config.event_type, state.total_collected, state.iteration_count
			);
			state
		},
		None => {
			let mut state = CollectorState::new(
				config.program_id.clone(),
				config.event_type,
				config.target_count,
			);
			publish(&state);

			let progress_result = with_retry(policy, "get-progress", STORE_EVENTS_TIMEOUT, || {
				activities.get_progress(&config.program_id, config.event_type)
			})
			.await;
			match progress_result {
				Ok(progress) => {
					state.total_collected = progress.total_collected;
					state.last_signature = progress.last_signature;
				},
				Err(error) => return fail(state, error, &publish),
			}
			state
		},
	};

	state.status = CollectorStatus::Collecting;
	state.touch();
	publish(&state);

	let mut iterations_this_run = 0u32;

	loop {
		if *pause_rx.borrow() {
			state.status = CollectorStatus::Paused;
			state.touch();
			publish(&state);
			info!("Collector {}/{} paused", config.program_id, config.event_type);

			let resumed = tokio::time::timeout(PAUSE_WAIT_LIMIT, async {
				while *pause_rx.borrow_and_update() {
					if pause_rx.changed().await.is_err() {
						break;
					}
				}
			})
			.await;

			if resumed.is_err() {
				warn!(
					"Collector {}/{} still paused after {}h, returning",
					config.program_id,
					config.event_type,
					PAUSE_WAIT_LIMIT.as_secs() / 3600
				);
				return CollectorRun::Finished(state);
			}

			info!("Collector {}/{} resumed", config.program_id, config.event_type);
			state.status = CollectorStatus::Collecting;
			state.touch();
			publish(&state);
			continue;
		}

		if state.total_collected >= config.target_count {
			break;
		}

		if iterations_this_run >= config.max_iterations_per_run {
			info!(
				"Collector {}/{} hit the per-run iteration budget, continuing as new",
				config.program_id, config.event_type
			);
			return CollectorRun::ContinueAsNew(Box::new(state));
		}

		let before = state.last_signature.clone();
		let before = before.as_deref();
		let page_result = with_retry(policy, "fetch-signatures", FETCH_SIGNATURES_TIMEOUT, || {
			activities.fetch_signatures_batch(
				&config.program_id,
				before,
				config.signatures_batch,
				heartbeat,
			)
		})
		.await;
		let page = match page_result {
			Ok(page) => page,
			Err(error) => return fail(state, error, &publish),
		};

		if page.signatures.is_empty() {
			info!(
				"Collector {}/{} reached the end of the signature history",
				config.program_id, config.event_type
			);
			break;
		}

		let valid = page
			.signatures
			.iter()
			.filter(|signature| !signature.err)
			.cloned()
			.collect::<Vec<_>>();
		state.signatures_processed += valid.len() as u64;

		if valid.is_empty() {
			// A page of failed transactions still has to advance the cursor,
			// or the next fetch would return the same page forever.
			let last_signature = page.last_signature.expect("Page is non-empty");
			let last_signature_ref = last_signature.as_str();
			let store_result = with_retry(policy, "store-events", STORE_EVENTS_TIMEOUT, || {
				activities.store_events(
					&[],
					&config.program_id,
					config.event_type,
					last_signature_ref,
					heartbeat,
				)
			})
			.await;
			match store_result {
				Ok(_) => {
					state.last_signature = Some(last_signature.clone());
					state.touch();
					publish(&state);
				},
				Err(error) => return fail(state, error, &publish),
			}
		}

		for chunk in valid.chunks(config.tx_batch) {
			// Pause is cooperative at batch boundaries.
			if *pause_rx.borrow() {
				break;
			}

			let batch_signatures =
				chunk.iter().map(|entry| entry.signature.clone()).collect::<Vec<_>>();
			let batch_signatures_ref = batch_signatures.as_slice();
			let batch_last = chunk.last().expect("Chunks are non-empty").signature.clone();
			let batch_last_ref = batch_last.as_str();

			let parse_result =
				with_retry(policy, "fetch-and-parse", FETCH_AND_PARSE_TIMEOUT, || {
					activities.fetch_and_parse_transactions(
						batch_signatures_ref,
						&config.program_id,
						config.event_type,
						heartbeat,
					)
				})
				.await;
			let parsed = match parse_result {
				Ok(parsed) => parsed,
				Err(error) => return fail(state, error, &publish),
			};

			let events_ref = parsed.events.as_slice();
			let store_result = with_retry(policy, "store-events", STORE_EVENTS_TIMEOUT, || {
				activities.store_events(
					events_ref,
					&config.program_id,
					config.event_type,
					batch_last_ref,
					heartbeat,
				)
			})
			.await;
			let stored = match store_result {
				Ok(stored) => stored,
				Err(error) => return fail(state, error, &publish),
			};

			state.transactions_processed += parsed.processed_count;
			state.events_inserted += stored.inserted_count;
			state.duplicates_skipped += stored.duplicate_count;
			state.total_collected = stored.total_collected;
			state.last_signature = Some(batch_last);
			state.touch();
			publish(&state);

			tokio::time::sleep(config.batch_delay).await;
		}

		state.iteration_count += 1;
		iterations_this_run += 1;
		state.touch();
		publish(&state);

		tokio::time::sleep(config.batch_delay).await;
	}

	state.status = CollectorStatus::Completed;
	state.touch();
	publish(&state);
	info!(
		"Collector {}/{} completed with {} collected over {} iterations",
		config.program_id, config.event_type, state.total_collected, state.iteration_count
	);
	CollectorRun::Finished(state)
}

fn fail(
	mut state: CollectorState,
	error: ActivityError,
	publish: &impl Fn(&CollectorState),
) -> CollectorRun {
	warn!(
		"Collector {}/{} failed: {error}",
		state.program_id, state.event_type
	);
	state.status = CollectorStatus::Error;
	state.error_message = Some(format!("{error:#}"));
	state.touch();
	publish(&state);
	CollectorRun::Finished(state)
}
