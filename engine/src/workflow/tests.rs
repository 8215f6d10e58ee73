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

//! End-to-end collector scenarios over a simulated chain history, real
//! activities, and the in-memory store.

use std::{collections::HashMap, sync::Arc, time::Duration};

use base64::{prelude::BASE64_STANDARD, Engine};
use tokio::sync::watch;

use crate::{
	activities::{Activities, RetryPolicy},
	orders::EventType,
	parser::{ParseStats, Parser},
	settings::EndpointConfig,
	sol::{
		commitment_config::CommitmentLevel,
		fetcher::{FetchOptions, ParallelFetcher},
		pool::RpcPool,
		rpc::{mocks::MockSolRpcApi, SolRpcApi},
		rpc_client_api::{
			EncodedConfirmedTransactionWithStatusMeta, RpcConfirmedTransactionStatusWithSignature,
			UiAccountKey, UiInstruction, UiMessage, UiTransaction, UiTransactionStatusMeta,
		},
	},
	store::{memory::MemoryStore, OrderStore},
	tokens::TokenDirectory,
};

use super::{
	collector::{run_collector, CollectorConfig, CollectorRun},
	state::CollectorStatus,
};

const PROGRAM: &str = "srcProgram1111111111111111111111111111111111";

fn test_policy() -> RetryPolicy {
	RetryPolicy {
		max_retries: 2,
		initial_delay: Duration::from_millis(10),
		max_delay: Duration::from_millis(100),
	}
}

fn test_config(target_count: u64, tx_batch: usize) -> CollectorConfig {
	CollectorConfig {
		program_id: PROGRAM.to_string(),
		event_type: EventType::Created,
		target_count,
		signatures_batch: 1000,
		tx_batch,
		batch_delay: Duration::from_millis(10),
		max_iterations_per_run: 50,
	}
}

/// Simulated signature history, newest first, with `before` pagination
/// matching the chain's semantics (strictly older than the cursor).
struct ChainSim {
	entries: Vec<(String, u64)>,
	transactions: HashMap<String, EncodedConfirmedTransactionWithStatusMeta>,
}

impl ChainSim {
	/// `with_events[i]` decides whether history entry `i` carries an order
	/// event. Slots decrease with age.
	fn new(with_events: &[bool]) -> Arc<Self> {
		let mut entries = Vec::new();
		let mut transactions = HashMap::new();
		for (index, has_event) in with_events.iter().enumerate() {
			let signature = format!("sig-{index}");
			let slot = 1000 - index as u64;
			let order_id = [index as u8 + 1; 32];
			transactions
				.insert(signature.clone(), transaction(slot, *has_event, &order_id));
			entries.push((signature, slot));
		}
		Arc::new(Self { entries, transactions })
	}

	fn mock(self: &Arc<Self>) -> MockSolRpcApi {
		let mut mock = MockSolRpcApi::new();

		let sim = self.clone();
		mock.expect_get_signatures_for_address().returning(move |_, config| {
			let start = match &config.before {
				Some(before) => sim
					.entries
					.iter()
					.position(|(signature, _)| signature == before)
					.map(|position| position + 1)
					.unwrap_or(sim.entries.len()),
				None => 0,
			};
			let limit = config.limit.unwrap_or(1000);
			Ok(sim.entries[start.min(sim.entries.len())..]
				.iter()
				.take(limit)
				.map(|(signature, slot)| RpcConfirmedTransactionStatusWithSignature {
					signature: signature.clone(),
					slot: *slot,
					err: None,
					memo: None,
					block_time: Some(1_700_000_000),
					confirmation_status: Some("confirmed".to_string()),
				})
				.collect())
		});

		let sim = self.clone();
		mock.expect_get_transaction()
			.returning(move |signature, _| Ok(sim.transactions.get(signature).cloned()));

		mock
	}
}

fn transaction(
	slot: u64,
	with_event: bool,
	order_id: &[u8; 32],
) -> EncodedConfirmedTransactionWithStatusMeta {
	let log_messages = if with_event {
		let mut payload = vec![9u8; 8];
		payload.extend_from_slice(order_id);
		vec![
			format!("Program {PROGRAM} invoke [1]"),
			format!("Program data: {}", BASE64_STANDARD.encode(payload)),
			format!("Program {PROGRAM} success"),
		]
	} else {
		vec![format!("Program {PROGRAM} invoke [1]"), format!("Program {PROGRAM} success")]
	};

	EncodedConfirmedTransactionWithStatusMeta {
		slot,
		block_time: Some(1_700_000_000),
		transaction: UiTransaction {
			signatures: vec![format!("sig-at-{slot}")],
			message: UiMessage {
				account_keys: vec![UiAccountKey {
					pubkey: "maker111111111111111111111111111111111111111".to_string(),
					signer: true,
					writable: true,
				}],
				instructions: vec![UiInstruction {
					program_id: Some(PROGRAM.to_string()),
					..Default::default()
				}],
			},
		},
		meta: Some(UiTransactionStatusMeta { log_messages: Some(log_messages), ..Default::default() }),
	}
}

fn activities_over(sim: &Arc<ChainSim>, store: Arc<MemoryStore>) -> Arc<Activities> {
	let pool = Arc::new(RpcPool::new(vec![(
		EndpointConfig { url: "https://a.example".into(), name: "a".into(), max_rps: 100_000 },
		Arc::new(sim.mock()) as Arc<dyn SolRpcApi>,
	)]));
	Arc::new(Activities::new(
		pool.clone(),
		store,
		ParallelFetcher::new(pool, FetchOptions::default()),
		Parser::new(TokenDirectory::mainnet(), Arc::new(ParseStats::default())),
		CommitmentLevel::Confirmed,
	))
}

fn controls() -> (watch::Sender<bool>, watch::Receiver<bool>) {
	watch::channel(false)
}

fn state_channel(
	config: &CollectorConfig,
) -> (watch::Sender<super::CollectorState>, watch::Receiver<super::CollectorState>) {
	watch::channel(super::CollectorState::new(
		config.program_id.clone(),
		config.event_type,
		config.target_count,
	))
}

#[tokio::test(start_paused = true)]
async fn cold_start_collects_events_and_checkpoints_oldest_signature() {
	// Three signatures, two carry the target event type.
	let sim = ChainSim::new(&[true, false, true]);
	let store = Arc::new(MemoryStore::new());
	let activities = activities_over(&sim, store.clone());

	let config = test_config(100, 20);
	let (_pause_tx, pause_rx) = controls();
	let (state_tx, state_rx) = state_channel(&config);

	let run =
		run_collector(&activities, &test_policy(), &config, None, pause_rx, &state_tx).await;

	let CollectorRun::Finished(state) = run else {
		panic!("Expected the collector to finish");
	};
	assert_eq!(state.status, CollectorStatus::Completed);
	assert_eq!(state.total_collected, 2);
	assert_eq!(state.events_inserted, 2);
	assert_eq!(state.duplicates_skipped, 0);
	assert_eq!(state.signatures_processed, 3);
	assert_eq!(state.last_signature.as_deref(), Some("sig-2"));

	let checkpoint = store.get_checkpoint(PROGRAM, EventType::Created).await.unwrap().unwrap();
	assert_eq!(checkpoint.last_signature, "sig-2");
	assert_eq!(checkpoint.total_collected, 2);
	assert_eq!(store.order_count(), 2);

	assert_eq!(state_rx.borrow().status, CollectorStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn rerun_against_processed_history_inserts_nothing() {
	let sim = ChainSim::new(&[true, true, true]);
	let store = Arc::new(MemoryStore::new());
	let activities = activities_over(&sim, store.clone());

	let config = test_config(100, 20);
	let (_pause_tx, pause_rx) = controls();
	let (state_tx, _state_rx) = state_channel(&config);

	// First run walks the whole history.
	let CollectorRun::Finished(first) = run_collector(
		&activities,
		&test_policy(),
		&config,
		None,
		pause_rx.clone(),
		&state_tx,
	)
	.await
	else {
		panic!("Expected the collector to finish");
	};
	assert_eq!(first.total_collected, 3);

	// A fresh run (as after a crash and restart) resumes from the
	// checkpoint, finds no new work, and the totals are unchanged.
	let CollectorRun::Finished(second) =
		run_collector(&activities, &test_policy(), &config, None, pause_rx, &state_tx).await
	else {
		panic!("Expected the collector to finish");
	};
	assert_eq!(second.status, CollectorStatus::Completed);
	assert_eq!(second.total_collected, 3);
	assert_eq!(second.events_inserted, 0);
	assert_eq!(store.order_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn interrupted_run_resumes_to_the_single_run_total() {
	let sim = ChainSim::new(&[true, true, true, true, true, true]);

	// Reference: one uninterrupted run. Small signature pages so the target
	// is re-checked between iterations.
	let reference_store = Arc::new(MemoryStore::new());
	let activities = activities_over(&sim, reference_store.clone());
	let config = CollectorConfig { signatures_batch: 2, ..test_config(100, 2) };
	let (_pause_tx, pause_rx) = controls();
	let (state_tx, _) = state_channel(&config);
	run_collector(&activities, &test_policy(), &config, None, pause_rx, &state_tx).await;
	assert_eq!(reference_store.order_count(), 6);

	// Interrupted: the first run stops at its (small) target, the second
	// picks up from the checkpoint and finishes the job.
	let store = Arc::new(MemoryStore::new());
	let activities = activities_over(&sim, store.clone());

	let partial_config = CollectorConfig { signatures_batch: 2, ..test_config(2, 2) };
	let (_pause_tx, pause_rx) = controls();
	let (state_tx, _) = state_channel(&partial_config);
	let CollectorRun::Finished(first) = run_collector(
		&activities,
		&test_policy(),
		&partial_config,
		None,
		pause_rx,
		&state_tx,
	)
	.await
	else {
		panic!("Expected the collector to finish");
	};
	assert_eq!(first.status, CollectorStatus::Completed);
	assert!(store.order_count() < 6);

	let full_config = CollectorConfig { signatures_batch: 2, ..test_config(100, 2) };
	let (_pause_tx, pause_rx) = controls();
	let (state_tx, _) = state_channel(&full_config);
	let CollectorRun::Finished(second) =
		run_collector(&activities, &test_policy(), &full_config, None, pause_rx, &state_tx).await
	else {
		panic!("Expected the collector to finish");
	};

	assert_eq!(second.status, CollectorStatus::Completed);
	assert_eq!(second.total_collected, 6);
	assert_eq!(store.order_count(), reference_store.order_count());
	// Resuming from the checkpoint re-processed nothing.
	assert_eq!(second.duplicates_skipped, 0);
}

#[tokio::test(start_paused = true)]
async fn pause_holds_counters_and_resume_runs_to_completion() {
	let sim = ChainSim::new(&[true, true, true, true, true, true]);
	let store = Arc::new(MemoryStore::new());
	let activities = activities_over(&sim, store.clone());

	let config = test_config(100, 2);
	let (pause_tx, pause_rx) = controls();
	let (state_tx, mut state_rx) = state_channel(&config);

	let collector = tokio::spawn({
		let activities = activities.clone();
		let config = config.clone();
		async move {
			run_collector(&activities, &test_policy(), &config, None, pause_rx, &state_tx).await
		}
	});

	// Pause once the first batch has been stored.
	loop {
		state_rx.changed().await.unwrap();
		if state_rx.borrow().events_inserted >= 2 {
			break;
		}
	}
	pause_tx.send(true).unwrap();

	loop {
		state_rx.changed().await.unwrap();
		if state_rx.borrow().status == CollectorStatus::Paused {
			break;
		}
	}
	let paused_snapshot = state_rx.borrow().clone();

	// Nothing advances while paused.
	tokio::time::sleep(Duration::from_secs(60)).await;
	let still_paused = state_rx.borrow().clone();
	assert_eq!(still_paused.status, CollectorStatus::Paused);
	assert_eq!(still_paused.total_collected, paused_snapshot.total_collected);
	assert_eq!(still_paused.signatures_processed, paused_snapshot.signatures_processed);

	pause_tx.send(false).unwrap();
	let CollectorRun::Finished(state) = collector.await.unwrap() else {
		panic!("Expected the collector to finish");
	};
	assert_eq!(state.status, CollectorStatus::Completed);
	assert_eq!(state.total_collected, 6);
	assert_eq!(store.order_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn iteration_budget_forces_exactly_one_continue_as_new() {
	// Three pages of one signature each: signatures_batch 1 makes every
	// iteration process one signature, so a budget of 2 splits the work.
	let sim = ChainSim::new(&[true, true, true]);
	let store = Arc::new(MemoryStore::new());
	let activities = activities_over(&sim, store.clone());

	let config = CollectorConfig {
		signatures_batch: 1,
		max_iterations_per_run: 2,
		..test_config(100, 20)
	};
	let (_pause_tx, pause_rx) = controls();
	let (state_tx, _) = state_channel(&config);

	let first_run = run_collector(
		&activities,
		&test_policy(),
		&config,
		None,
		pause_rx.clone(),
		&state_tx,
	)
	.await;

	let CollectorRun::ContinueAsNew(carried) = first_run else {
		panic!("Expected the iteration budget to trigger continue-as-new");
	};
	assert_eq!(carried.status, CollectorStatus::Collecting);
	assert_eq!(carried.iteration_count, 2);
	assert_eq!(carried.total_collected, 2);
	let carried_state = (*carried).clone();

	// The second run picks the state up verbatim and only adds the work of
	// the remaining iteration.
	let second_run =
		run_collector(&activities, &test_policy(), &config, Some(*carried), pause_rx, &state_tx)
			.await;

	let CollectorRun::Finished(final_state) = second_run else {
		panic!("Expected the second run to finish");
	};
	assert_eq!(final_state.status, CollectorStatus::Completed);
	assert_eq!(final_state.total_collected, 3);
	// One page per iteration; the final empty page ends the run before
	// counting as an iteration.
	assert_eq!(final_state.iteration_count, 3);
	assert_eq!(final_state.events_inserted, carried_state.events_inserted + 1);
	assert_eq!(store.order_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn permanent_activity_failure_surfaces_as_error_state() {
	let mut mock = MockSolRpcApi::new();
	mock.expect_get_signatures_for_address()
		.returning(|_, _| Err(anyhow::anyhow!("Invalid param: unsupported address")));

	let pool = Arc::new(RpcPool::new(vec![(
		EndpointConfig { url: "https://a.example".into(), name: "a".into(), max_rps: 100_000 },
		Arc::new(mock) as Arc<dyn SolRpcApi>,
	)]));
	let activities = Arc::new(Activities::new(
		pool.clone(),
		Arc::new(MemoryStore::new()),
		ParallelFetcher::new(pool, FetchOptions::default()),
		Parser::new(TokenDirectory::mainnet(), Arc::new(ParseStats::default())),
		CommitmentLevel::Confirmed,
	));

	let config = test_config(100, 20);
	let (_pause_tx, pause_rx) = controls();
	let (state_tx, _) = state_channel(&config);

	let CollectorRun::Finished(state) =
		run_collector(&activities, &test_policy(), &config, None, pause_rx, &state_tx).await
	else {
		panic!("Expected the collector to finish");
	};

	assert_eq!(state.status, CollectorStatus::Error);
	assert!(state.error_message.unwrap().contains("Invalid param"));
}

#[tokio::test(start_paused = true)]
async fn store_failure_exhausts_retries_then_fails_the_workflow() {
	let sim = ChainSim::new(&[true]);
	let store = Arc::new(MemoryStore::new());
	store.set_fail_writes(true);
	let activities = activities_over(&sim, store);

	let config = test_config(100, 20);
	let (_pause_tx, pause_rx) = controls();
	let (state_tx, _) = state_channel(&config);

	let CollectorRun::Finished(state) =
		run_collector(&activities, &test_policy(), &config, None, pause_rx, &state_tx).await
	else {
		panic!("Expected the collector to finish");
	};

	assert_eq!(state.status, CollectorStatus::Error);
	assert!(state.error_message.unwrap().contains("Injected write failure"));
}
