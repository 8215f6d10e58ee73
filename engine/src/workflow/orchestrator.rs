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

//! Parent orchestrator: initializes the database, then drives the `created`
//! collector on the source program and the `fulfilled` collector on the
//! destination program, concurrently or sequentially. The children run
//! inside the parent task, so cancelling the parent aborts whatever they
//! are awaiting (parent-close policy); no state is mutated afterwards.

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc, Mutex,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::{
	activities::{with_retry, Activities, RetryPolicy},
	constants::STORE_EVENTS_TIMEOUT,
	orders::EventType,
	settings::Settings,
};

use super::{
	collector::{run_collector, CollectorConfig, CollectorRun},
	state::{CollectorState, CollectorStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentStatus {
	Initializing,
	Running,
	Completed,
	Error,
	Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChildRecord {
	pub program_id: String,
	pub event_type: EventType,
	pub completed_at: Option<DateTime<Utc>>,
	pub final_status: Option<CollectorStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParentState {
	pub status: ParentStatus,
	pub parallel: bool,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub error_message: Option<String>,
	pub children: Vec<ChildRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
	pub running: bool,
	pub parent: ParentState,
	pub children: Vec<CollectorState>,
}

/// Handle over one started collection: signals, queries, cancellation.
pub struct CollectionHandle {
	pause_tx: watch::Sender<bool>,
	parent_tx: Arc<watch::Sender<ParentState>>,
	child_rxs: Vec<watch::Receiver<CollectorState>>,
	cancelled: Arc<AtomicBool>,
	task: tokio::task::JoinHandle<()>,
}

impl CollectionHandle {
	/// Idempotent: pausing a paused collection is a no-op.
	pub fn pause(&self) {
		let _ = self.pause_tx.send(true);
	}

	pub fn resume(&self) {
		let _ = self.pause_tx.send(false);
	}

	/// Aborts the parent task; the children die with it mid-await.
	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::Relaxed);
		self.task.abort();
		let mut parent = self.parent_tx.borrow().clone();
		parent.status = ParentStatus::Cancelled;
		parent.completed_at = Some(Utc::now());
		let _ = self.parent_tx.send(parent);
		info!("Collection cancelled");
	}

	pub fn is_finished(&self) -> bool {
		self.task.is_finished() || self.cancelled.load(Ordering::Relaxed)
	}

	pub fn status(&self) -> StatusSnapshot {
		StatusSnapshot {
			running: !self.is_finished(),
			parent: self.parent_tx.borrow().clone(),
			children: self.child_rxs.iter().map(|rx| rx.borrow().clone()).collect(),
		}
	}

	pub async fn wait(&mut self) {
		let _ = (&mut self.task).await;
	}
}

/// Starts the parent workflow and both children. Returns the control handle.
pub fn start_collection(activities: Arc<Activities>, settings: &Settings) -> CollectionHandle {
	let policy = RetryPolicy::from(&settings.retry);
	let parallel = settings.collection.parallel;

	let created_config = CollectorConfig::from_settings(
		&settings.collection,
		settings.chain.source_program.clone(),
		EventType::Created,
	);
	let fulfilled_config = CollectorConfig::from_settings(
		&settings.collection,
		settings.chain.destination_program.clone(),
		EventType::Fulfilled,
	);

	let (pause_tx, pause_rx) = watch::channel(false);

	let (created_tx, created_rx) = watch::channel(CollectorState::new(
		created_config.program_id.clone(),
		EventType::Created,
		created_config.target_count,
	));
	let (fulfilled_tx, fulfilled_rx) = watch::channel(CollectorState::new(
		fulfilled_config.program_id.clone(),
		EventType::Fulfilled,
		fulfilled_config.target_count,
	));

	let parent_tx = Arc::new(
		watch::channel(ParentState {
			status: ParentStatus::Initializing,
			parallel,
			started_at: Utc::now(),
			completed_at: None,
			error_message: None,
			children: vec![
				ChildRecord {
					program_id: created_config.program_id.clone(),
					event_type: EventType::Created,
					completed_at: None,
					final_status: None,
				},
				ChildRecord {
					program_id: fulfilled_config.program_id.clone(),
					event_type: EventType::Fulfilled,
					completed_at: None,
					final_status: None,
				},
			],
		})
		.0,
	);

	let task = tokio::spawn(run_orchestrator(
		activities,
		policy,
		parallel,
		created_config,
		fulfilled_config,
		pause_rx,
		created_tx,
		fulfilled_tx,
		parent_tx.clone(),
	));

	CollectionHandle {
		pause_tx,
		parent_tx,
		child_rxs: vec![created_rx, fulfilled_rx],
		cancelled: Arc::new(AtomicBool::new(false)),
		task,
	}
}

#[allow(clippy::too_many_arguments)]
async fn run_orchestrator(
	activities: Arc<Activities>,
	policy: RetryPolicy,
	parallel: bool,
	created_config: CollectorConfig,
	fulfilled_config: CollectorConfig,
	pause_rx: watch::Receiver<bool>,
	created_tx: watch::Sender<CollectorState>,
	fulfilled_tx: watch::Sender<CollectorState>,
	parent_tx: Arc<watch::Sender<ParentState>>,
) {
	let publish = |mutate: &dyn Fn(&mut ParentState)| {
		let mut parent = parent_tx.borrow().clone();
		mutate(&mut parent);
		let _ = parent_tx.send(parent);
	};

	info!("Starting collection orchestrator (parallel: {parallel})");

	let activities_ref = activities.as_ref();
	if let Err(init_error) = with_retry(&policy, "initialize-database", STORE_EVENTS_TIMEOUT, || {
		activities_ref.initialize_database()
	})
	.await
	{
		error!("Could not initialize the database: {init_error}");
		publish(&|parent| {
			parent.status = ParentStatus::Error;
			parent.error_message = Some(format!("{init_error:#}"));
			parent.completed_at = Some(Utc::now());
		});
		return;
	}

	publish(&|parent| parent.status = ParentStatus::Running);

	let created_child =
		drive_child(&activities, &policy, &created_config, pause_rx.clone(), &created_tx);
	let fulfilled_child =
		drive_child(&activities, &policy, &fulfilled_config, pause_rx.clone(), &fulfilled_tx);

	let (created_final, fulfilled_final) = if parallel {
		tokio::join!(created_child, fulfilled_child)
	} else {
		let created_final = created_child.await;
		publish(&|parent| {
			parent.children[0].completed_at = Some(Utc::now());
			parent.children[0].final_status = Some(created_final.status);
		});
		(created_final, fulfilled_child.await)
	};

	let now = Utc::now();
	let any_error = created_final.status == CollectorStatus::Error
		|| fulfilled_final.status == CollectorStatus::Error;
	publish(&|parent| {
		parent.children[0].completed_at.get_or_insert(now);
		parent.children[0].final_status = Some(created_final.status);
		parent.children[1].completed_at = Some(now);
		parent.children[1].final_status = Some(fulfilled_final.status);
		parent.status = if any_error { ParentStatus::Error } else { ParentStatus::Completed };
		parent.completed_at = Some(now);
		if any_error {
			parent.error_message = created_final
				.error_message
				.clone()
				.or_else(|| fulfilled_final.error_message.clone());
		}
	});

	info!(
		"Collection orchestrator finished: created {} ({:?}), fulfilled {} ({:?})",
		created_final.total_collected,
		created_final.status,
		fulfilled_final.total_collected,
		fulfilled_final.status
	);
}

/// Re-invokes the child on continue-as-new until it finishes for good.
async fn drive_child(
	activities: &Activities,
	policy: &RetryPolicy,
	config: &CollectorConfig,
	pause_rx: watch::Receiver<bool>,
	state_tx: &watch::Sender<CollectorState>,
) -> CollectorState {
	let mut resume_state = None;
	loop {
		match run_collector(activities, policy, config, resume_state.take(), pause_rx.clone(), state_tx)
			.await
		{
			CollectorRun::ContinueAsNew(state) => {
				info!(
					"Collector {}/{} continuing as new at iteration {}",
					config.program_id, config.event_type, state.iteration_count
				);
				resume_state = Some(*state);
			},
			CollectorRun::Finished(state) => return state,
		}
	}
}

/// Process-wide registry of the running collection, consumed by the control
/// API. `start` is idempotent with respect to an already-running workflow.
#[derive(Default)]
pub struct CollectionRegistry {
	inner: Mutex<Option<CollectionHandle>>,
}

impl CollectionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns false (without starting) when a collection is still running.
	pub fn start(&self, start: impl FnOnce() -> CollectionHandle) -> bool {
		let mut inner = self.inner.lock().unwrap();
		if let Some(handle) = inner.as_ref() {
			if !handle.is_finished() {
				return false;
			}
		}
		*inner = Some(start());
		true
	}

	pub fn pause(&self) -> bool {
		self.signal(|handle| handle.pause())
	}

	pub fn resume(&self) -> bool {
		self.signal(|handle| handle.resume())
	}

	pub fn cancel(&self) -> bool {
		self.signal(|handle| handle.cancel())
	}

	fn signal(&self, signal: impl FnOnce(&CollectionHandle)) -> bool {
		let inner = self.inner.lock().unwrap();
		match inner.as_ref() {
			Some(handle) => {
				signal(handle);
				true
			},
			None => false,
		}
	}

	pub fn status(&self) -> Option<StatusSnapshot> {
		self.inner.lock().unwrap().as_ref().map(|handle| handle.status())
	}
}
