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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orders::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorStatus {
	Initializing,
	Collecting,
	Paused,
	Completed,
	Error,
}

/// Snapshot of one child collector. Serializable so continue-as-new can
/// carry it between runs and the control API can expose it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorState {
	pub status: CollectorStatus,
	pub program_id: String,
	pub event_type: EventType,
	pub target_count: u64,
	pub total_collected: u64,
	pub signatures_processed: u64,
	pub transactions_processed: u64,
	pub events_inserted: u64,
	pub duplicates_skipped: u64,
	pub last_signature: Option<String>,
	pub iteration_count: u64,
	pub started_at: DateTime<Utc>,
	pub last_update_at: DateTime<Utc>,
	#[serde(default)]
	pub error_message: Option<String>,
}

impl CollectorState {
	pub fn new(program_id: String, event_type: EventType, target_count: u64) -> Self {
		let now = Utc::now();
		Self {
			status: CollectorStatus::Initializing,
			program_id,
			event_type,
			target_count,
			total_collected: 0,
			signatures_processed: 0,
			transactions_processed: 0,
			events_inserted: 0,
			duplicates_skipped: 0,
			last_signature: None,
			iteration_count: 0,
			started_at: now,
			last_update_at: now,
			error_message: None,
		}
	}

	pub fn touch(&mut self) {
		self.last_update_at = Utc::now();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn state_round_trips_through_json() {
		let mut state = CollectorState::new("program".to_string(), EventType::Created, 100);
		state.status = CollectorStatus::Collecting;
		state.last_signature = Some("sig-1".to_string());

		let json = serde_json::to_string(&state).unwrap();
		assert!(json.contains(r#""status":"collecting""#));
		let back: CollectorState = serde_json::from_str(&json).unwrap();
		assert_eq!(back, state);
	}
}
