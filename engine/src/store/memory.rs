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

//! In-memory [`OrderStore`] with the same dedup and checkpoint semantics as
//! the real table engine. Test-only.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Mutex,
	},
};

use anyhow::{anyhow, Result};
use chrono::Utc;

use super::{
	CheckpointRecord, DailyVolume, OrderStore, OrderSummary, TokenVolume, TotalStats,
};
use crate::orders::{EventType, OrderEvent};

#[derive(Default)]
pub struct MemoryStore {
	orders: Mutex<HashMap<(String, EventType), OrderEvent>>,
	checkpoints: Mutex<HashMap<(String, EventType), CheckpointRecord>>,
	fail_writes: AtomicBool,
	initialized: AtomicBool,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make subsequent writes fail, to exercise error propagation.
	pub fn set_fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::Relaxed);
	}

	pub fn order_count(&self) -> usize {
		self.orders.lock().unwrap().len()
	}

	pub fn all_events(&self) -> Vec<OrderEvent> {
		self.orders.lock().unwrap().values().cloned().collect()
	}

	fn check_write(&self) -> Result<()> {
		if self.fail_writes.load(Ordering::Relaxed) {
			Err(anyhow!("Injected write failure"))
		} else {
			Ok(())
		}
	}
}

#[async_trait::async_trait]
impl OrderStore for MemoryStore {
	async fn initialize(&self) -> Result<()> {
		self.initialized.store(true, Ordering::Relaxed);
		Ok(())
	}

	async fn store_events(&self, events: &[OrderEvent]) -> Result<(u64, u64)> {
		self.check_write()?;
		let mut orders = self.orders.lock().unwrap();
		let mut inserted = 0;
		for event in events {
			let key = (event.signature.clone(), event.event_type);
			if let std::collections::hash_map::Entry::Vacant(entry) = orders.entry(key) {
				entry.insert(event.clone());
				inserted += 1;
			}
		}
		Ok((inserted, events.len() as u64 - inserted))
	}

	async fn get_checkpoint(
		&self,
		program_id: &str,
		event_type: EventType,
	) -> Result<Option<CheckpointRecord>> {
		Ok(self
			.checkpoints
			.lock()
			.unwrap()
			.get(&(program_id.to_string(), event_type))
			.cloned())
	}

	async fn update_checkpoint(
		&self,
		program_id: &str,
		event_type: EventType,
		last_signature: &str,
		total_collected: u64,
	) -> Result<()> {
		self.check_write()?;
		self.checkpoints.lock().unwrap().insert(
			(program_id.to_string(), event_type),
			CheckpointRecord {
				program_id: program_id.to_string(),
				event_type,
				last_signature: last_signature.to_string(),
				total_collected,
				updated_at: Utc::now().to_rfc3339(),
			},
		);
		Ok(())
	}

	async fn count_orders(&self, event_type: EventType) -> Result<u64> {
		Ok(self
			.orders
			.lock()
			.unwrap()
			.keys()
			.filter(|(_, stored_type)| *stored_type == event_type)
			.count() as u64)
	}

	async fn total_stats(&self) -> TotalStats {
		let orders = self.orders.lock().unwrap();
		let mut stats = TotalStats::default();
		for event in orders.values() {
			match event.event_type {
				EventType::Created => {
					stats.created_count += 1;
					stats.created_volume_usd += event.give_amount_usd.unwrap_or(0.0);
				},
				EventType::Fulfilled => {
					stats.fulfilled_count += 1;
					stats.fulfilled_volume_usd += event.fulfilled_amount_usd.unwrap_or(0.0);
				},
			}
		}
		stats
	}

	async fn daily_volumes(&self, _days: u32) -> Vec<DailyVolume> {
		Vec::new()
	}

	async fn top_tokens(&self, limit: u32) -> Vec<TokenVolume> {
		let orders = self.orders.lock().unwrap();
		let mut by_symbol: HashMap<String, TokenVolume> = HashMap::new();
		for event in orders.values() {
			if let Some(symbol) = &event.give_token_symbol {
				let entry = by_symbol.entry(symbol.clone()).or_insert_with(|| TokenVolume {
					symbol: symbol.clone(),
					orders: 0,
					volume_usd: 0.0,
				});
				entry.orders += 1;
				entry.volume_usd += event.give_amount_usd.unwrap_or(0.0);
			}
		}
		let mut volumes: Vec<_> = by_symbol.into_values().collect();
		volumes.sort_by(|a, b| b.volume_usd.total_cmp(&a.volume_usd));
		volumes.truncate(limit as usize);
		volumes
	}

	async fn recent_orders(&self, limit: u32) -> Vec<OrderSummary> {
		let orders = self.orders.lock().unwrap();
		let mut events: Vec<_> = orders.values().collect();
		events.sort_by(|a, b| b.block_time.cmp(&a.block_time));
		events
			.into_iter()
			.take(limit as usize)
			.map(|event| OrderSummary {
				order_id: event.order_id.clone(),
				event_type: event.event_type.to_string(),
				signature: event.signature.clone(),
				slot: event.slot,
				block_time: event.block_time.to_rfc3339(),
				maker: event.maker.clone(),
				taker: event.taker.clone(),
				give_token_symbol: event.give_token_symbol.clone(),
				give_amount_usd: event.give_amount_usd,
				fulfilled_amount_usd: event.fulfilled_amount_usd,
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use chrono::DateTime;

	use super::*;

	fn event(signature: &str, event_type: EventType) -> OrderEvent {
		OrderEvent::new(
			"cd".repeat(32),
			event_type,
			signature.to_string(),
			5,
			DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
		)
	}

	#[tokio::test]
	async fn second_store_of_same_input_is_all_duplicates() {
		let store = MemoryStore::new();
		let events =
			vec![event("sig-1", EventType::Created), event("sig-2", EventType::Created)];

		assert_eq!(store.store_events(&events).await.unwrap(), (2, 0));
		assert_eq!(store.store_events(&events).await.unwrap(), (0, 2));
		assert_eq!(store.order_count(), 2);
	}

	#[tokio::test]
	async fn same_signature_different_event_types_coexist() {
		let store = MemoryStore::new();
		let events =
			vec![event("sig-1", EventType::Created), event("sig-1", EventType::Fulfilled)];
		assert_eq!(store.store_events(&events).await.unwrap(), (2, 0));
	}

	#[tokio::test]
	async fn checkpoint_round_trips() {
		let store = MemoryStore::new();
		store
			.update_checkpoint("program-a", EventType::Created, "sig-9", 42)
			.await
			.unwrap();

		let checkpoint =
			store.get_checkpoint("program-a", EventType::Created).await.unwrap().unwrap();
		assert_eq!(checkpoint.last_signature, "sig-9");
		assert_eq!(checkpoint.total_collected, 42);

		assert!(store
			.get_checkpoint("program-a", EventType::Fulfilled)
			.await
			.unwrap()
			.is_none());
	}
}
