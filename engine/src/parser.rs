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

//! Transaction parser: walks a fetched transaction's log stream for order
//! ids emitted by the watched program, recovers the moved amount from token
//! balance deltas, and resolves tokens against the static directory.
//!
//! A failure on one transaction never aborts the batch; it is counted and
//! swallowed.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
};

use anyhow::{anyhow, Result};
use base64::{prelude::BASE64_STANDARD, Engine};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::{
	orders::{EventType, OrderEvent},
	sol::rpc_client_api::{
		EncodedConfirmedTransactionWithStatusMeta, UiTransactionStatusMeta,
		UiTransactionTokenBalance,
	},
	tokens::{TokenDirectory, TokenLookup},
};

lazy_static! {
	static ref ORDER_ID_RE: Regex =
		Regex::new(r"(?i)order[_ ]?id[:\s]+([0-9a-f]{64})").expect("Regex is valid");
}

/// Anchor-style event payloads start with an 8-byte discriminator; the order
/// id is the 32 bytes after it.
const EVENT_DISCRIMINATOR_LEN: usize = 8;
const ORDER_ID_LEN: usize = 32;

/// Process-wide parse outcome counters. Observability only: increments may
/// race and lose, nothing downstream depends on exact values.
#[derive(Debug, Default)]
pub struct ParseStats {
	total: AtomicU64,
	success: AtomicU64,
	failed: AtomicU64,
	no_events: AtomicU64,
	unknown_tokens: Mutex<HashMap<String, u64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseStatsSnapshot {
	pub total: u64,
	pub success: u64,
	pub failed: u64,
	pub no_events: u64,
	pub unknown_tokens: HashMap<String, u64>,
}

impl ParseStats {
	pub fn record_unknown_token(&self, mint: &str) {
		let mut unknown_tokens = self.unknown_tokens.lock().unwrap();
		*unknown_tokens.entry(mint.to_string()).or_insert(0) += 1;
	}

	pub fn snapshot(&self) -> ParseStatsSnapshot {
		ParseStatsSnapshot {
			total: self.total.load(Ordering::Relaxed),
			success: self.success.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
			no_events: self.no_events.load(Ordering::Relaxed),
			unknown_tokens: self.unknown_tokens.lock().unwrap().clone(),
		}
	}
}

pub struct Parser {
	directory: TokenDirectory,
	stats: Arc<ParseStats>,
}

impl Parser {
	pub fn new(directory: TokenDirectory, stats: Arc<ParseStats>) -> Self {
		Self { directory, stats }
	}

	pub fn stats(&self) -> Arc<ParseStats> {
		self.stats.clone()
	}

	/// Parses a fetched batch. Null slots (unknown or dropped signatures)
	/// are skipped; a per-transaction failure is counted and skipped.
	pub fn parse_batch(
		&self,
		transactions: &[Option<EncodedConfirmedTransactionWithStatusMeta>],
		signatures: &[String],
		program_id: &str,
		event_type: EventType,
	) -> Vec<OrderEvent> {
		let mut events = Vec::new();

		for (transaction, signature) in transactions.iter().zip(signatures) {
			let Some(transaction) = transaction else {
				continue;
			};

			self.stats.total.fetch_add(1, Ordering::Relaxed);
			match self.parse_transaction(transaction, signature, program_id, event_type) {
				Ok(parsed) if parsed.is_empty() => {
					self.stats.no_events.fetch_add(1, Ordering::Relaxed);
				},
				Ok(parsed) => {
					self.stats.success.fetch_add(1, Ordering::Relaxed);
					events.extend(parsed);
				},
				Err(error) => {
					self.stats.failed.fetch_add(1, Ordering::Relaxed);
					debug!("Failed to parse transaction {signature}: {error:#}");
				},
			}
		}

		events
	}

	pub fn parse_transaction(
		&self,
		transaction: &EncodedConfirmedTransactionWithStatusMeta,
		signature: &str,
		program_id: &str,
		event_type: EventType,
	) -> Result<Vec<OrderEvent>> {
		let meta = transaction
			.meta
			.as_ref()
			.ok_or_else(|| anyhow!("Transaction {signature} has no meta"))?;

		let log_messages = meta.log_messages.as_deref().unwrap_or_default();
		let order_ids = extract_order_ids(log_messages, program_id);
		if order_ids.is_empty() {
			return Ok(Vec::new());
		}

		if event_type == EventType::Created && !invokes_program(transaction, program_id) {
			trace!("Transaction {signature} logs an order id without invoking {program_id}");
			return Ok(Vec::new());
		}

		let block_time = transaction
			.block_time
			.and_then(|block_time| DateTime::<Utc>::from_timestamp(block_time, 0))
			.unwrap_or_else(Utc::now);

		let first_signer = transaction
			.transaction
			.message
			.account_keys
			.iter()
			.find(|key| key.signer)
			.or_else(|| transaction.transaction.message.account_keys.first())
			.map(|key| key.pubkey.clone());

		let amount = largest_balance_delta(meta);

		Ok(order_ids
			.into_iter()
			.map(|order_id| {
				let mut event = OrderEvent::new(
					order_id,
					event_type,
					signature.to_string(),
					transaction.slot,
					block_time,
				);

				match event_type {
					EventType::Created => {
						event.maker = first_signer.clone();
						if let Some((mint, raw_amount)) = &amount {
							event.give_token_address = Some(mint.clone());
							event.give_amount = Some(*raw_amount);
							match self.directory.lookup(mint) {
								Some(info) => {
									event.give_token_symbol = Some(info.symbol.to_string());
									event.give_amount_usd =
										self.directory.estimate_usd(mint, *raw_amount);
								},
								None => self.stats.record_unknown_token(mint),
							}
						}
					},
					EventType::Fulfilled => {
						event.taker = first_signer.clone();
						if let Some((mint, raw_amount)) = &amount {
							event.fulfilled_amount = Some(*raw_amount);
							if self.directory.lookup(mint).is_some() {
								event.fulfilled_amount_usd =
									self.directory.estimate_usd(mint, *raw_amount);
							} else {
								self.stats.record_unknown_token(mint);
							}
						}
					},
				}

				event
			})
			.collect())
	}
}

/// Order ids logged inside `Program <id> invoke` .. `success|failed`
/// windows. `Program data:` payloads win over free-text log lines; an
/// all-zero id is rejected.
fn extract_order_ids(log_messages: &[String], program_id: &str) -> Vec<String> {
	let invoke_marker = format!("Program {program_id} invoke");
	let success_marker = format!("Program {program_id} success");
	let failed_marker = format!("Program {program_id} failed");

	let mut inside_program = false;
	let mut order_ids: Vec<String> = Vec::new();

	for line in log_messages {
		if line.starts_with(&invoke_marker) {
			inside_program = true;
			continue;
		}
		if line.starts_with(&success_marker) || line.starts_with(&failed_marker) {
			inside_program = false;
			continue;
		}
		if !inside_program {
			continue;
		}

		if let Some(payload) = line.strip_prefix("Program data: ") {
			if let Ok(bytes) = BASE64_STANDARD.decode(payload.trim()) {
				if bytes.len() >= EVENT_DISCRIMINATOR_LEN + ORDER_ID_LEN {
					let candidate =
						&bytes[EVENT_DISCRIMINATOR_LEN..EVENT_DISCRIMINATOR_LEN + ORDER_ID_LEN];
					if candidate.iter().any(|byte| *byte != 0) {
						let order_id = hex::encode(candidate);
						if !order_ids.contains(&order_id) {
							order_ids.push(order_id);
						}
					}
				}
			}
		} else if let Some(captures) = ORDER_ID_RE.captures(line) {
			let order_id = captures[1].to_lowercase();
			if order_id.bytes().any(|byte| byte != b'0') && !order_ids.contains(&order_id) {
				order_ids.push(order_id);
			}
		}
	}

	order_ids
}

/// Outer or inner instructions reference the program.
fn invokes_program(
	transaction: &EncodedConfirmedTransactionWithStatusMeta,
	program_id: &str,
) -> bool {
	let outer = transaction
		.transaction
		.message
		.instructions
		.iter()
		.any(|instruction| instruction.program_id.as_deref() == Some(program_id));
	if outer {
		return true;
	}

	transaction
		.meta
		.as_ref()
		.and_then(|meta| meta.inner_instructions.as_ref())
		.map(|inner| {
			inner.iter().flat_map(|set| &set.instructions).any(|instruction| {
				instruction.program_id.as_deref() == Some(program_id)
			})
		})
		.unwrap_or(false)
}

/// The largest absolute (mint, raw amount) change between pre and post token
/// balances, keyed by token account. Accounts created by the transaction
/// count as full positive changes.
fn largest_balance_delta(meta: &UiTransactionStatusMeta) -> Option<(String, u128)> {
	fn amounts_by_account(
		balances: Option<&Vec<UiTransactionTokenBalance>>,
	) -> HashMap<u8, (String, u128)> {
		balances
			.map(|balances| {
				balances
					.iter()
					.filter_map(|balance| {
						let amount = balance.ui_token_amount.amount.parse::<u128>().ok()?;
						Some((balance.account_index, (balance.mint.clone(), amount)))
					})
					.collect()
			})
			.unwrap_or_default()
	}

	let pre = amounts_by_account(meta.pre_token_balances.as_ref());
	let post = amounts_by_account(meta.post_token_balances.as_ref());

	let mut best: Option<(String, u128)> = None;
	let mut consider = |mint: &str, magnitude: u128| {
		if magnitude > 0 && best.as_ref().map(|(_, m)| magnitude > *m).unwrap_or(true) {
			best = Some((mint.to_string(), magnitude));
		}
	};

	for (account_index, (mint, post_amount)) in &post {
		let pre_amount = pre.get(account_index).map(|(_, amount)| *amount).unwrap_or(0);
		consider(mint, post_amount.abs_diff(pre_amount));
	}
	// Accounts that disappeared drained fully.
	for (account_index, (mint, pre_amount)) in &pre {
		if !post.contains_key(account_index) {
			consider(mint, *pre_amount);
		}
	}

	best
}
