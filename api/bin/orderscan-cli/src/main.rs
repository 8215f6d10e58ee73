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

//! Workflow client for the collection engine: start, observe, and signal
//! the running collection over the engine's control API.
//!
//! Exit codes: 0 on success, 1 on runtime errors. Invalid commands exit
//! with 2 (clap's default).

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[clap(name = "orderscan-cli", version)]
struct Opts {
	/// Base URL of the engine's control API.
	#[clap(long, env = "ORDERSCAN_ENGINE_URL", default_value = "http://127.0.0.1:3001")]
	engine_url: String,

	#[clap(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Begin the collection workflow. A no-op if it is already running.
	Start,
	/// Print parent and child state with progress and rates.
	Status,
	/// `status` refreshed every 5 seconds.
	Watch,
	/// Pause the child collectors at their next batch boundary.
	Pause,
	/// Resume paused collectors.
	Resume,
	/// Cancel the parent workflow and its children.
	Cancel,
	/// Run a one-shot RPC health check.
	Health,
}

#[derive(Debug, Deserialize)]
struct StatusSnapshot {
	running: bool,
	parent: ParentState,
	#[serde(default)]
	children: Vec<ChildState>,
}

#[derive(Debug, Deserialize)]
struct ParentState {
	status: String,
	parallel: bool,
	started_at: DateTime<Utc>,
	#[serde(default)]
	error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChildState {
	status: String,
	program_id: String,
	event_type: String,
	target_count: u64,
	total_collected: u64,
	signatures_processed: u64,
	transactions_processed: u64,
	events_inserted: u64,
	duplicates_skipped: u64,
	#[serde(default)]
	last_signature: Option<String>,
	iteration_count: u64,
	started_at: DateTime<Utc>,
	last_update_at: DateTime<Utc>,
	#[serde(default)]
	error_message: Option<String>,
}

struct Client {
	http: reqwest::Client,
	base_url: String,
}

impl Client {
	fn new(base_url: String) -> Result<Self> {
		Ok(Self {
			http: reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?,
			base_url,
		})
	}

	async fn post(&self, path: &str) -> Result<serde_json::Value> {
		self.http
			.post(format!("{}{path}", self.base_url))
			.send()
			.await
			.with_context(|| format!("Could not reach the engine at {}", self.base_url))?
			.error_for_status()?
			.json()
			.await
			.context("Invalid response from the engine")
	}

	async fn get(&self, path: &str) -> Result<serde_json::Value> {
		self.http
			.get(format!("{}{path}", self.base_url))
			.send()
			.await
			.with_context(|| format!("Could not reach the engine at {}", self.base_url))?
			.error_for_status()?
			.json()
			.await
			.context("Invalid response from the engine")
	}

	async fn status(&self) -> Result<Option<StatusSnapshot>> {
		let value = self.get("/api/collection/status").await?;
		if value.get("parent").is_none() {
			return Ok(None);
		}
		Ok(Some(serde_json::from_value(value).context("Unexpected status payload")?))
	}
}

#[tokio::main]
async fn main() {
	std::process::exit(match run_cli().await {
		Ok(()) => 0,
		Err(error) => {
			eprintln!("Error: {error:#}");
			1
		},
	})
}

async fn run_cli() -> Result<()> {
	let opts = Opts::parse();
	let client = Client::new(opts.engine_url.trim_end_matches('/').to_string())?;

	match opts.command {
		Command::Start => {
			let response = client.post("/api/collection/start").await?;
			if response["started"].as_bool().unwrap_or(false) {
				println!("Collection started");
			} else {
				println!(
					"Collection not started: {}",
					response["reason"].as_str().unwrap_or("unknown")
				);
			}
		},
		Command::Status => print_status(&client).await?,
		Command::Watch => loop {
			// Clear screen and home the cursor between refreshes.
			print!("\x1B[2J\x1B[H");
			if let Err(error) = print_status(&client).await {
				println!("{error:#}");
			}
			tokio::time::sleep(Duration::from_secs(5)).await;
		},
		Command::Pause => {
			let response = client.post("/api/collection/pause").await?;
			println!(
				"Pause signal {}",
				if response["signalled"].as_bool().unwrap_or(false) {
					"sent"
				} else {
					"not sent: no collection is running"
				}
			);
		},
		Command::Resume => {
			let response = client.post("/api/collection/resume").await?;
			println!(
				"Resume signal {}",
				if response["signalled"].as_bool().unwrap_or(false) {
					"sent"
				} else {
					"not sent: no collection is running"
				}
			);
		},
		Command::Cancel => {
			let response = client.post("/api/collection/cancel").await?;
			println!(
				"{}",
				if response["cancelled"].as_bool().unwrap_or(false) {
					"Collection cancelled"
				} else {
					"No collection to cancel"
				}
			);
		},
		Command::Health => {
			let health = client.get("/api/health").await?;
			println!("{}", serde_json::to_string_pretty(&health)?);
		},
	}

	Ok(())
}

async fn print_status(client: &Client) -> Result<()> {
	let Some(snapshot) = client.status().await? else {
		println!("No collection has been started. Run `orderscan-cli start`.");
		return Ok(());
	};

	println!(
		"Collection: {} ({}, {})",
		snapshot.parent.status,
		if snapshot.parent.parallel { "parallel" } else { "sequential" },
		if snapshot.running { "running" } else { "finished" },
	);
	if let Some(error_message) = &snapshot.parent.error_message {
		println!("  error: {error_message}");
	}
	println!("  started: {}", snapshot.parent.started_at.to_rfc3339());
	println!();

	for child in &snapshot.children {
		let percent = if child.target_count == 0 {
			100.0
		} else {
			(child.total_collected as f64 / child.target_count as f64 * 100.0).min(100.0)
		};
		println!(
			"{} @ {} [{}]",
			child.event_type,
			short_id(&child.program_id),
			child.status
		);
		println!(
			"  {} {:>6.2}%  {}/{}",
			progress_bar(percent),
			percent,
			child.total_collected,
			child.target_count
		);

		let elapsed =
			(child.last_update_at - child.started_at).num_seconds().max(1) as f64;
		let rate = child.total_collected as f64 / elapsed;
		let eta = if rate > 0.0 && child.total_collected < child.target_count {
			format_duration((child.target_count - child.total_collected) as f64 / rate)
		} else {
			"-".to_string()
		};
		println!(
			"  rate: {rate:.1}/s  eta: {eta}  iterations: {}  signatures: {}  txs: {}",
			child.iteration_count, child.signatures_processed, child.transactions_processed
		);
		println!(
			"  inserted: {}  duplicates: {}  cursor: {}",
			child.events_inserted,
			child.duplicates_skipped,
			child.last_signature.as_deref().map(short_id).unwrap_or_else(|| "-".to_string())
		);
		if let Some(error_message) = &child.error_message {
			println!("  error: {error_message}");
		}
		println!();
	}

	Ok(())
}

fn progress_bar(percent: f64) -> String {
	const WIDTH: usize = 30;
	let filled = ((percent / 100.0) * WIDTH as f64).round() as usize;
	format!("[{}{}]", "#".repeat(filled.min(WIDTH)), "-".repeat(WIDTH - filled.min(WIDTH)))
}

fn short_id(id: &str) -> String {
	if id.len() > 12 {
		format!("{}..{}", &id[..6], &id[id.len() - 4..])
	} else {
		id.to_string()
	}
}

fn format_duration(seconds: f64) -> String {
	let seconds = seconds as u64;
	if seconds >= 3600 {
		format!("{}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
	} else if seconds >= 60 {
		format!("{}m{:02}s", seconds / 60, seconds % 60)
	} else {
		format!("{seconds}s")
	}
}
