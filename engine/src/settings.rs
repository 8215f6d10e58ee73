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

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::constants::{
	CONFIG_ROOT, DEFAULT_CONFIG_ROOT, DEFAULT_ENDPOINT_MAX_RPS, DEFAULT_MAX_ITERATIONS_PER_RUN,
	ENV_PREFIX, ENV_SEPARATOR,
};

#[derive(Parser, Debug, Clone)]
pub struct CommandLineOptions {
	/// Directory containing default.toml / local.toml.
	#[clap(long = "config-root", env = CONFIG_ROOT, default_value = DEFAULT_CONFIG_ROOT)]
	pub config_root: String,

	/// Emit logs as JSON lines.
	#[clap(long = "log-json")]
	pub log_json: bool,

	/// Override chain.rpc_urls.
	#[clap(long = "rpc-urls")]
	pub rpc_urls: Option<String>,

	/// Override database.url.
	#[clap(long = "database-url")]
	pub database_url: Option<String>,

	/// Override push.port.
	#[clap(long = "push-port")]
	pub push_port: Option<u16>,
}

/// One parsed entry of `chain.rpc_urls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
	pub url: String,
	pub name: String,
	pub max_rps: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Chain {
	/// Comma-delimited list of `url|name|max_rps` entries. Name and max_rps
	/// are optional per entry.
	pub rpc_urls: String,
	#[serde(default = "default_commitment")]
	pub commitment: String,
	#[serde(default = "default_rpc_timeout_ms")]
	pub timeout_ms: u64,
	/// Program that creates orders.
	pub source_program: String,
	/// Program that fulfills orders.
	pub destination_program: String,
}

fn default_commitment() -> String {
	"confirmed".to_string()
}

const fn default_rpc_timeout_ms() -> u64 {
	60_000
}

impl Chain {
	pub fn endpoints(&self) -> Result<Vec<EndpointConfig>> {
		let endpoints = self
			.rpc_urls
			.split(',')
			.map(str::trim)
			.filter(|entry| !entry.is_empty())
			.enumerate()
			.map(|(index, entry)| {
				let mut fields = entry.split('|').map(str::trim);
				let url = fields
					.next()
					.filter(|url| !url.is_empty())
					.with_context(|| format!("Empty url in rpc_urls entry {index}"))?
					.to_string();
				let name = match fields.next().filter(|name| !name.is_empty()) {
					Some(name) => name.to_string(),
					None => format!("endpoint-{index}"),
				};
				let max_rps = match fields.next() {
					Some(rps) => rps
						.parse::<u32>()
						.with_context(|| format!("Invalid max_rps in rpc_urls entry {index}"))?,
					None => DEFAULT_ENDPOINT_MAX_RPS,
				};
				if max_rps == 0 {
					bail!("max_rps must be positive in rpc_urls entry {index}");
				}
				Ok(EndpointConfig { url, name, max_rps })
			})
			.collect::<Result<Vec<_>>>()?;

		if endpoints.is_empty() {
			bail!("chain.rpc_urls must contain at least one endpoint");
		}
		Ok(endpoints)
	}
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
	pub url: String,
	pub database: String,
	#[serde(default = "default_db_user")]
	pub user: String,
	#[serde(default)]
	pub password: String,
	#[serde(default = "default_true")]
	pub async_insert: bool,
	#[serde(default = "default_true")]
	pub wait_for_async_insert: bool,
}

fn default_db_user() -> String {
	"default".to_string()
}

const fn default_true() -> bool {
	true
}

#[derive(Debug, Deserialize, Clone)]
pub struct Collection {
	#[serde(default = "default_target")]
	pub target_created: u64,
	#[serde(default = "default_target")]
	pub target_fulfilled: u64,
	#[serde(default = "default_signatures_batch")]
	pub signatures_batch: usize,
	#[serde(default = "default_tx_batch")]
	pub tx_batch: usize,
	#[serde(default = "default_batch_delay_ms")]
	pub batch_delay_ms: u64,
	#[serde(default = "default_true")]
	pub parallel: bool,
	#[serde(default = "default_max_iterations")]
	pub max_iterations_per_run: u32,
}

const fn default_target() -> u64 {
	25_000
}

const fn default_signatures_batch() -> usize {
	1000
}

const fn default_tx_batch() -> usize {
	20
}

const fn default_batch_delay_ms() -> u64 {
	500
}

const fn default_max_iterations() -> u32 {
	DEFAULT_MAX_ITERATIONS_PER_RUN
}

impl Default for Collection {
	fn default() -> Self {
		Self {
			target_created: default_target(),
			target_fulfilled: default_target(),
			signatures_batch: default_signatures_batch(),
			tx_batch: default_tx_batch(),
			batch_delay_ms: default_batch_delay_ms(),
			parallel: true,
			max_iterations_per_run: default_max_iterations(),
		}
	}
}

#[derive(Debug, Deserialize, Clone)]
pub struct Retry {
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_initial_delay_ms")]
	pub initial_delay_ms: u64,
	#[serde(default = "default_max_delay_ms")]
	pub max_delay_ms: u64,
}

const fn default_max_retries() -> u32 {
	5
}

const fn default_initial_delay_ms() -> u64 {
	1000
}

const fn default_max_delay_ms() -> u64 {
	30_000
}

impl Default for Retry {
	fn default() -> Self {
		Self {
			max_retries: default_max_retries(),
			initial_delay_ms: default_initial_delay_ms(),
			max_delay_ms: default_max_delay_ms(),
		}
	}
}

#[derive(Debug, Deserialize, Clone)]
pub struct Push {
	#[serde(default = "default_push_port")]
	pub port: u16,
	#[serde(default)]
	pub cors_origin: Option<String>,
	#[serde(default = "default_broadcast_period_ms")]
	pub broadcast_period_ms: u64,
	#[serde(default = "default_heartbeat_period_ms")]
	pub heartbeat_period_ms: u64,
}

const fn default_push_port() -> u16 {
	3001
}

const fn default_broadcast_period_ms() -> u64 {
	2000
}

const fn default_heartbeat_period_ms() -> u64 {
	30_000
}

impl Default for Push {
	fn default() -> Self {
		Self {
			port: default_push_port(),
			cors_origin: None,
			broadcast_period_ms: default_broadcast_period_ms(),
			heartbeat_period_ms: default_heartbeat_period_ms(),
		}
	}
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthCheck {
	pub hostname: String,
	pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
	pub hostname: String,
	pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
	/// Everything in one process: servers, activities, workflows.
	Full,
	/// Serve only chain-facing activities.
	Rpc,
	/// Serve only database-facing activities.
	Db,
	/// Drive workflows only.
	Workflow,
}

impl Default for WorkerMode {
	fn default() -> Self {
		Self::Full
	}
}

#[derive(Debug, Deserialize, Clone)]
pub struct Worker {
	#[serde(default)]
	pub mode: WorkerMode,
	#[serde(default = "default_max_activities")]
	pub max_activities: usize,
}

const fn default_max_activities() -> usize {
	20
}

impl Default for Worker {
	fn default() -> Self {
		Self { mode: WorkerMode::default(), max_activities: default_max_activities() }
	}
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
	pub chain: Chain,
	pub database: Database,
	#[serde(default)]
	pub collection: Collection,
	#[serde(default)]
	pub retry: Retry,
	#[serde(default)]
	pub push: Push,
	#[serde(default)]
	pub health_check: Option<HealthCheck>,
	#[serde(default)]
	pub metrics: Option<Metrics>,
	#[serde(default)]
	pub worker: Worker,
}

impl Settings {
	/// Layering: default.toml, then local.toml if present, then environment
	/// variables (`ORDERSCAN__SECTION__FIELD`), then command line overrides.
	pub fn new(opts: CommandLineOptions) -> Result<Self> {
		let root = PathBuf::from(&opts.config_root);

		let mut settings: Settings = Config::builder()
			.add_source(File::from(root.join("default.toml")))
			.add_source(File::from(root.join("local.toml")).required(false))
			.add_source(
				Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR).try_parsing(true),
			)
			.build()
			.context("Could not build settings")?
			.try_deserialize()
			.context("Could not deserialize settings")?;

		if let Some(rpc_urls) = opts.rpc_urls {
			settings.chain.rpc_urls = rpc_urls;
		}
		if let Some(database_url) = opts.database_url {
			settings.database.url = database_url;
		}
		if let Some(push_port) = opts.push_port {
			settings.push.port = push_port;
		}

		settings.validate()?;
		Ok(settings)
	}

	pub fn validate(&self) -> Result<()> {
		self.chain.endpoints()?;
		if self.collection.signatures_batch == 0 || self.collection.tx_batch == 0 {
			bail!("collection batch sizes must be positive");
		}
		if self.collection.max_iterations_per_run == 0 {
			bail!("collection.max_iterations_per_run must be positive");
		}
		if self.chain.source_program.is_empty() || self.chain.destination_program.is_empty() {
			bail!("chain.source_program and chain.destination_program must be set");
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn settings_from_str(toml: &str) -> Settings {
		Config::builder()
			.add_source(File::from_str(toml, config::FileFormat::Toml))
			.build()
			.unwrap()
			.try_deserialize()
			.unwrap()
	}

	const MINIMAL: &str = r#"
		[chain]
		rpc_urls = "https://api.mainnet-beta.solana.com"
		source_program = "src11111111111111111111111111111111111111111"
		destination_program = "dst11111111111111111111111111111111111111111"

		[database]
		url = "http://localhost:8123"
		database = "orders"
	"#;

	#[test]
	fn minimal_settings_get_defaults() {
		let settings = settings_from_str(MINIMAL);
		settings.validate().unwrap();

		assert_eq!(settings.chain.commitment, "confirmed");
		assert_eq!(settings.chain.timeout_ms, 60_000);
		assert_eq!(settings.collection.target_created, 25_000);
		assert_eq!(settings.collection.signatures_batch, 1000);
		assert_eq!(settings.collection.tx_batch, 20);
		assert_eq!(settings.collection.batch_delay_ms, 500);
		assert!(settings.collection.parallel);
		assert_eq!(settings.retry.max_retries, 5);
		assert_eq!(settings.push.port, 3001);
		assert_eq!(settings.worker.mode, WorkerMode::Full);
	}

	#[test]
	fn parses_delimited_endpoint_list() {
		let mut settings = settings_from_str(MINIMAL);
		settings.chain.rpc_urls =
			"https://a.example|alpha|25, https://b.example|beta, https://c.example".to_string();

		let endpoints = settings.chain.endpoints().unwrap();
		assert_eq!(
			endpoints,
			vec![
				EndpointConfig {
					url: "https://a.example".into(),
					name: "alpha".into(),
					max_rps: 25
				},
				EndpointConfig {
					url: "https://b.example".into(),
					name: "beta".into(),
					max_rps: DEFAULT_ENDPOINT_MAX_RPS
				},
				EndpointConfig {
					url: "https://c.example".into(),
					name: "endpoint-2".into(),
					max_rps: DEFAULT_ENDPOINT_MAX_RPS
				},
			]
		);
	}

	#[test]
	fn rejects_empty_and_invalid_endpoint_lists() {
		let mut settings = settings_from_str(MINIMAL);

		settings.chain.rpc_urls = "  ".to_string();
		assert!(settings.chain.endpoints().is_err());

		settings.chain.rpc_urls = "https://a.example|alpha|zero".to_string();
		assert!(settings.chain.endpoints().is_err());

		settings.chain.rpc_urls = "https://a.example|alpha|0".to_string();
		assert!(settings.chain.endpoints().is_err());
	}

	#[test]
	fn rejects_zero_batch_sizes() {
		let mut settings = settings_from_str(MINIMAL);
		settings.collection.tx_batch = 0;
		assert!(settings.validate().is_err());
	}
}
