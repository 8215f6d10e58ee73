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

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser as ClapParser;
use tracing::{info, warn};

use orderscan_engine::{
	activities::Activities,
	health, metrics,
	parser::{ParseStats, Parser},
	push::{self, PushContext},
	settings::{CommandLineOptions, Settings, WorkerMode},
	sol::{
		commitment_config::CommitmentLevel,
		fetcher::{FetchOptions, ParallelFetcher},
		pool::RpcPool,
	},
	store::{ClickhouseStore, OrderStore},
	tokens::TokenDirectory,
	workflow::start_collection,
};

#[tokio::main]
async fn main() -> Result<()> {
	let opts = CommandLineOptions::parse();
	utilities::logging::init_tracing(opts.log_json);

	let settings = Settings::new(opts).context("Error reading settings")?;
	info!("Starting the order collection engine (mode: {:?})", settings.worker.mode);

	metrics::register_metrics();

	let pool = Arc::new(RpcPool::from_settings(&settings.chain)?);
	let store: Arc<dyn OrderStore> =
		Arc::new(ClickhouseStore::from_settings(&settings.database)?);
	let parse_stats = Arc::new(ParseStats::default());

	let commitment = settings
		.chain
		.commitment
		.parse::<CommitmentLevel>()
		.map_err(|error| anyhow!("Invalid chain.commitment: {error}"))?;

	let fetcher = ParallelFetcher::new(
		pool.clone(),
		FetchOptions {
			concurrency: settings.worker.max_activities,
			..FetchOptions::default()
		},
	);

	let activities = Arc::new(Activities::new(
		pool,
		store,
		fetcher,
		Parser::new(TokenDirectory::mainnet(), parse_stats),
		commitment,
	));

	let settings = Arc::new(settings);
	let context = PushContext::new(activities.clone(), settings.clone());

	match settings.worker.mode {
		WorkerMode::Full | WorkerMode::Workflow => {
			context.registry.start(|| start_collection(activities.clone(), &settings));
			info!("Collection workflow started");
		},
		mode => {
			warn!("Worker mode {mode:?} serves activities only; no collection orchestration");
		},
	}

	let (_, push_future) = push::start(context.clone())?;

	let health_future = settings
		.health_check
		.as_ref()
		.map(health::start)
		.transpose()?
		.map(|(_, future)| future);

	let metrics_future = settings.metrics.as_ref().map(metrics::start).transpose()?;

	tokio::join!(
		push_future,
		async {
			if let Some(future) = health_future {
				future.await
			}
		},
		async {
			if let Some(future) = metrics_future {
				future.await
			}
		},
	);

	Ok(())
}
