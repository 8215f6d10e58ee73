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

//! Push fan-out and control API. Each client gets a unidirectional
//! server-sent event stream: a `connected` event carrying its opaque id,
//! then periodic `update` snapshots. The broadcast ticker starts with the
//! first client and stops with the last; send failures silently drop the
//! client. The same server carries the workflow-client control routes.

use std::{
	collections::HashMap,
	convert::Infallible,
	net::{IpAddr, SocketAddr},
	sync::{Arc, Mutex},
	time::Duration,
};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};
use warp::{sse::Event, Filter};

use crate::{
	activities::Activities,
	metrics,
	parser::{ParseStats, ParseStatsSnapshot},
	settings::{Settings, WorkerMode},
	sol::pool::{PoolStats, RpcPool},
	store::{OrderStore, OrderSummary, TotalStats},
	workflow::{orchestrator::StatusSnapshot, start_collection, CollectionRegistry},
};

const RECENT_ORDERS_LIMIT: u32 = 10;

#[derive(Debug, Clone, Serialize)]
struct UpdatePayload {
	stats: TotalStats,
	collection_progress: Option<StatusSnapshot>,
	recent_orders: Vec<OrderSummary>,
	pool_stats: PoolStats,
	parse_stats: ParseStatsSnapshot,
	timestamp: String,
}

struct BroadcasterInner {
	clients: HashMap<String, mpsc::UnboundedSender<Arc<String>>>,
	ticker_running: bool,
}

pub struct Broadcaster {
	inner: Mutex<BroadcasterInner>,
	store: Arc<dyn OrderStore>,
	pool: Arc<RpcPool>,
	parse_stats: Arc<ParseStats>,
	registry: Arc<CollectionRegistry>,
	period: Duration,
}

impl Broadcaster {
	pub fn new(
		store: Arc<dyn OrderStore>,
		pool: Arc<RpcPool>,
		parse_stats: Arc<ParseStats>,
		registry: Arc<CollectionRegistry>,
		period: Duration,
	) -> Arc<Self> {
		Arc::new(Self {
			inner: Mutex::new(BroadcasterInner {
				clients: HashMap::new(),
				ticker_running: false,
			}),
			store,
			pool,
			parse_stats,
			registry,
			period,
		})
	}

	/// Registers a client, starting the broadcast ticker if it was idle.
	pub fn register(self: &Arc<Self>) -> (String, mpsc::UnboundedReceiver<Arc<String>>) {
		let client_id = format!("{:016x}", rand::thread_rng().gen::<u64>());
		let (event_tx, event_rx) = mpsc::unbounded_channel();

		let mut inner = self.inner.lock().unwrap();
		inner.clients.insert(client_id.clone(), event_tx);
		metrics::PUSH_CLIENTS.set(inner.clients.len() as i64);
		info!("Push client {client_id} connected ({} total)", inner.clients.len());

		if !inner.ticker_running {
			inner.ticker_running = true;
			tokio::spawn(self.clone().broadcast_loop());
		}

		(client_id, event_rx)
	}

	pub fn client_count(&self) -> usize {
		self.inner.lock().unwrap().clients.len()
	}

	async fn broadcast_loop(self: Arc<Self>) {
		let mut ticker = utilities::make_periodic_tick(self.period, false);
		debug!("Broadcast ticker started");

		loop {
			ticker.tick().await;

			let payload = self.build_update().await;
			let payload = match serde_json::to_string(&payload) {
				Ok(payload) => Arc::new(payload),
				Err(error) => {
					tracing::error!("Could not serialize update payload: {error}");
					continue;
				},
			};

			let mut inner = self.inner.lock().unwrap();
			inner
				.clients
				.retain(|client_id, event_tx| match event_tx.send(payload.clone()) {
					Ok(()) => true,
					Err(_) => {
						debug!("Push client {client_id} dropped");
						false
					},
				});
			metrics::PUSH_CLIENTS.set(inner.clients.len() as i64);

			if inner.clients.is_empty() {
				inner.ticker_running = false;
				debug!("Broadcast ticker stopped, no clients left");
				return;
			}
		}
	}

	/// Reads tolerate empty results, so a broadcast can never fail; it just
	/// carries whatever the store answered.
	async fn build_update(&self) -> UpdatePayload {
		let stats = self.store.total_stats().await;
		let recent_orders = self.store.recent_orders(RECENT_ORDERS_LIMIT).await;
		let pool_stats = self.pool.stats();
		let parse_stats = self.parse_stats.snapshot();

		metrics::update_order_totals(&stats);
		metrics::update_pool(&pool_stats);
		metrics::update_parse_outcomes(&parse_stats);

		UpdatePayload {
			stats,
			collection_progress: self.registry.status(),
			recent_orders,
			pool_stats,
			parse_stats,
			timestamp: Utc::now().to_rfc3339(),
		}
	}
}

#[derive(Clone)]
pub struct PushContext {
	pub activities: Arc<Activities>,
	pub registry: Arc<CollectionRegistry>,
	pub broadcaster: Arc<Broadcaster>,
	pub settings: Arc<Settings>,
}

impl PushContext {
	pub fn new(activities: Arc<Activities>, settings: Arc<Settings>) -> Self {
		let registry = Arc::new(CollectionRegistry::new());
		let broadcaster = Broadcaster::new(
			activities.store().clone(),
			activities.pool().clone(),
			activities.parse_stats(),
			registry.clone(),
			Duration::from_millis(settings.push.broadcast_period_ms),
		);
		Self { activities, registry, broadcaster, settings }
	}

	fn workflows_enabled(&self) -> bool {
		matches!(self.settings.worker.mode, WorkerMode::Full | WorkerMode::Workflow)
	}
}

fn with_context(
	context: PushContext,
) -> impl Filter<Extract = (PushContext,), Error = Infallible> + Clone {
	warp::any().map(move || context.clone())
}

pub fn routes(
	context: PushContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
	let heartbeat_period = Duration::from_millis(context.settings.push.heartbeat_period_ms);

	let stream = warp::path!("api" / "stream")
		.and(warp::get())
		.and(with_context(context.clone()))
		.map(move |context: PushContext| {
			let (client_id, event_rx) = context.broadcaster.register();
			let connected = Event::default()
				.event("connected")
				.json_data(&json!({ "clientId": client_id }))
				.expect("A string map serializes");

			let events = futures::stream::once(async move { connected })
				.chain(UnboundedReceiverStream::new(event_rx).map(|payload: Arc<String>| {
					Event::default().event("update").data(payload.as_str().to_owned())
				}))
				.map(Ok::<_, Infallible>);

			warp::sse::reply(
				warp::sse::keep_alive().interval(heartbeat_period).stream(events),
			)
		});

	let start = warp::path!("api" / "collection" / "start")
		.and(warp::post())
		.and(with_context(context.clone()))
		.map(|context: PushContext| {
			if !context.workflows_enabled() {
				return warp::reply::json(&json!({
					"started": false,
					"reason": format!("worker mode {:?} does not run workflows", context.settings.worker.mode),
				}));
			}
			let started = context.registry.start(|| {
				start_collection(context.activities.clone(), &context.settings)
			});
			warp::reply::json(&json!({
				"started": started,
				"reason": if started { serde_json::Value::Null } else { json!("already_running") },
			}))
		});

	let status = warp::path!("api" / "collection" / "status")
		.and(warp::get())
		.and(with_context(context.clone()))
		.map(|context: PushContext| match context.registry.status() {
			Some(snapshot) => warp::reply::json(&snapshot),
			None => warp::reply::json(&json!({ "running": false })),
		});

	let pause = warp::path!("api" / "collection" / "pause")
		.and(warp::post())
		.and(with_context(context.clone()))
		.map(|context: PushContext| {
			warp::reply::json(&json!({ "signalled": context.registry.pause() }))
		});

	let resume = warp::path!("api" / "collection" / "resume")
		.and(warp::post())
		.and(with_context(context.clone()))
		.map(|context: PushContext| {
			warp::reply::json(&json!({ "signalled": context.registry.resume() }))
		});

	let cancel = warp::path!("api" / "collection" / "cancel")
		.and(warp::post())
		.and(with_context(context.clone()))
		.map(|context: PushContext| {
			warp::reply::json(&json!({ "cancelled": context.registry.cancel() }))
		});

	let health = warp::path!("api" / "health")
		.and(warp::get())
		.and(with_context(context.clone()))
		.and_then(|context: PushContext| async move {
			Ok::<_, warp::Rejection>(warp::reply::json(&context.activities.check_rpc_health().await))
		});

	let cors = match &context.settings.push.cors_origin {
		Some(origin) => warp::cors()
			.allow_origin(origin.as_str())
			.allow_methods(vec!["GET", "POST"]),
		None => warp::cors().allow_any_origin().allow_methods(vec!["GET", "POST"]),
	};

	stream
		.or(start)
		.or(status)
		.or(pause)
		.or(resume)
		.or(cancel)
		.or(health)
		.with(cors)
}

pub fn start(
	context: PushContext,
) -> Result<(SocketAddr, impl std::future::Future<Output = ()>)> {
	let port = context.settings.push.port;
	let routes = routes(context);

	let (bound, future) = warp::serve(routes)
		.try_bind_ephemeral(("0.0.0.0".parse::<IpAddr>()?, port))
		.context("Could not bind push server")?;

	info!("Push server listening on {bound}");
	Ok((bound, future))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		parser::Parser,
		settings::EndpointConfig,
		sol::{
			commitment_config::CommitmentLevel,
			fetcher::{FetchOptions, ParallelFetcher},
			rpc::{mocks::MockSolRpcApi, SolRpcApi},
		},
		store::memory::MemoryStore,
		tokens::TokenDirectory,
	};

	fn test_settings() -> Arc<Settings> {
		Arc::new(Settings {
			chain: crate::settings::Chain {
				rpc_urls: "https://a.example".to_string(),
				commitment: "confirmed".to_string(),
				timeout_ms: 60_000,
				source_program: "src".to_string(),
				destination_program: "dst".to_string(),
			},
			database: crate::settings::Database {
				url: "http://localhost:8123".to_string(),
				database: "orders".to_string(),
				user: "default".to_string(),
				password: String::new(),
				async_insert: true,
				wait_for_async_insert: true,
			},
			collection: Default::default(),
			retry: Default::default(),
			push: Default::default(),
			health_check: None,
			metrics: None,
			worker: Default::default(),
		})
	}

	fn test_context(store: Arc<MemoryStore>, mock: MockSolRpcApi) -> PushContext {
		let pool = Arc::new(RpcPool::new(vec![(
			EndpointConfig {
				url: "https://a.example".into(),
				name: "a".into(),
				max_rps: 100_000,
			},
			Arc::new(mock) as Arc<dyn SolRpcApi>,
		)]));
		let activities = Arc::new(Activities::new(
			pool.clone(),
			store,
			ParallelFetcher::new(pool.clone(), FetchOptions::default()),
			Parser::new(TokenDirectory::mainnet(), Arc::new(ParseStats::default())),
			CommitmentLevel::Confirmed,
		));
		PushContext::new(activities, test_settings())
	}

	async fn wait_until(condition: impl Fn() -> bool) {
		for _ in 0..200 {
			if condition() {
				return;
			}
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		panic!("Condition not met in time");
	}

	#[tokio::test(start_paused = true)]
	async fn broadcaster_ticks_updates_and_prunes_dead_clients() {
		let context = test_context(Arc::new(MemoryStore::new()), MockSolRpcApi::new());
		let broadcaster = &context.broadcaster;

		let (_id_a, mut rx_a) = broadcaster.register();
		let (_id_b, rx_b) = broadcaster.register();
		assert_eq!(broadcaster.client_count(), 2);

		let payload = tokio::time::timeout(Duration::from_secs(30), rx_a.recv())
			.await
			.expect("A broadcast tick happened")
			.unwrap();
		assert!(payload.contains("stats"));
		assert!(payload.contains("timestamp"));

		// Dropping a receiver makes the next send fail, which silently
		// removes the client.
		drop(rx_b);
		wait_until(|| broadcaster.client_count() == 1).await;

		// Last client gone: the ticker stops on its next tick.
		drop(rx_a);
		wait_until(|| broadcaster.client_count() == 0).await;
		wait_until(|| !broadcaster.inner.lock().unwrap().ticker_running).await;
	}

	#[tokio::test]
	async fn status_route_reports_not_running_before_start() {
		let context = test_context(Arc::new(MemoryStore::new()), MockSolRpcApi::new());
		let routes = routes(context);

		let response = warp::test::request()
			.method("GET")
			.path("/api/collection/status")
			.reply(&routes)
			.await;

		assert_eq!(response.status(), 200);
		let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
		assert_eq!(body["running"], serde_json::json!(false));
	}

	#[tokio::test]
	async fn signals_without_a_collection_report_false() {
		let context = test_context(Arc::new(MemoryStore::new()), MockSolRpcApi::new());
		let routes = routes(context);

		let response = warp::test::request()
			.method("POST")
			.path("/api/collection/pause")
			.reply(&routes)
			.await;
		let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
		assert_eq!(body["signalled"], serde_json::json!(false));
	}

	#[tokio::test]
	async fn health_route_reports_pool_state_even_when_the_node_is_down() {
		let mut mock = MockSolRpcApi::new();
		mock.expect_get_slot().returning(|_| Err(anyhow::anyhow!("connection refused")));

		let context = test_context(Arc::new(MemoryStore::new()), mock);
		let routes = routes(context);

		let response =
			warp::test::request().method("GET").path("/api/health").reply(&routes).await;

		assert_eq!(response.status(), 200);
		let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
		assert_eq!(body["healthy"], serde_json::json!(false));
		assert_eq!(body["pool_stats"]["endpoints"][0]["name"], serde_json::json!("a"));
	}
}
