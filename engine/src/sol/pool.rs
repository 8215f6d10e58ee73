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

//! Multi-endpoint connection pool. Endpoints are ranked by availability
//! (circuit not open, rate-limit headroom left), then picked round-robin.
//! Every `acquire` must be paired with exactly one `report_success` or
//! `report_failure` against the returned endpoint.

use std::{
	collections::VecDeque,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use anyhow::Result;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::rpc::{SolRpcApi, SolRpcClient};
use crate::{
	constants::{
		CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_FAILURE_WINDOW, CIRCUIT_HALF_OPEN_SUCCESS_QUOTA,
		CIRCUIT_RECOVERY_TIMEOUT, CIRCUIT_SUCCESS_STREAK_RESET, LATENCY_SAMPLES,
		RATE_LIMIT_HEADROOM, RATE_TIMESTAMP_RETENTION, RATE_WINDOW,
	},
	settings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
	Closed,
	Open,
	HalfOpen,
}

impl CircuitState {
	/// Gauge encoding: 0 = closed, 0.5 = half-open, 1 = open.
	pub fn as_metric(self) -> f64 {
		match self {
			Self::Closed => 0.0,
			Self::HalfOpen => 0.5,
			Self::Open => 1.0,
		}
	}
}

/// Whether a failed request is worth submitting again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcFailure {
	Retryable,
	NonRetryable,
}

const RETRYABLE_PATTERNS: &[&str] = &[
	"429",
	"too many requests",
	"rate limit",
	"timeout",
	"timed out",
	"connection",
	"connect",
	"reset by peer",
	"temporarily unavailable",
	"service unavailable",
	"bad gateway",
	"gateway timeout",
	"internal server error",
	"node is behind",
	"block not available",
	"slot skipped",
	"transaction version",
	"busy",
];

const NON_RETRYABLE_PATTERNS: &[&str] =
	&["invalid param", "invalid request", "method not found", "parse error", "unsupported", "malformed"];

/// Fixed-string classification of an error message. Unknown errors default
/// to retryable.
pub fn classify_rpc_error(message: &str) -> RpcFailure {
	let message = message.to_lowercase();
	if RETRYABLE_PATTERNS.iter().any(|pattern| message.contains(pattern)) {
		return RpcFailure::Retryable;
	}
	if NON_RETRYABLE_PATTERNS.iter().any(|pattern| message.contains(pattern)) {
		return RpcFailure::NonRetryable;
	}
	RpcFailure::Retryable
}

struct EndpointState {
	circuit: CircuitState,
	/// Failure instants inside the rolling window, oldest first.
	failure_times: VecDeque<Instant>,
	half_open_successes: u32,
	success_streak: u32,
	last_failure: Option<Instant>,
	last_success: Option<Instant>,
	request_count: u64,
	failure_count: u64,
	success_count: u64,
	recent_requests: VecDeque<Instant>,
	recent_latencies: VecDeque<u64>,
	tokens: f64,
	last_refill: Instant,
}

pub struct PoolEndpoint {
	pub name: String,
	pub url: String,
	pub max_rps: u32,
	pub priority: usize,
	client: Arc<dyn SolRpcApi>,
	state: Mutex<EndpointState>,
}

impl PoolEndpoint {
	fn new(config: settings::EndpointConfig, priority: usize, client: Arc<dyn SolRpcApi>) -> Self {
		Self {
			name: config.name,
			url: config.url,
			max_rps: config.max_rps,
			priority,
			client,
			state: Mutex::new(EndpointState {
				circuit: CircuitState::Closed,
				failure_times: VecDeque::new(),
				half_open_successes: 0,
				success_streak: 0,
				last_failure: None,
				last_success: None,
				request_count: 0,
				failure_count: 0,
				success_count: 0,
				recent_requests: VecDeque::new(),
				recent_latencies: VecDeque::new(),
				tokens: config.max_rps as f64,
				last_refill: Instant::now(),
			}),
		}
	}

	pub fn circuit_state(&self) -> CircuitState {
		self.state.lock().unwrap().circuit
	}

	fn last_failure(&self) -> Option<Instant> {
		self.state.lock().unwrap().last_failure
	}

	/// Open -> half-open once the recovery timeout has elapsed.
	fn maybe_half_open(&self, now: Instant) {
		let mut state = self.state.lock().unwrap();
		if state.circuit == CircuitState::Open {
			if let Some(last_failure) = state.last_failure {
				if now.duration_since(last_failure) >= CIRCUIT_RECOVERY_TIMEOUT {
					debug!("Endpoint {} circuit open -> half-open", self.name);
					state.circuit = CircuitState::HalfOpen;
					state.half_open_successes = 0;
				}
			}
		}
	}

	fn force_half_open(&self) {
		let mut state = self.state.lock().unwrap();
		if state.circuit == CircuitState::Open {
			warn!("No eligible endpoint; probing {} early in half-open", self.name);
			state.circuit = CircuitState::HalfOpen;
			state.half_open_successes = 0;
		}
	}

	/// Within rate-limit headroom: requests over the trailing second stay
	/// below `RATE_LIMIT_HEADROOM * max_rps`.
	fn has_headroom(&self, now: Instant) -> bool {
		let mut state = self.state.lock().unwrap();
		prune_older_than(&mut state.recent_requests, now, RATE_TIMESTAMP_RETENTION);
		let recent = state
			.recent_requests
			.iter()
			.filter(|at| now.duration_since(**at) < RATE_WINDOW)
			.count();
		(recent as f64) < RATE_LIMIT_HEADROOM * self.max_rps as f64
	}

	/// Take one token, or report how long until one is refilled.
	fn try_take_token(&self, now: Instant) -> Result<(), Duration> {
		let mut state = self.state.lock().unwrap();

		let refill_rate = self.max_rps as f64;
		let elapsed = now.duration_since(state.last_refill).as_secs_f64();
		state.tokens = (state.tokens + elapsed * refill_rate).min(self.max_rps as f64);
		state.last_refill = now;

		if state.tokens >= 1.0 {
			state.tokens -= 1.0;
			state.request_count += 1;
			state.recent_requests.push_back(now);
			prune_older_than(&mut state.recent_requests, now, RATE_TIMESTAMP_RETENTION);
			Ok(())
		} else {
			Err(Duration::from_secs_f64((1.0 - state.tokens) / refill_rate))
		}
	}

	/// Blocks until the endpoint's bucket has a token, then consumes it.
	async fn wait_for_token(&self) {
		loop {
			match self.try_take_token(Instant::now()) {
				Ok(()) => return,
				Err(wait) => tokio::time::sleep(wait).await,
			}
		}
	}

	pub fn report_success(&self, latency_ms: u64) {
		let now = Instant::now();
		let mut state = self.state.lock().unwrap();

		state.success_count += 1;
		state.success_streak += 1;
		state.last_success = Some(now);
		state.recent_latencies.push_back(latency_ms);
		while state.recent_latencies.len() > LATENCY_SAMPLES {
			state.recent_latencies.pop_front();
		}

		match state.circuit {
			CircuitState::HalfOpen => {
				state.half_open_successes += 1;
				if state.half_open_successes >= CIRCUIT_HALF_OPEN_SUCCESS_QUOTA {
					debug!("Endpoint {} circuit half-open -> closed", self.name);
					state.circuit = CircuitState::Closed;
					state.failure_times.clear();
					state.half_open_successes = 0;
				}
			},
			CircuitState::Closed => {
				if state.success_streak >= CIRCUIT_SUCCESS_STREAK_RESET {
					state.failure_times.clear();
				} else {
					// Each success decays the failure counter by one.
					state.failure_times.pop_front();
				}
			},
			CircuitState::Open => {},
		}
	}

	pub fn report_failure(&self, error: &str) {
		let now = Instant::now();
		let mut state = self.state.lock().unwrap();

		state.failure_count += 1;
		state.success_streak = 0;
		state.last_failure = Some(now);

		match state.circuit {
			CircuitState::HalfOpen => {
				warn!("Endpoint {} failed in half-open, reopening circuit: {error}", self.name);
				state.circuit = CircuitState::Open;
				state.half_open_successes = 0;
			},
			CircuitState::Closed => {
				state.failure_times.push_back(now);
				prune_older_than(&mut state.failure_times, now, CIRCUIT_FAILURE_WINDOW);
				if state.failure_times.len() as u32 >= CIRCUIT_FAILURE_THRESHOLD {
					warn!(
						"Endpoint {} reached {} failures within window, opening circuit: {error}",
						self.name,
						state.failure_times.len()
					);
					state.circuit = CircuitState::Open;
				}
			},
			CircuitState::Open => {},
		}
	}

	fn stats(&self) -> EndpointStats {
		let now = Instant::now();
		let mut state = self.state.lock().unwrap();
		prune_older_than(&mut state.recent_requests, now, RATE_TIMESTAMP_RETENTION);
		let current_rps = state
			.recent_requests
			.iter()
			.filter(|at| now.duration_since(**at) < RATE_WINDOW)
			.count() as u32;
		let avg_latency_ms = if state.recent_latencies.is_empty() {
			0.0
		} else {
			state.recent_latencies.iter().sum::<u64>() as f64 / state.recent_latencies.len() as f64
		};

		EndpointStats {
			name: self.name.clone(),
			url: self.url.clone(),
			circuit_state: state.circuit,
			requests: state.request_count,
			failures: state.failure_count,
			successes: state.success_count,
			avg_latency_ms,
			current_rps,
			max_rps: self.max_rps,
		}
	}
}

fn prune_older_than(times: &mut VecDeque<Instant>, now: Instant, retention: Duration) {
	while let Some(oldest) = times.front() {
		if now.duration_since(*oldest) >= retention {
			times.pop_front();
		} else {
			break;
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
	pub name: String,
	pub url: String,
	pub circuit_state: CircuitState,
	pub requests: u64,
	pub failures: u64,
	pub successes: u64,
	pub avg_latency_ms: f64,
	pub current_rps: u32,
	pub max_rps: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
	pub endpoints: Vec<EndpointStats>,
}

pub struct RpcPool {
	endpoints: Vec<Arc<PoolEndpoint>>,
	cursor: AtomicUsize,
}

impl RpcPool {
	pub fn from_settings(chain: &settings::Chain) -> Result<Self> {
		let timeout = Duration::from_millis(chain.timeout_ms);
		let endpoints = chain
			.endpoints()?
			.into_iter()
			.enumerate()
			.map(|(priority, config)| {
				let client: Arc<dyn SolRpcApi> =
					Arc::new(SolRpcClient::new(config.url.clone(), timeout)?);
				Ok(Arc::new(PoolEndpoint::new(config, priority, client)))
			})
			.collect::<Result<Vec<_>>>()?;
		Ok(Self { endpoints, cursor: AtomicUsize::new(0) })
	}

	pub fn new(endpoints: Vec<(settings::EndpointConfig, Arc<dyn SolRpcApi>)>) -> Self {
		Self {
			endpoints: endpoints
				.into_iter()
				.enumerate()
				.map(|(priority, (config, client))| {
					Arc::new(PoolEndpoint::new(config, priority, client))
				})
				.collect(),
			cursor: AtomicUsize::new(0),
		}
	}

	/// Selects an endpoint and waits for its token bucket, returning a
	/// client bound to it. The caller reports the outcome on the endpoint.
	pub async fn acquire(&self) -> (Arc<dyn SolRpcApi>, Arc<PoolEndpoint>) {
		let endpoint = self.select();
		endpoint.wait_for_token().await;
		(endpoint.client.clone(), endpoint)
	}

	fn select(&self) -> Arc<PoolEndpoint> {
		let now = Instant::now();

		for endpoint in &self.endpoints {
			endpoint.maybe_half_open(now);
		}

		let eligible = self
			.endpoints
			.iter()
			.filter(|endpoint| {
				endpoint.circuit_state() != CircuitState::Open && endpoint.has_headroom(now)
			})
			.collect::<Vec<_>>();

		if !eligible.is_empty() {
			let index = self.cursor.fetch_add(1, Ordering::Relaxed) % eligible.len();
			return eligible[index].clone();
		}

		// Everything is open or saturated. Probe the open endpoint that has
		// been resting the longest.
		if let Some(endpoint) = self
			.endpoints
			.iter()
			.filter(|endpoint| endpoint.circuit_state() == CircuitState::Open)
			.min_by_key(|endpoint| endpoint.last_failure())
		{
			endpoint.force_half_open();
			return endpoint.clone();
		}

		self.endpoints[0].clone()
	}

	/// Endpoints whose circuit is currently closed.
	pub fn healthy_endpoint_count(&self) -> usize {
		self.endpoints
			.iter()
			.filter(|endpoint| endpoint.circuit_state() == CircuitState::Closed)
			.count()
	}

	pub fn endpoint_count(&self) -> usize {
		self.endpoints.len()
	}

	pub fn stats(&self) -> PoolStats {
		PoolStats { endpoints: self.endpoints.iter().map(|endpoint| endpoint.stats()).collect() }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sol::rpc::mocks::MockSolRpcApi;

	fn test_pool(configs: &[(&str, u32)]) -> RpcPool {
		RpcPool::new(
			configs
				.iter()
				.map(|(name, max_rps)| {
					(
						settings::EndpointConfig {
							url: format!("https://{name}.example"),
							name: name.to_string(),
							max_rps: *max_rps,
						},
						Arc::new(MockSolRpcApi::new()) as Arc<dyn SolRpcApi>,
					)
				})
				.collect(),
		)
	}

	fn endpoint_named(pool: &RpcPool, name: &str) -> Arc<PoolEndpoint> {
		pool.endpoints.iter().find(|endpoint| endpoint.name == name).unwrap().clone()
	}

	#[tokio::test(start_paused = true)]
	async fn circuit_opens_after_threshold_and_recovers() {
		let pool = test_pool(&[("a", 100), ("b", 100)]);
		let a = endpoint_named(&pool, "a");

		for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
			a.report_failure("connection refused");
		}
		assert_eq!(a.circuit_state(), CircuitState::Open);

		// While A is open every acquire lands on B.
		for _ in 0..5 {
			let (_, endpoint) = pool.acquire().await;
			assert_eq!(endpoint.name, "b");
			endpoint.report_success(10);
		}

		// After the recovery timeout the next acquire probes A (half-open).
		tokio::time::advance(CIRCUIT_RECOVERY_TIMEOUT).await;
		let _ = pool.acquire().await;
		assert_eq!(a.circuit_state(), CircuitState::HalfOpen);

		for _ in 0..CIRCUIT_HALF_OPEN_SUCCESS_QUOTA {
			assert_ne!(a.circuit_state(), CircuitState::Closed);
			a.report_success(10);
		}
		assert_eq!(a.circuit_state(), CircuitState::Closed);
	}

	#[tokio::test(start_paused = true)]
	async fn half_open_failure_reopens() {
		let pool = test_pool(&[("a", 100)]);
		let a = endpoint_named(&pool, "a");

		for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
			a.report_failure("timeout");
		}
		tokio::time::advance(CIRCUIT_RECOVERY_TIMEOUT).await;
		let _ = pool.acquire().await;
		assert_eq!(a.circuit_state(), CircuitState::HalfOpen);

		a.report_failure("timeout");
		assert_eq!(a.circuit_state(), CircuitState::Open);
	}

	#[tokio::test(start_paused = true)]
	async fn failures_outside_window_do_not_count() {
		let pool = test_pool(&[("a", 100)]);
		let a = endpoint_named(&pool, "a");

		for _ in 0..CIRCUIT_FAILURE_THRESHOLD - 1 {
			a.report_failure("timeout");
		}
		tokio::time::advance(CIRCUIT_FAILURE_WINDOW).await;
		a.report_failure("timeout");
		assert_eq!(a.circuit_state(), CircuitState::Closed);
	}

	#[tokio::test(start_paused = true)]
	async fn success_decays_failure_count() {
		let pool = test_pool(&[("a", 100)]);
		let a = endpoint_named(&pool, "a");

		for _ in 0..CIRCUIT_FAILURE_THRESHOLD - 1 {
			a.report_failure("timeout");
		}
		a.report_success(5);
		a.report_failure("timeout");
		// The decayed failure kept the count below the threshold.
		assert_eq!(a.circuit_state(), CircuitState::Closed);
		a.report_failure("timeout");
		assert_eq!(a.circuit_state(), CircuitState::Open);
	}

	#[tokio::test(start_paused = true)]
	async fn round_robin_rotates_among_eligible() {
		let pool = test_pool(&[("a", 100), ("b", 100)]);

		let mut names = Vec::new();
		for _ in 0..4 {
			let (_, endpoint) = pool.acquire().await;
			endpoint.report_success(1);
			names.push(endpoint.name.clone());
		}
		assert_eq!(names, vec!["a", "b", "a", "b"]);
	}

	#[tokio::test(start_paused = true)]
	async fn rate_limiter_converges_to_refill_rate() {
		let pool = test_pool(&[("a", 2)]);

		let started = Instant::now();
		for _ in 0..10 {
			let (_, endpoint) = pool.acquire().await;
			endpoint.report_success(1);
		}
		// Bucket capacity 2, refill 2/s: 10 acquires need at least 8 refilled
		// tokens, so at least ~4s of virtual time.
		assert!(started.elapsed() >= Duration::from_secs(4) - Duration::from_millis(50));
	}

	#[tokio::test(start_paused = true)]
	async fn saturated_endpoint_loses_eligibility() {
		let pool = test_pool(&[("a", 5), ("b", 1000)]);

		// Saturate A's headroom: 4 requests in the last second is >= 0.8 * 5.
		for _ in 0..4 {
			let a = endpoint_named(&pool, "a");
			a.try_take_token(Instant::now()).unwrap();
		}
		for _ in 0..5 {
			let (_, endpoint) = pool.acquire().await;
			endpoint.report_success(1);
			assert_eq!(endpoint.name, "b");
		}
	}

	#[tokio::test(start_paused = true)]
	async fn all_open_probes_oldest_failure() {
		let pool = test_pool(&[("a", 100), ("b", 100)]);
		let a = endpoint_named(&pool, "a");
		let b = endpoint_named(&pool, "b");

		for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
			a.report_failure("timeout");
		}
		tokio::time::advance(Duration::from_secs(1)).await;
		for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
			b.report_failure("timeout");
		}

		// A failed longest ago, so it is probed first.
		let (_, endpoint) = pool.acquire().await;
		assert_eq!(endpoint.name, "a");
		assert_eq!(endpoint.circuit_state(), CircuitState::HalfOpen);
	}

	#[test]
	fn classifies_fixed_error_strings() {
		assert_eq!(classify_rpc_error("HTTP status 429 Too Many Requests"), RpcFailure::Retryable);
		assert_eq!(classify_rpc_error("Connection reset by peer"), RpcFailure::Retryable);
		assert_eq!(classify_rpc_error("RPC node is BEHIND by 150 slots"), RpcFailure::Retryable);
		assert_eq!(classify_rpc_error("Invalid param: WrongSize"), RpcFailure::NonRetryable);
		assert_eq!(classify_rpc_error("Method not found"), RpcFailure::NonRetryable);
		// Unknown errors default to retryable.
		assert_eq!(classify_rpc_error("something utterly new"), RpcFailure::Retryable);
	}
}
