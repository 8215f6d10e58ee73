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

//! Metric exposition in the prometheus text format.

use std::net::IpAddr;

use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{GaugeVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use tracing::info;
use warp::Filter;

use crate::{
	parser::ParseStatsSnapshot,
	settings,
	sol::pool::PoolStats,
	store::TotalStats,
};

lazy_static! {
	static ref REGISTRY: Registry = Registry::new();
	pub static ref ORDERS_TOTAL: IntGaugeVec = IntGaugeVec::new(
		Opts::new("orders_total", "Collected order events by type"),
		&["event_type"]
	)
	.expect("Metric successfully created");
	pub static ref PARSE_OUTCOMES: IntCounterVec = IntCounterVec::new(
		Opts::new("parse_outcomes_total", "Parse outcomes by result"),
		&["outcome"]
	)
	.expect("Metric successfully created");
	pub static ref POOL_REQUESTS: IntCounterVec = IntCounterVec::new(
		Opts::new("rpc_pool_requests_total", "Requests issued per endpoint"),
		&["endpoint"]
	)
	.expect("Metric successfully created");
	pub static ref POOL_FAILURES: IntCounterVec = IntCounterVec::new(
		Opts::new("rpc_pool_failures_total", "Failures observed per endpoint"),
		&["endpoint"]
	)
	.expect("Metric successfully created");
	pub static ref CIRCUIT_STATE: GaugeVec = GaugeVec::new(
		Opts::new(
			"rpc_endpoint_circuit_state",
			"Circuit state per endpoint: 0 closed, 0.5 half-open, 1 open"
		),
		&["endpoint"]
	)
	.expect("Metric successfully created");
	pub static ref ENDPOINT_RPS: IntGaugeVec = IntGaugeVec::new(
		Opts::new("rpc_endpoint_current_rps", "Approximate request rate per endpoint"),
		&["endpoint"]
	)
	.expect("Metric successfully created");
	pub static ref ENDPOINT_LATENCY: GaugeVec = GaugeVec::new(
		Opts::new("rpc_endpoint_avg_latency_ms", "Rolling average latency per endpoint"),
		&["endpoint"]
	)
	.expect("Metric successfully created");
	pub static ref PUSH_CLIENTS: IntGauge =
		IntGauge::new("push_connected_clients", "Currently connected push clients")
			.expect("Metric successfully created");
}

pub fn register_metrics() {
	REGISTRY.register(Box::new(ORDERS_TOTAL.clone())).expect("Metric successfully registered");
	REGISTRY.register(Box::new(PARSE_OUTCOMES.clone())).expect("Metric successfully registered");
	REGISTRY.register(Box::new(POOL_REQUESTS.clone())).expect("Metric successfully registered");
	REGISTRY.register(Box::new(POOL_FAILURES.clone())).expect("Metric successfully registered");
	REGISTRY.register(Box::new(CIRCUIT_STATE.clone())).expect("Metric successfully registered");
	REGISTRY.register(Box::new(ENDPOINT_RPS.clone())).expect("Metric successfully registered");
	REGISTRY.register(Box::new(ENDPOINT_LATENCY.clone())).expect("Metric successfully registered");
	REGISTRY.register(Box::new(PUSH_CLIENTS.clone())).expect("Metric successfully registered");
}

/// Gauges refresh from snapshots; counters advance by the observed delta so
/// exposition stays monotonic.
pub fn update_order_totals(stats: &TotalStats) {
	ORDERS_TOTAL.with_label_values(&["created"]).set(stats.created_count as i64);
	ORDERS_TOTAL.with_label_values(&["fulfilled"]).set(stats.fulfilled_count as i64);
}

pub fn update_parse_outcomes(stats: &ParseStatsSnapshot) {
	for (outcome, value) in [
		("success", stats.success),
		("failed", stats.failed),
		("no_events", stats.no_events),
	] {
		let counter = PARSE_OUTCOMES.with_label_values(&[outcome]);
		counter.inc_by(value.saturating_sub(counter.get()));
	}
}

pub fn update_pool(stats: &PoolStats) {
	for endpoint in &stats.endpoints {
		let requests = POOL_REQUESTS.with_label_values(&[endpoint.name.as_str()]);
		requests.inc_by(endpoint.requests.saturating_sub(requests.get()));
		let failures = POOL_FAILURES.with_label_values(&[endpoint.name.as_str()]);
		failures.inc_by(endpoint.failures.saturating_sub(failures.get()));

		CIRCUIT_STATE
			.with_label_values(&[endpoint.name.as_str()])
			.set(endpoint.circuit_state.as_metric());
		ENDPOINT_RPS
			.with_label_values(&[endpoint.name.as_str()])
			.set(endpoint.current_rps as i64);
		ENDPOINT_LATENCY
			.with_label_values(&[endpoint.name.as_str()])
			.set(endpoint.avg_latency_ms);
	}
}

#[tracing::instrument(name = "prometheus-metrics", skip_all)]
pub fn start(metrics_settings: &settings::Metrics) -> Result<impl std::future::Future<Output = ()>> {
	info!("Starting on {}:{}", metrics_settings.hostname, metrics_settings.port);

	const PATH: &str = "metrics";
	let future = warp::serve(
		warp::any().and(warp::path(PATH)).and(warp::path::end()).map(metrics_handler),
	)
	.bind((metrics_settings.hostname.parse::<IpAddr>()?, metrics_settings.port));

	Ok(future)
}

fn metrics_handler() -> String {
	use prometheus::Encoder;
	let encoder = prometheus::TextEncoder::new();

	let mut buffer = Vec::new();
	if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
		tracing::error!("Could not encode metrics: {e}");
	};
	String::from_utf8(buffer).unwrap_or_default()
}
