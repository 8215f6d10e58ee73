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

use std::time::Duration;

// ======= Rpc pool =======

/// Consecutive failures within [`CIRCUIT_FAILURE_WINDOW`] that open an
/// endpoint's circuit.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit waits before the next acquire probes it.
pub const CIRCUIT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Successes required in half-open before the circuit closes again.
pub const CIRCUIT_HALF_OPEN_SUCCESS_QUOTA: u32 = 3;

/// Failures older than this do not count towards the threshold.
pub const CIRCUIT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// A run of this many successes fully resets a closed circuit's failure count.
pub const CIRCUIT_SUCCESS_STREAK_RESET: u32 = 10;

/// An endpoint only has rate-limit headroom while its request count over the
/// trailing second stays below this fraction of its max RPS.
pub const RATE_LIMIT_HEADROOM: f64 = 0.8;

/// Window over which the achieved request rate is measured.
pub const RATE_WINDOW: Duration = Duration::from_millis(1000);

/// Request timestamps older than this are dropped.
pub const RATE_TIMESTAMP_RETENTION: Duration = Duration::from_secs(2);

/// Rolling latency samples kept per endpoint.
pub const LATENCY_SAMPLES: usize = 100;

pub const DEFAULT_ENDPOINT_MAX_RPS: u32 = 10;

// ======= Parallel fetcher =======

pub const FETCH_MIN_CONCURRENCY: usize = 2;
pub const FETCH_MAX_CONCURRENCY: usize = 20;
pub const FETCH_DEFAULT_MAX_RETRIES: u32 = 3;
pub const FETCH_DEFAULT_BATCH_SIZE: usize = 50;
pub const FETCH_DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Completed items between progress heartbeats.
pub const HEARTBEAT_EVERY_ITEMS: usize = 50;

// ======= Activities =======

pub const FETCH_SIGNATURES_TIMEOUT: Duration = Duration::from_secs(180);
pub const FETCH_AND_PARSE_TIMEOUT: Duration = Duration::from_secs(600);
pub const STORE_EVENTS_TIMEOUT: Duration = Duration::from_secs(60);

// ======= Workflow =======

/// Iterations a single child run performs before handing its state to a fresh
/// run (continue-as-new), bounding per-run history.
pub const DEFAULT_MAX_ITERATIONS_PER_RUN: u32 = 50;

/// A paused child gives up waiting for the resume signal after this long.
pub const PAUSE_WAIT_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

// ======= Settings environment variables =======

pub const ENV_PREFIX: &str = "ORDERSCAN";
pub const ENV_SEPARATOR: &str = "__";

/// Base path for configuration files.
pub const CONFIG_ROOT: &str = "ORDERSCAN_CONFIG_ROOT";
pub const DEFAULT_CONFIG_ROOT: &str = "config";
