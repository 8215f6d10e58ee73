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

use tracing_subscriber::EnvFilter;

/// Install the process-wide tracing subscriber. Filter directives come from
/// `RUST_LOG`, defaulting to `info`. With `json` set, events are emitted as
/// one JSON object per line for log shippers.
pub fn init_tracing(json: bool) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	if json {
		tracing_subscriber::fmt().with_env_filter(filter).json().init();
	} else {
		tracing_subscriber::fmt().with_env_filter(filter).init();
	}
}

/// Subscriber for tests: captures events so assertions can run with output
/// visible under `--nocapture`. Safe to call from multiple tests.
pub fn init_test_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::new("debug"))
		.with_test_writer()
		.try_init();
}
