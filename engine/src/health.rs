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

//! Liveness endpoint so external supervisors can see the engine is up.
//! Returns HTTP 200 to any request on `{hostname}:{port}/health`.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use tracing::info;
use warp::Filter;

use crate::settings;

/// Split into bind and run so callers (and tests) know the listener is
/// active before proceeding.
pub fn start(
	health_settings: &settings::HealthCheck,
) -> Result<(SocketAddr, impl std::future::Future<Output = ()>)> {
	let address: SocketAddr = (
		health_settings
			.hostname
			.parse::<IpAddr>()
			.with_context(|| format!("Invalid health check hostname {}", health_settings.hostname))?,
		health_settings.port,
	)
		.into();

	let route = warp::path("health").and(warp::path::end()).map(|| "OK");
	let (bound, future) =
		warp::serve(route).try_bind_ephemeral(address).context("Could not bind health check")?;

	info!("Health check listening on {bound}");
	Ok((bound, future))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn responds_200_on_health_and_404_elsewhere() {
		let (address, server) = start(&settings::HealthCheck {
			hostname: "127.0.0.1".to_string(),
			port: 0,
		})
		.unwrap();
		tokio::spawn(server);

		let health = reqwest::get(format!("http://{address}/health")).await.unwrap();
		assert_eq!(health.status().as_u16(), 200);
		assert_eq!(health.text().await.unwrap(), "OK");

		let other = reqwest::get(format!("http://{address}/nothing")).await.unwrap();
		assert_eq!(other.status().as_u16(), 404);
	}
}
