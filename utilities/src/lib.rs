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

use rand::Rng;

pub mod logging;

/// Returns a ticker with the period `period`. The first tick completes
/// immediately iff `yield_immediately` is set. Missed ticks are not bunched
/// up, the next tick is rescheduled a full period out.
pub fn make_periodic_tick(period: Duration, yield_immediately: bool) -> tokio::time::Interval {
	let mut interval = tokio::time::interval_at(
		if yield_immediately {
			tokio::time::Instant::now()
		} else {
			tokio::time::Instant::now() + period
		},
		period,
	);
	interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	interval
}

/// Exponential backoff delay for retry attempt `attempt` (1-based):
/// `base * 2^(attempt - 1)` plus up to 30% jitter, capped at `max_delay`
/// before the jitter is applied.
pub fn backoff_with_jitter(base: Duration, attempt: u32, max_delay: Duration) -> Duration {
	let exponential =
		std::cmp::min(max_delay, base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1))));
	let jitter = exponential.mul_f64(rand::thread_rng().gen_range(0.0..0.3));
	exponential + jitter
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn periodic_tick_yields_immediately_when_asked() {
		let mut tick = make_periodic_tick(Duration::from_secs(10), true);

		// First tick must resolve without the clock advancing.
		tokio::time::timeout(Duration::from_millis(1), tick.tick()).await.unwrap();

		assert!(tokio::time::timeout(Duration::from_secs(9), tick.tick()).await.is_err());
		tokio::time::timeout(Duration::from_secs(2), tick.tick()).await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn periodic_tick_waits_full_period_otherwise() {
		let mut tick = make_periodic_tick(Duration::from_secs(10), false);

		assert!(tokio::time::timeout(Duration::from_secs(9), tick.tick()).await.is_err());
		tokio::time::timeout(Duration::from_secs(2), tick.tick()).await.unwrap();
	}

	#[test]
	fn backoff_doubles_and_jitters_within_bounds() {
		let base = Duration::from_millis(1000);
		let max = Duration::from_secs(30);

		for (attempt, expected_ms) in [(1u32, 1000u64), (2, 2000), (3, 4000), (4, 8000)] {
			let delay = backoff_with_jitter(base, attempt, max);
			assert!(delay >= Duration::from_millis(expected_ms), "attempt {attempt}: {delay:?}");
			assert!(
				delay <= Duration::from_millis(expected_ms + expected_ms * 3 / 10 + 1),
				"attempt {attempt}: {delay:?}"
			);
		}
	}

	#[test]
	fn backoff_is_capped() {
		let delay =
			backoff_with_jitter(Duration::from_millis(1000), 30, Duration::from_secs(30));
		assert!(delay <= Duration::from_secs(39));
	}
}
