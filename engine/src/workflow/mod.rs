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

//! Durable collection workflows: one child collector per
//! `(program, event type)` under a parent orchestrator. All side effects go
//! through activities; resumability rests on the checkpoint table, so a
//! crashed or cancelled run picks up exactly where the last stored batch
//! left off.

pub mod collector;
pub mod orchestrator;
pub mod state;
#[cfg(test)]
mod tests;

pub use collector::{run_collector, CollectorConfig, CollectorRun};
pub use orchestrator::{start_collection, CollectionHandle, CollectionRegistry};
pub use state::{CollectorState, CollectorStatus};
