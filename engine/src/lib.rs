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

pub mod activities;
pub mod constants;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod parser;
pub mod push;
pub mod rpc_utils;
pub mod settings;
pub mod sol;
pub mod store;
pub mod tokens;
pub mod workflow;
