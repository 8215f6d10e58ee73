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

use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentConfig {
	pub commitment: CommitmentLevel,
}

impl CommitmentConfig {
	pub fn processed() -> Self {
		Self { commitment: CommitmentLevel::Processed }
	}

	pub fn confirmed() -> Self {
		Self { commitment: CommitmentLevel::Confirmed }
	}

	pub fn finalized() -> Self {
		Self { commitment: CommitmentLevel::Finalized }
	}
}

#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CommitmentLevel {
	Processed,
	#[default]
	Confirmed,
	Finalized,
}

impl FromStr for CommitmentLevel {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"processed" => Ok(Self::Processed),
			"confirmed" => Ok(Self::Confirmed),
			"finalized" => Ok(Self::Finalized),
			invalid => {
				Err(format!("Invalid value: {invalid}. Expected processed|confirmed|finalized"))
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serializes_lowercase() {
		assert_eq!(
			serde_json::to_string(&CommitmentConfig::confirmed()).unwrap(),
			r#"{"commitment":"confirmed"}"#
		);
		assert_eq!("finalized".parse::<CommitmentLevel>().unwrap(), CommitmentLevel::Finalized);
		assert!("latest".parse::<CommitmentLevel>().is_err());
	}
}
