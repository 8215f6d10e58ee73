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

//! Static token directory: mint address to symbol, decimals and an estimated
//! reference price. Kept behind [`TokenLookup`] so a database-backed
//! directory can replace the table without touching the parser.

use std::collections::HashMap;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenInfo {
	pub symbol: &'static str,
	pub decimals: u32,
	/// Estimated USD price of one whole unit. Stablecoins are assumed 1:1.
	pub estimated_price: f64,
	pub stablecoin: bool,
}

pub trait TokenLookup {
	fn lookup(&self, address: &str) -> Option<&TokenInfo>;

	/// USD estimate for a raw atomic amount of the given mint, when known.
	fn estimate_usd(&self, address: &str, raw_amount: u128) -> Option<f64> {
		let info = self.lookup(address)?;
		let whole = raw_amount as f64 / 10f64.powi(info.decimals as i32);
		let price = if info.stablecoin { 1.0 } else { info.estimated_price };
		Some(whole * price)
	}
}

#[derive(Debug, Clone)]
pub struct TokenDirectory {
	tokens: HashMap<&'static str, TokenInfo>,
}

impl TokenDirectory {
	pub fn mainnet() -> Self {
		let mut tokens = HashMap::new();
		for (address, symbol, decimals, estimated_price, stablecoin) in [
			("So11111111111111111111111111111111111111112", "SOL", 9, 150.0, false),
			("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", "USDC", 6, 1.0, true),
			("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", "USDT", 6, 1.0, true),
			("7vfCXTUXx5WJV5JADk17DUJ4ksgau7utNKj4b963voxs", "WETH", 8, 2500.0, false),
			("3NZ9JMVBmGAqocybic2c7LQCJScmgsAZ6vQqTDzcqmJh", "WBTC", 8, 60000.0, false),
			("mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So", "MSOL", 9, 170.0, false),
			("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", "BONK", 5, 0.00002, false),
			("JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN", "JUP", 6, 0.8, false),
		] {
			tokens.insert(address, TokenInfo { symbol, decimals, estimated_price, stablecoin });
		}
		Self { tokens }
	}
}

impl TokenLookup for TokenDirectory {
	fn lookup(&self, address: &str) -> Option<&TokenInfo> {
		self.tokens.get(address)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn looks_up_known_mints() {
		let directory = TokenDirectory::mainnet();
		let usdc = directory.lookup("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap();
		assert_eq!(usdc.symbol, "USDC");
		assert_eq!(usdc.decimals, 6);
		assert!(usdc.stablecoin);

		assert!(directory.lookup("unknown-mint").is_none());
	}

	#[test]
	fn stablecoins_estimate_one_to_one() {
		let directory = TokenDirectory::mainnet();
		// 12.5 USDT at 6 decimals.
		let usd = directory
			.estimate_usd("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", 12_500_000)
			.unwrap();
		assert!((usd - 12.5).abs() < f64::EPSILON);
	}

	#[test]
	fn unknown_mint_estimates_nothing() {
		let directory = TokenDirectory::mainnet();
		assert_eq!(directory.estimate_usd("unknown-mint", 1_000_000), None);
	}
}
