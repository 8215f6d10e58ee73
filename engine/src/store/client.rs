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

//! Thin ClickHouse client over the HTTP interface: SQL text in, JSONEachRow
//! out. One pooled reqwest client per process.

use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::settings;

#[derive(Error, Debug)]
pub enum Error {
	#[error("Transport error: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("JSON decode error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("Database error (status {status}): {message}")]
	Server { status: u16, message: String },
}

#[derive(Clone)]
pub struct ClickhouseClient {
	// Internally the Client is Arc'd
	client: Client,
	url: String,
	database: String,
	user: String,
	password: String,
	async_insert: bool,
	wait_for_async_insert: bool,
}

impl ClickhouseClient {
	pub fn from_settings(database: &settings::Database) -> Result<Self, Error> {
		Ok(Self {
			client: Client::builder().build()?,
			url: database.url.clone(),
			database: database.database.clone(),
			user: database.user.clone(),
			password: database.password.clone(),
			async_insert: database.async_insert,
			wait_for_async_insert: database.wait_for_async_insert,
		})
	}

	pub fn database(&self) -> &str {
		&self.database
	}

	fn request(&self, params: &[(&str, &str)]) -> reqwest::RequestBuilder {
		self.client
			.post(&self.url)
			.header("X-ClickHouse-User", &self.user)
			.header("X-ClickHouse-Key", &self.password)
			.query(&[("database", self.database.as_str())])
			.query(params)
	}

	async fn check(response: reqwest::Response) -> Result<reqwest::Response, Error> {
		let status = response.status();
		if status.is_success() {
			Ok(response)
		} else {
			let message = response.text().await.unwrap_or_default();
			Err(Error::Server { status: status.as_u16(), message })
		}
	}

	/// Run a statement that returns no rows (DDL, etc). Executed against the
	/// server default database so it can create the target one.
	pub async fn execute(&self, query: &str) -> Result<(), Error> {
		let response = self
			.client
			.post(&self.url)
			.header("X-ClickHouse-User", &self.user)
			.header("X-ClickHouse-Key", &self.password)
			.body(query.to_string())
			.send()
			.await?;
		Self::check(response).await?;
		Ok(())
	}

	/// Run a statement that returns no rows against the configured database.
	pub async fn execute_in_database(&self, query: &str) -> Result<(), Error> {
		let response = self.request(&[]).body(query.to_string()).send().await?;
		Self::check(response).await?;
		Ok(())
	}

	/// Insert serialized rows with `FORMAT JSONEachRow`.
	pub async fn insert_rows<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<(), Error> {
		if rows.is_empty() {
			return Ok(());
		}

		let query = format!("INSERT INTO {table} FORMAT JSONEachRow");
		let body = rows
			.iter()
			.map(serde_json::to_string)
			.collect::<Result<Vec<_>, _>>()?
			.join("\n");

		let response = self
			.request(&[
				("query", query.as_str()),
				("async_insert", if self.async_insert { "1" } else { "0" }),
				("wait_for_async_insert", if self.wait_for_async_insert { "1" } else { "0" }),
				("input_format_json_read_numbers_from_strings", "1"),
			])
			.body(body)
			.send()
			.await?;
		Self::check(response).await?;
		Ok(())
	}

	/// Run a SELECT, deserializing each `JSONEachRow` line.
	pub async fn query_rows<T: DeserializeOwned>(&self, query: &str) -> Result<Vec<T>, Error> {
		let query = format!("{query} FORMAT JSONEachRow");
		let response = self
			.request(&[("output_format_json_quote_64bit_integers", "0")])
			.body(query)
			.send()
			.await?;
		let body = Self::check(response).await?.text().await?;

		body.lines()
			.filter(|line| !line.trim().is_empty())
			.map(|line| serde_json::from_str(line).map_err(Error::from))
			.collect()
	}
}

/// Escape a value for inclusion in a single-quoted SQL string literal.
pub fn escape(value: &str) -> String {
	value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn escapes_quotes_and_backslashes() {
		assert_eq!(escape("plain"), "plain");
		assert_eq!(escape("o'brien"), "o\\'brien");
		assert_eq!(escape(r"a\b"), r"a\\b");
	}
}
