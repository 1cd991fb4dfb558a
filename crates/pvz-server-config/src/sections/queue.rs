// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Message queue configuration section.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_CONSUMER_GROUP: &str = "audit-group";
const DEFAULT_MEMORY_RETENTION: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
	/// In-process broker; each topic keeps its most recent messages.
	#[default]
	Memory,
	/// HTTP produce endpoint (`POST <url>/topics/<topic>`).
	Http,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueConfigLayer {
	pub backend: Option<QueueBackend>,
	pub http_url: Option<String>,
	pub timeout_ms: Option<u64>,
	pub consumer_enabled: Option<bool>,
	pub consumer_group: Option<String>,
	pub memory_retention: Option<usize>,
}

impl QueueConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.backend.is_some() {
			self.backend = other.backend;
		}
		if other.http_url.is_some() {
			self.http_url = other.http_url;
		}
		if other.timeout_ms.is_some() {
			self.timeout_ms = other.timeout_ms;
		}
		if other.consumer_enabled.is_some() {
			self.consumer_enabled = other.consumer_enabled;
		}
		if other.consumer_group.is_some() {
			self.consumer_group = other.consumer_group;
		}
		if other.memory_retention.is_some() {
			self.memory_retention = other.memory_retention;
		}
	}

	pub fn finalize(self) -> QueueConfig {
		QueueConfig {
			backend: self.backend.unwrap_or_default(),
			http_url: self.http_url,
			timeout_ms: self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
			consumer_enabled: self.consumer_enabled.unwrap_or(true),
			consumer_group: self
				.consumer_group
				.unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
			memory_retention: self.memory_retention.unwrap_or(DEFAULT_MEMORY_RETENTION),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
	pub backend: QueueBackend,
	pub http_url: Option<String>,
	pub timeout_ms: u64,
	pub consumer_enabled: bool,
	pub consumer_group: String,
	/// Messages kept per topic by the in-memory broker.
	pub memory_retention: usize,
}

impl QueueConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}
}

impl Default for QueueConfig {
	fn default() -> Self {
		QueueConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = QueueConfig::default();
		assert_eq!(config.backend, QueueBackend::Memory);
		assert!(config.http_url.is_none());
		assert_eq!(config.timeout(), Duration::from_secs(5));
		assert_eq!(config.consumer_group, "audit-group");
		assert_eq!(config.memory_retention, 10_000);
	}

	#[test]
	fn test_http_backend_toml() {
		let toml_str = r#"
			backend = "http"
			http_url = "http://broker.internal:8082"
		"#;
		let config = toml::from_str::<QueueConfigLayer>(toml_str)
			.unwrap()
			.finalize();
		assert_eq!(config.backend, QueueBackend::Http);
		assert_eq!(
			config.http_url.as_deref(),
			Some("http://broker.internal:8082")
		);
	}
}
