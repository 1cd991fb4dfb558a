// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit pipeline configuration section.
//!
//! Each sink gets its own worker with its own bounded queue, so batching is
//! configured per sink rather than globally.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_BATCH_SIZE: usize = 5;
const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 2000;
const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueOverflowPolicy {
	/// Drop the record being logged and count the drop.
	#[default]
	DropNewest,
	/// Hand the send to a spawned task so the caller returns immediately.
	Block,
}

/// Size-or-timeout batching parameters for one sink worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
	pub batch_size: usize,
	pub flush_timeout_ms: u64,
	pub queue_capacity: usize,
}

impl BatchConfig {
	pub fn flush_timeout(&self) -> Duration {
		Duration::from_millis(self.flush_timeout_ms)
	}
}

impl Default for BatchConfig {
	fn default() -> Self {
		Self {
			batch_size: DEFAULT_BATCH_SIZE,
			flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StdoutSinkConfigLayer {
	pub enabled: Option<bool>,
	pub filter: Option<String>,
	pub batch_size: Option<usize>,
	pub flush_timeout_ms: Option<u64>,
	pub queue_capacity: Option<usize>,
}

impl StdoutSinkConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.filter.is_some() {
			self.filter = other.filter;
		}
		if other.batch_size.is_some() {
			self.batch_size = other.batch_size;
		}
		if other.flush_timeout_ms.is_some() {
			self.flush_timeout_ms = other.flush_timeout_ms;
		}
		if other.queue_capacity.is_some() {
			self.queue_capacity = other.queue_capacity;
		}
	}

	pub fn finalize(self) -> StdoutSinkConfig {
		StdoutSinkConfig {
			enabled: self.enabled.unwrap_or(true),
			filter: self.filter.filter(|f| !f.trim().is_empty()),
			batch: finalize_batch(self.batch_size, self.flush_timeout_ms, self.queue_capacity),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StdoutSinkConfig {
	pub enabled: bool,
	/// Case-insensitive substring matched against the record message.
	pub filter: Option<String>,
	pub batch: BatchConfig,
}

impl Default for StdoutSinkConfig {
	fn default() -> Self {
		StdoutSinkConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSinkConfigLayer {
	pub enabled: Option<bool>,
	pub batch_size: Option<usize>,
	pub flush_timeout_ms: Option<u64>,
	pub queue_capacity: Option<usize>,
}

impl DatabaseSinkConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.batch_size.is_some() {
			self.batch_size = other.batch_size;
		}
		if other.flush_timeout_ms.is_some() {
			self.flush_timeout_ms = other.flush_timeout_ms;
		}
		if other.queue_capacity.is_some() {
			self.queue_capacity = other.queue_capacity;
		}
	}

	pub fn finalize(self) -> DatabaseSinkConfig {
		DatabaseSinkConfig {
			enabled: self.enabled.unwrap_or(true),
			batch: finalize_batch(self.batch_size, self.flush_timeout_ms, self.queue_capacity),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSinkConfig {
	pub enabled: bool,
	pub batch: BatchConfig,
}

impl Default for DatabaseSinkConfig {
	fn default() -> Self {
		DatabaseSinkConfigLayer::default().finalize()
	}
}

fn finalize_batch(
	batch_size: Option<usize>,
	flush_timeout_ms: Option<u64>,
	queue_capacity: Option<usize>,
) -> BatchConfig {
	BatchConfig {
		batch_size: batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
		flush_timeout_ms: flush_timeout_ms.unwrap_or(DEFAULT_FLUSH_TIMEOUT_MS),
		queue_capacity: queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditConfigLayer {
	pub enabled: Option<bool>,
	pub queue_overflow_policy: Option<QueueOverflowPolicy>,
	pub stdout: Option<StdoutSinkConfigLayer>,
	pub database: Option<DatabaseSinkConfigLayer>,
}

impl AuditConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.queue_overflow_policy.is_some() {
			self.queue_overflow_policy = other.queue_overflow_policy;
		}
		match (self.stdout.as_mut(), other.stdout) {
			(Some(base), Some(layer)) => base.merge(layer),
			(None, Some(layer)) => self.stdout = Some(layer),
			_ => {}
		}
		match (self.database.as_mut(), other.database) {
			(Some(base), Some(layer)) => base.merge(layer),
			(None, Some(layer)) => self.database = Some(layer),
			_ => {}
		}
	}

	pub fn finalize(self) -> AuditConfig {
		AuditConfig {
			enabled: self.enabled.unwrap_or(true),
			queue_overflow_policy: self.queue_overflow_policy.unwrap_or_default(),
			stdout: self.stdout.unwrap_or_default().finalize(),
			database: self.database.unwrap_or_default().finalize(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditConfig {
	pub enabled: bool,
	pub queue_overflow_policy: QueueOverflowPolicy,
	pub stdout: StdoutSinkConfig,
	pub database: DatabaseSinkConfig,
}

impl Default for AuditConfig {
	fn default() -> Self {
		AuditConfigLayer::default().finalize()
	}
}
