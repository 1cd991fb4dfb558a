// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbox retry processor configuration section.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_BATCH_LIMIT: u32 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
const DEFAULT_TOPIC: &str = "audit-tasks";

/// How the retry processor takes ownership of due tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimMode {
	/// Select due tasks, then mark each one PROCESSING. Assumes a single processor.
	#[default]
	PollThenMark,
	/// Select and mark in one statement so concurrent processors never share a task.
	Atomic,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutboxConfigLayer {
	pub enabled: Option<bool>,
	pub poll_interval_ms: Option<u64>,
	pub batch_limit: Option<u32>,
	pub max_attempts: Option<u32>,
	pub retry_delay_ms: Option<u64>,
	pub topic: Option<String>,
	pub claim_mode: Option<ClaimMode>,
}

impl OutboxConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.poll_interval_ms.is_some() {
			self.poll_interval_ms = other.poll_interval_ms;
		}
		if other.batch_limit.is_some() {
			self.batch_limit = other.batch_limit;
		}
		if other.max_attempts.is_some() {
			self.max_attempts = other.max_attempts;
		}
		if other.retry_delay_ms.is_some() {
			self.retry_delay_ms = other.retry_delay_ms;
		}
		if other.topic.is_some() {
			self.topic = other.topic;
		}
		if other.claim_mode.is_some() {
			self.claim_mode = other.claim_mode;
		}
	}

	pub fn finalize(self) -> OutboxConfig {
		OutboxConfig {
			enabled: self.enabled.unwrap_or(true),
			poll_interval_ms: self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
			batch_limit: self.batch_limit.unwrap_or(DEFAULT_BATCH_LIMIT),
			max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
			retry_delay_ms: self.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
			topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
			claim_mode: self.claim_mode.unwrap_or_default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxConfig {
	pub enabled: bool,
	pub poll_interval_ms: u64,
	pub batch_limit: u32,
	pub max_attempts: u32,
	pub retry_delay_ms: u64,
	pub topic: String,
	pub claim_mode: ClaimMode,
}

impl OutboxConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}
}

impl Default for OutboxConfig {
	fn default() -> Self {
		OutboxConfigLayer::default().finalize()
	}
}
