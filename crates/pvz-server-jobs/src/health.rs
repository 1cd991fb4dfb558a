// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use pvz_server_db::TaskStatusCounts;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
	Healthy,
	Degraded,
	Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboxHealth {
	pub status: HealthState,
	pub counts: TaskStatusCounts,
}

impl OutboxHealth {
	/// Any abandoned task makes the outbox unhealthy, since those rows need an
	/// operator. Tasks waiting on a retry only degrade it.
	pub fn from_counts(counts: TaskStatusCounts) -> Self {
		let status = if counts.no_attempts_left > 0 {
			HealthState::Unhealthy
		} else if counts.failed > 0 {
			HealthState::Degraded
		} else {
			HealthState::Healthy
		};
		Self { status, counts }
	}
}
