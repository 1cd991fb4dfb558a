// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbox retry processor.
//!
//! On every poll tick the processor fetches due tasks oldest first and, one
//! task at a time, marks it PROCESSING, publishes its payload and then either
//! deletes the row or records the failed attempt. A task that runs out of
//! attempts is left as NO_ATTEMPTS_LEFT for an operator to inspect.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use pvz_server_config::{ClaimMode, OutboxConfig};
use pvz_server_db::{Task, TaskStatus, TaskStore};
use pvz_server_queue::MessagePublisher;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::health::{HealthState, OutboxHealth};

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryCycleSummary {
	pub fetched: usize,
	pub published: usize,
	pub retrying: usize,
	pub abandoned: usize,
	pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
	Published,
	Retrying,
	Abandoned,
	Error,
}

impl RetryCycleSummary {
	fn record(&mut self, outcome: TaskOutcome) {
		match outcome {
			TaskOutcome::Published => self.published += 1,
			TaskOutcome::Retrying => self.retrying += 1,
			TaskOutcome::Abandoned => self.abandoned += 1,
			TaskOutcome::Error => self.errors += 1,
		}
	}
}

pub struct TaskRetryProcessor {
	store: Arc<dyn TaskStore>,
	publisher: Arc<dyn MessagePublisher>,
	topic: String,
	poll_interval: Duration,
	batch_limit: u32,
	max_attempts: u32,
	retry_delay: chrono::Duration,
	claim_mode: ClaimMode,
}

impl TaskRetryProcessor {
	pub fn new(
		store: Arc<dyn TaskStore>,
		publisher: Arc<dyn MessagePublisher>,
		config: &OutboxConfig,
	) -> Self {
		let retry_delay = chrono::Duration::from_std(config.retry_delay())
			.unwrap_or_else(|_| chrono::Duration::days(365));

		Self {
			store,
			publisher,
			topic: config.topic.clone(),
			poll_interval: config.poll_interval().max(Duration::from_millis(1)),
			batch_limit: config.batch_limit,
			max_attempts: config.max_attempts.max(1),
			retry_delay,
			claim_mode: config.claim_mode,
		}
	}

	pub fn topic(&self) -> &str {
		&self.topic
	}

	/// Poll until `cancel` fires. A cycle that has started always finishes the
	/// publish in flight; cancellation only prevents new tasks from starting.
	#[instrument(skip_all, fields(topic = %self.topic))]
	pub async fn run(&self, cancel: CancellationToken) {
		let mut ticker = tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		info!(
			poll_interval_ms = self.poll_interval.as_millis() as u64,
			max_attempts = self.max_attempts,
			publisher = self.publisher.name(),
			"task retry processor started"
		);

		loop {
			tokio::select! {
				biased;

				_ = cancel.cancelled() => break,

				_ = ticker.tick() => {
					match self.process_pending_tasks(&cancel).await {
						Ok(summary) if summary.fetched > 0 => {
							info!(
								fetched = summary.fetched,
								published = summary.published,
								retrying = summary.retrying,
								abandoned = summary.abandoned,
								errors = summary.errors,
								"retry cycle completed"
							);
							self.log_health().await;
						}
						Ok(_) => {}
						Err(e) => warn!(error = %e, "failed to poll outbox"),
					}
				}
			}
		}

		info!("task retry processor stopped");
	}

	/// Run one poll cycle.
	pub async fn process_pending_tasks(
		&self,
		cancel: &CancellationToken,
	) -> Result<RetryCycleSummary> {
		let mut summary = RetryCycleSummary::default();
		if cancel.is_cancelled() {
			return Ok(summary);
		}

		let tasks = match self.claim_mode {
			ClaimMode::PollThenMark => {
				self
					.store
					.get_pending_tasks(self.batch_limit, self.max_attempts)
					.await?
			}
			ClaimMode::Atomic => {
				self
					.store
					.claim_pending_tasks(self.batch_limit, self.max_attempts)
					.await?
			}
		};
		summary.fetched = tasks.len();

		for task in tasks {
			// Claimed tasks are already PROCESSING and must be settled here.
			if self.claim_mode == ClaimMode::PollThenMark && cancel.is_cancelled() {
				debug!(remaining = summary.fetched - summary_total(&summary), "cancelled mid-cycle");
				break;
			}
			let outcome = self.process_task(task).await;
			summary.record(outcome);
		}

		Ok(summary)
	}

	/// Every publish failure costs one attempt, including a non-retryable
	/// `Rejected`; `is_retryable` only shapes the log line.
	async fn process_task(&self, task: Task) -> TaskOutcome {
		let id = task.id;

		if self.claim_mode == ClaimMode::PollThenMark {
			if let Err(e) = self.store.mark_task_processing(id).await {
				warn!(task_id = id, error = %e, "failed to mark task processing");
				return TaskOutcome::Error;
			}
		}

		let payload = Bytes::from(task.payload);
		match self.publisher.publish(&self.topic, payload).await {
			Ok(()) => match self.store.delete_task(id).await {
				Ok(()) => {
					debug!(task_id = id, attempts = task.attempt_count + 1, "task published");
					TaskOutcome::Published
				}
				Err(e) => {
					error!(task_id = id, error = %e, "task published but could not be deleted");
					TaskOutcome::Error
				}
			},
			Err(publish_err) => {
				let attempt_count = task.attempt_count + 1;
				let status = if attempt_count >= self.max_attempts {
					TaskStatus::NoAttemptsLeft
				} else {
					TaskStatus::Failed
				};
				let next_attempt_at = Utc::now() + self.retry_delay;

				if let Err(e) = self
					.store
					.update_task_failure(id, attempt_count, status, Some(next_attempt_at))
					.await
				{
					error!(task_id = id, error = %e, "failed to record publish failure");
					return TaskOutcome::Error;
				}

				if status == TaskStatus::NoAttemptsLeft {
					warn!(
						task_id = id,
						attempt_count,
						error = %publish_err,
						"task abandoned after exhausting attempts"
					);
					TaskOutcome::Abandoned
				} else {
					info!(
						task_id = id,
						attempt_count,
						retryable = publish_err.is_retryable(),
						next_attempt_at = %next_attempt_at,
						error = %publish_err,
						"task publish failed, will retry"
					);
					TaskOutcome::Retrying
				}
			}
		}
	}

	pub async fn health(&self) -> Result<OutboxHealth> {
		let counts = self.store.count_by_status().await?;
		Ok(OutboxHealth::from_counts(counts))
	}

	async fn log_health(&self) {
		match self.health().await {
			Ok(health) => {
				let counts = health.counts;
				match health.status {
					HealthState::Healthy => debug!(pending = counts.created, "outbox healthy"),
					HealthState::Degraded => info!(
						failed = counts.failed,
						pending = counts.created,
						"outbox degraded"
					),
					HealthState::Unhealthy => warn!(
						abandoned = counts.no_attempts_left,
						failed = counts.failed,
						"outbox has abandoned tasks"
					),
				}
			}
			Err(e) => warn!(error = %e, "failed to compute outbox health"),
		}
	}
}

fn summary_total(summary: &RetryCycleSummary) -> usize {
	summary.published + summary.retrying + summary.abandoned + summary.errors
}
