// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task outbox persistence.
//!
//! Each row is one audit payload awaiting delivery to the message queue.
//! Rows move CREATED -> PROCESSING and are then either deleted (published)
//! or parked as FAILED / NO_ATTEMPTS_LEFT with attempt bookkeeping.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microsecond precision,
//! `Z` suffix) so that lexical comparison in SQL matches chronological order.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
	Created,
	Processing,
	Failed,
	NoAttemptsLeft,
}

impl TaskStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			TaskStatus::Created => "CREATED",
			TaskStatus::Processing => "PROCESSING",
			TaskStatus::Failed => "FAILED",
			TaskStatus::NoAttemptsLeft => "NO_ATTEMPTS_LEFT",
		}
	}
}

impl std::fmt::Display for TaskStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for TaskStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"CREATED" => Ok(TaskStatus::Created),
			"PROCESSING" => Ok(TaskStatus::Processing),
			"FAILED" => Ok(TaskStatus::Failed),
			"NO_ATTEMPTS_LEFT" => Ok(TaskStatus::NoAttemptsLeft),
			_ => Err(format!("unknown task status: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
	pub id: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub finished_at: Option<DateTime<Utc>>,
	pub payload: Vec<u8>,
	pub status: TaskStatus,
	pub attempt_count: u32,
	pub next_attempt_at: Option<DateTime<Utc>>,
}

/// A row to be inserted by [`TaskRepository::create_tasks`].
#[derive(Debug, Clone)]
pub struct NewTask {
	pub payload: Vec<u8>,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStatusCounts {
	pub created: u64,
	pub processing: u64,
	pub failed: u64,
	pub no_attempts_left: u64,
}

impl TaskStatusCounts {
	pub fn total(&self) -> u64 {
		self.created + self.processing + self.failed + self.no_attempts_left
	}
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite's bind-parameter limit (`SQLITE_MAX_VARIABLE_NUMBER`, 3.32+).
const SQLITE_MAX_VARIABLES: usize = 32_766;
const BINDS_PER_NEW_TASK: usize = 5;

/// Rows per INSERT statement in [`TaskRepository::create_tasks`].
pub const MAX_TASKS_PER_INSERT: usize = SQLITE_MAX_VARIABLES / BINDS_PER_NEW_TASK;

const TASK_COLUMNS: &str =
	"id, created_at, updated_at, finished_at, payload, status, attempt_count, next_attempt_at";

const PENDING_FILTER: &str = "status IN ('CREATED', 'FAILED') \
	AND attempt_count < ? \
	AND (next_attempt_at IS NULL OR next_attempt_at <= ?)";

type TaskRow = (
	i64,
	DateTime<Utc>,
	DateTime<Utc>,
	Option<DateTime<Utc>>,
	Vec<u8>,
	String,
	i64,
	Option<DateTime<Utc>>,
);

fn task_from_row(row: TaskRow) -> Result<Task> {
	let (id, created_at, updated_at, finished_at, payload, status, attempt_count, next_attempt_at) =
		row;
	Ok(Task {
		id,
		created_at,
		updated_at,
		finished_at,
		payload,
		status: status.parse().map_err(|e: String| DbError::Internal(e))?,
		attempt_count: attempt_count as u32,
		next_attempt_at,
	})
}

#[async_trait]
pub trait TaskStore: Send + Sync {
	async fn create_task(&self, payload: &[u8]) -> Result<i64>;
	async fn create_tasks(&self, tasks: &[NewTask]) -> Result<u64>;
	async fn get_pending_tasks(&self, limit: u32, max_attempts: u32) -> Result<Vec<Task>>;
	async fn claim_pending_tasks(&self, limit: u32, max_attempts: u32) -> Result<Vec<Task>>;
	async fn mark_task_processing(&self, id: i64) -> Result<()>;
	async fn delete_task(&self, id: i64) -> Result<()>;
	async fn update_task_failure(
		&self,
		id: i64,
		attempt_count: u32,
		status: TaskStatus,
		next_attempt_at: Option<DateTime<Utc>>,
	) -> Result<()>;
	async fn count_by_status(&self) -> Result<TaskStatusCounts>;
}

#[derive(Clone)]
pub struct TaskRepository {
	pool: SqlitePool,
}

impl TaskRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert one CREATED task stamped with the current time.
	#[tracing::instrument(skip(self, payload), fields(payload_len = payload.len()))]
	pub async fn create_task(&self, payload: &[u8]) -> Result<i64> {
		let now = format_timestamp(Utc::now());
		let result = sqlx::query(
			r#"
			INSERT INTO tasks (created_at, updated_at, payload, status, attempt_count)
			VALUES (?, ?, ?, ?, 0)
			"#,
		)
		.bind(&now)
		.bind(&now)
		.bind(payload)
		.bind(TaskStatus::Created.as_str())
		.execute(&self.pool)
		.await?;

		Ok(result.last_insert_rowid())
	}

	/// Insert all tasks with multi-row INSERTs in one transaction.
	///
	/// A batch normally fits one statement; larger ones are split at
	/// [`MAX_TASKS_PER_INSERT`] rows so no statement exceeds SQLite's bind
	/// limit. Either every row lands or none does.
	///
	/// Each row keeps its own `created_at`, so pickup order follows the
	/// time the audited event happened rather than the time of the flush.
	#[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
	pub async fn create_tasks(&self, tasks: &[NewTask]) -> Result<u64> {
		if tasks.is_empty() {
			return Ok(0);
		}

		let mut tx = self.pool.begin().await?;
		let mut inserted = 0;

		for chunk in tasks.chunks(MAX_TASKS_PER_INSERT) {
			let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
				"INSERT INTO tasks (created_at, updated_at, payload, status, attempt_count) ",
			);
			builder.push_values(chunk, |mut row, task| {
				let created_at = format_timestamp(task.created_at);
				row
					.push_bind(created_at.clone())
					.push_bind(created_at)
					.push_bind(task.payload.clone())
					.push_bind(TaskStatus::Created.as_str())
					.push_bind(0_i64);
			});

			inserted += builder.build().execute(&mut *tx).await?.rows_affected();
		}

		tx.commit().await?;
		Ok(inserted)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_task(&self, id: i64) -> Result<Option<Task>> {
		let row = sqlx::query_as::<_, TaskRow>(&format!(
			"SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
		))
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(task_from_row).transpose()
	}

	/// Due tasks, oldest first.
	///
	/// A task is due when it is CREATED or FAILED, has attempts left and its
	/// `next_attempt_at` is unset or in the past. The retry delay is already
	/// folded into `next_attempt_at` by [`Self::update_task_failure`].
	#[tracing::instrument(skip(self))]
	pub async fn get_pending_tasks(&self, limit: u32, max_attempts: u32) -> Result<Vec<Task>> {
		let now = format_timestamp(Utc::now());
		let rows = sqlx::query_as::<_, TaskRow>(&format!(
			"SELECT {TASK_COLUMNS} FROM tasks WHERE {PENDING_FILTER} \
			 ORDER BY created_at ASC, id ASC LIMIT ?"
		))
		.bind(max_attempts as i64)
		.bind(&now)
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(task_from_row).collect()
	}

	/// Select due tasks and mark them PROCESSING in one statement.
	///
	/// Two processors calling this concurrently never receive the same task.
	#[tracing::instrument(skip(self))]
	pub async fn claim_pending_tasks(&self, limit: u32, max_attempts: u32) -> Result<Vec<Task>> {
		let now = format_timestamp(Utc::now());
		let rows = sqlx::query_as::<_, TaskRow>(&format!(
			"UPDATE tasks SET status = ?, updated_at = ? \
			 WHERE id IN ( \
			 	SELECT id FROM tasks WHERE {PENDING_FILTER} \
			 	ORDER BY created_at ASC, id ASC LIMIT ? \
			 ) \
			 RETURNING {TASK_COLUMNS}"
		))
		.bind(TaskStatus::Processing.as_str())
		.bind(&now)
		.bind(max_attempts as i64)
		.bind(&now)
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		let mut tasks = rows
			.into_iter()
			.map(task_from_row)
			.collect::<Result<Vec<_>>>()?;
		// RETURNING order is unspecified in SQLite.
		tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
		Ok(tasks)
	}

	#[tracing::instrument(skip(self))]
	pub async fn mark_task_processing(&self, id: i64) -> Result<()> {
		let now = format_timestamp(Utc::now());
		let result = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
			.bind(TaskStatus::Processing.as_str())
			.bind(&now)
			.bind(id)
			.execute(&self.pool)
			.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("task {id}")));
		}

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_task(&self, id: i64) -> Result<()> {
		let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("task {id}")));
		}

		Ok(())
	}

	/// Record a failed publish attempt.
	///
	/// `status` must be FAILED or NO_ATTEMPTS_LEFT. Abandoned tasks get
	/// `finished_at` stamped and keep their row for operator inspection.
	#[tracing::instrument(skip(self))]
	pub async fn update_task_failure(
		&self,
		id: i64,
		attempt_count: u32,
		status: TaskStatus,
		next_attempt_at: Option<DateTime<Utc>>,
	) -> Result<()> {
		if !matches!(status, TaskStatus::Failed | TaskStatus::NoAttemptsLeft) {
			return Err(DbError::Internal(format!(
				"{status} is not a failure status"
			)));
		}

		let now = Utc::now();
		let finished_at = (status == TaskStatus::NoAttemptsLeft).then(|| format_timestamp(now));

		let result = sqlx::query(
			r#"
			UPDATE tasks
			SET attempt_count = ?,
				status = ?,
				next_attempt_at = ?,
				finished_at = ?,
				updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(attempt_count as i64)
		.bind(status.as_str())
		.bind(next_attempt_at.map(format_timestamp))
		.bind(finished_at)
		.bind(format_timestamp(now))
		.bind(id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("task {id}")));
		}

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_abandoned(&self, limit: u32) -> Result<Vec<Task>> {
		let rows = sqlx::query_as::<_, TaskRow>(&format!(
			"SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? \
			 ORDER BY created_at ASC, id ASC LIMIT ?"
		))
		.bind(TaskStatus::NoAttemptsLeft.as_str())
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(task_from_row).collect()
	}

	/// Give an abandoned task a fresh attempt budget.
	#[tracing::instrument(skip(self))]
	pub async fn requeue_task(&self, id: i64) -> Result<()> {
		let now = format_timestamp(Utc::now());
		let result = sqlx::query(
			r#"
			UPDATE tasks
			SET status = ?,
				attempt_count = 0,
				next_attempt_at = NULL,
				finished_at = NULL,
				updated_at = ?
			WHERE id = ? AND status = ?
			"#,
		)
		.bind(TaskStatus::Created.as_str())
		.bind(&now)
		.bind(id)
		.bind(TaskStatus::NoAttemptsLeft.as_str())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return match self.get_task(id).await? {
				None => Err(DbError::NotFound(format!("task {id}"))),
				Some(task) => Err(DbError::Conflict(format!(
					"task {id} is {}, only {} tasks can be requeued",
					task.status,
					TaskStatus::NoAttemptsLeft
				))),
			};
		}

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn count_by_status(&self) -> Result<TaskStatusCounts> {
		let rows = sqlx::query_as::<_, (String, i64)>(
			"SELECT status, COUNT(*) FROM tasks GROUP BY status",
		)
		.fetch_all(&self.pool)
		.await?;

		let by_status: HashMap<TaskStatus, u64> = rows
			.into_iter()
			.map(|(status, count)| {
				let status: TaskStatus = status.parse().map_err(|e: String| DbError::Internal(e))?;
				Ok::<_, DbError>((status, count as u64))
			})
			.collect::<Result<_>>()?;

		let get = |status| by_status.get(&status).copied().unwrap_or(0);
		Ok(TaskStatusCounts {
			created: get(TaskStatus::Created),
			processing: get(TaskStatus::Processing),
			failed: get(TaskStatus::Failed),
			no_attempts_left: get(TaskStatus::NoAttemptsLeft),
		})
	}
}

#[async_trait]
impl TaskStore for TaskRepository {
	async fn create_task(&self, payload: &[u8]) -> Result<i64> {
		self.create_task(payload).await
	}

	async fn create_tasks(&self, tasks: &[NewTask]) -> Result<u64> {
		self.create_tasks(tasks).await
	}

	async fn get_pending_tasks(&self, limit: u32, max_attempts: u32) -> Result<Vec<Task>> {
		self.get_pending_tasks(limit, max_attempts).await
	}

	async fn claim_pending_tasks(&self, limit: u32, max_attempts: u32) -> Result<Vec<Task>> {
		self.claim_pending_tasks(limit, max_attempts).await
	}

	async fn mark_task_processing(&self, id: i64) -> Result<()> {
		self.mark_task_processing(id).await
	}

	async fn delete_task(&self, id: i64) -> Result<()> {
		self.delete_task(id).await
	}

	async fn update_task_failure(
		&self,
		id: i64,
		attempt_count: u32,
		status: TaskStatus,
		next_attempt_at: Option<DateTime<Utc>>,
	) -> Result<()> {
		self
			.update_task_failure(id, attempt_count, status, next_attempt_at)
			.await
	}

	async fn count_by_status(&self) -> Result<TaskStatusCounts> {
		self.count_by_status().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_outbox_test_pool;
	use chrono::Duration;

	async fn make_repo() -> TaskRepository {
		TaskRepository::new(create_outbox_test_pool().await)
	}

	fn new_task(payload: &str, created_at: DateTime<Utc>) -> NewTask {
		NewTask {
			payload: payload.as_bytes().to_vec(),
			created_at,
		}
	}

	#[test]
	fn test_status_roundtrip() {
		for status in [
			TaskStatus::Created,
			TaskStatus::Processing,
			TaskStatus::Failed,
			TaskStatus::NoAttemptsLeft,
		] {
			assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
		}
		assert!("DONE".parse::<TaskStatus>().is_err());
	}

	#[test]
	fn test_timestamp_format_sorts_lexically() {
		let base = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
			.unwrap()
			.with_timezone(&Utc);
		let later = base + Duration::milliseconds(5);
		assert!(format_timestamp(base) < format_timestamp(later));
		assert_eq!(format_timestamp(base), "2025-03-01T10:00:00.000000Z");
	}

	#[tokio::test]
	async fn test_create_task_defaults() {
		let repo = make_repo().await;
		let id = repo.create_task(b"{\"order_id\":\"42\"}").await.unwrap();

		let task = repo.get_task(id).await.unwrap().unwrap();
		assert_eq!(task.status, TaskStatus::Created);
		assert_eq!(task.attempt_count, 0);
		assert!(task.next_attempt_at.is_none());
		assert!(task.finished_at.is_none());
		assert_eq!(task.payload, b"{\"order_id\":\"42\"}");
	}

	#[tokio::test]
	async fn test_create_tasks_inserts_all_rows() {
		let repo = make_repo().await;
		let base = Utc::now() - Duration::minutes(1);
		let tasks = vec![
			new_task("a", base),
			new_task("b", base + Duration::seconds(1)),
			new_task("c", base + Duration::seconds(2)),
		];

		assert_eq!(repo.create_tasks(&tasks).await.unwrap(), 3);
		assert_eq!(repo.create_tasks(&[]).await.unwrap(), 0);

		let pending = repo.get_pending_tasks(10, 3).await.unwrap();
		let payloads: Vec<_> = pending.iter().map(|t| t.payload.clone()).collect();
		assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
		assert_eq!(
			format_timestamp(pending[0].created_at),
			format_timestamp(base)
		);
	}

	#[tokio::test]
	async fn test_create_tasks_splits_batches_over_bind_limit() {
		let repo = make_repo().await;
		let base = Utc::now() - Duration::minutes(5);
		let count = MAX_TASKS_PER_INSERT + 500;
		let tasks: Vec<NewTask> = (0..count)
			.map(|i| new_task(&format!("t{i}"), base + Duration::milliseconds(i as i64)))
			.collect();

		assert_eq!(repo.create_tasks(&tasks).await.unwrap(), count as u64);
		assert_eq!(repo.count_by_status().await.unwrap().created, count as u64);

		let oldest = repo.get_pending_tasks(1, 3).await.unwrap();
		assert_eq!(oldest[0].payload, b"t0".to_vec());
	}

	#[tokio::test]
	async fn test_pending_tasks_oldest_first_with_limit() {
		let repo = make_repo().await;
		let base = Utc::now() - Duration::minutes(5);
		repo
			.create_tasks(&[
				new_task("newest", base + Duration::seconds(30)),
				new_task("oldest", base),
				new_task("middle", base + Duration::seconds(10)),
			])
			.await
			.unwrap();

		let pending = repo.get_pending_tasks(2, 3).await.unwrap();
		assert_eq!(pending.len(), 2);
		assert_eq!(pending[0].payload, b"oldest");
		assert_eq!(pending[1].payload, b"middle");
	}

	#[tokio::test]
	async fn test_pending_excludes_processing_and_future_retries() {
		let repo = make_repo().await;
		let processing = repo.create_task(b"processing").await.unwrap();
		let later = repo.create_task(b"later").await.unwrap();
		let due = repo.create_task(b"due").await.unwrap();

		repo.mark_task_processing(processing).await.unwrap();
		repo
			.update_task_failure(
				later,
				1,
				TaskStatus::Failed,
				Some(Utc::now() + Duration::hours(1)),
			)
			.await
			.unwrap();
		repo
			.update_task_failure(
				due,
				1,
				TaskStatus::Failed,
				Some(Utc::now() - Duration::seconds(1)),
			)
			.await
			.unwrap();

		let pending = repo.get_pending_tasks(10, 3).await.unwrap();
		let ids: Vec<_> = pending.iter().map(|t| t.id).collect();
		assert_eq!(ids, vec![due]);
	}

	#[tokio::test]
	async fn test_pending_respects_max_attempts() {
		let repo = make_repo().await;
		let id = repo.create_task(b"x").await.unwrap();
		repo
			.update_task_failure(id, 2, TaskStatus::Failed, None)
			.await
			.unwrap();

		assert_eq!(repo.get_pending_tasks(10, 3).await.unwrap().len(), 1);
		assert!(repo.get_pending_tasks(10, 2).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_mark_processing_is_idempotent() {
		let repo = make_repo().await;
		let id = repo.create_task(b"x").await.unwrap();

		repo.mark_task_processing(id).await.unwrap();
		repo.mark_task_processing(id).await.unwrap();

		let task = repo.get_task(id).await.unwrap().unwrap();
		assert_eq!(task.status, TaskStatus::Processing);
		assert_eq!(task.attempt_count, 0);
	}

	#[tokio::test]
	async fn test_missing_task_is_not_found() {
		let repo = make_repo().await;
		assert!(matches!(
			repo.mark_task_processing(999).await,
			Err(DbError::NotFound(_))
		));
		assert!(matches!(
			repo.delete_task(999).await,
			Err(DbError::NotFound(_))
		));
		assert!(matches!(
			repo
				.update_task_failure(999, 1, TaskStatus::Failed, None)
				.await,
			Err(DbError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_update_failure_rejects_non_failure_status() {
		let repo = make_repo().await;
		let id = repo.create_task(b"x").await.unwrap();
		let err = repo
			.update_task_failure(id, 1, TaskStatus::Created, None)
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Internal(_)));
	}

	#[tokio::test]
	async fn test_exhausted_task_is_never_pending_again() {
		let repo = make_repo().await;
		let id = repo.create_task(b"x").await.unwrap();

		repo.mark_task_processing(id).await.unwrap();
		repo
			.update_task_failure(id, 3, TaskStatus::NoAttemptsLeft, None)
			.await
			.unwrap();

		let task = repo.get_task(id).await.unwrap().unwrap();
		assert_eq!(task.status, TaskStatus::NoAttemptsLeft);
		assert_eq!(task.attempt_count, 3);
		assert!(task.finished_at.is_some());
		assert!(repo.get_pending_tasks(10, 3).await.unwrap().is_empty());
		assert!(repo.get_pending_tasks(10, 10).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_fail_once_then_delete_leaves_no_row() {
		let repo = make_repo().await;
		let id = repo.create_task(b"x").await.unwrap();

		repo.mark_task_processing(id).await.unwrap();
		repo
			.update_task_failure(id, 1, TaskStatus::Failed, Some(Utc::now()))
			.await
			.unwrap();
		assert_eq!(
			repo.get_task(id).await.unwrap().unwrap().status,
			TaskStatus::Failed
		);

		repo.mark_task_processing(id).await.unwrap();
		repo.delete_task(id).await.unwrap();

		assert!(repo.get_task(id).await.unwrap().is_none());
		assert_eq!(repo.count_by_status().await.unwrap().total(), 0);
	}

	#[tokio::test]
	async fn test_claim_marks_processing_and_is_exclusive() {
		let repo = make_repo().await;
		let base = Utc::now() - Duration::minutes(1);
		repo
			.create_tasks(&[
				new_task("a", base),
				new_task("b", base + Duration::seconds(1)),
				new_task("c", base + Duration::seconds(2)),
			])
			.await
			.unwrap();

		let first = repo.claim_pending_tasks(2, 3).await.unwrap();
		assert_eq!(first.len(), 2);
		assert_eq!(first[0].payload, b"a");
		assert_eq!(first[1].payload, b"b");
		assert!(first.iter().all(|t| t.status == TaskStatus::Processing));

		let second = repo.claim_pending_tasks(2, 3).await.unwrap();
		assert_eq!(second.len(), 1);
		assert_eq!(second[0].payload, b"c");

		assert!(repo.claim_pending_tasks(2, 3).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_requeue_abandoned_task() {
		let repo = make_repo().await;
		let id = repo.create_task(b"x").await.unwrap();
		repo
			.update_task_failure(id, 3, TaskStatus::NoAttemptsLeft, None)
			.await
			.unwrap();

		let abandoned = repo.list_abandoned(10).await.unwrap();
		assert_eq!(abandoned.len(), 1);

		repo.requeue_task(id).await.unwrap();
		let task = repo.get_task(id).await.unwrap().unwrap();
		assert_eq!(task.status, TaskStatus::Created);
		assert_eq!(task.attempt_count, 0);
		assert!(task.finished_at.is_none());
		assert_eq!(repo.get_pending_tasks(10, 3).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_requeue_rejects_live_and_missing_tasks() {
		let repo = make_repo().await;
		let id = repo.create_task(b"x").await.unwrap();

		assert!(matches!(
			repo.requeue_task(id).await,
			Err(DbError::Conflict(_))
		));
		assert!(matches!(
			repo.requeue_task(id + 100).await,
			Err(DbError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_count_by_status() {
		let repo = make_repo().await;
		let a = repo.create_task(b"a").await.unwrap();
		let b = repo.create_task(b"b").await.unwrap();
		repo.create_task(b"c").await.unwrap();

		repo.mark_task_processing(a).await.unwrap();
		repo
			.update_task_failure(b, 3, TaskStatus::NoAttemptsLeft, None)
			.await
			.unwrap();

		let counts = repo.count_by_status().await.unwrap();
		assert_eq!(
			counts,
			TaskStatusCounts {
				created: 1,
				processing: 1,
				failed: 0,
				no_attempts_left: 1,
			}
		);
		assert_eq!(counts.total(), 3);
	}

	mod proptests {
		use super::*;
		use proptest::prelude::*;

		fn status_strategy() -> impl Strategy<Value = TaskStatus> {
			prop_oneof![
				Just(TaskStatus::Created),
				Just(TaskStatus::Processing),
				Just(TaskStatus::Failed),
				Just(TaskStatus::NoAttemptsLeft),
			]
		}

		proptest! {
			#![proptest_config(ProptestConfig::with_cases(48))]

			#[test]
			fn pending_visibility_matches_filter(
				status in status_strategy(),
				attempts in 0u32..6,
				max_attempts in 1u32..6,
				due_offset_secs in prop::option::of(-120i64..120),
			) {
				let rt = tokio::runtime::Runtime::new().unwrap();
				let visible = rt.block_on(async {
					let repo = make_repo().await;
					let id = repo.create_task(b"p").await.unwrap();
					let next_attempt_at =
						due_offset_secs.map(|s| Utc::now() + Duration::seconds(s));
					sqlx::query(
						"UPDATE tasks SET status = ?, attempt_count = ?, next_attempt_at = ? WHERE id = ?",
					)
					.bind(status.as_str())
					.bind(attempts as i64)
					.bind(next_attempt_at.map(format_timestamp))
					.bind(id)
					.execute(&repo.pool)
					.await
					.unwrap();
					!repo.get_pending_tasks(10, max_attempts).await.unwrap().is_empty()
				});

				let expected = matches!(status, TaskStatus::Created | TaskStatus::Failed)
					&& attempts < max_attempts
					&& due_offset_secs.map_or(true, |s| s <= 0);
				prop_assert_eq!(visible, expected);
			}
		}
	}
}
