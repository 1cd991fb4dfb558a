// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use pvz_server_db::{DbError, NewTask, TaskStore};

use crate::error::AuditSinkError;
use crate::record::AuditRecord;
use crate::sink::AuditSink;

/// Persists every record of a batch as one outbox task, in a single INSERT.
pub struct DatabaseSink {
	store: Arc<dyn TaskStore>,
	name: String,
}

impl DatabaseSink {
	pub fn new(store: Arc<dyn TaskStore>) -> Self {
		Self {
			store,
			name: "database".to_string(),
		}
	}
}

fn to_sink_error(e: DbError) -> AuditSinkError {
	if e.is_transient() {
		AuditSinkError::Transient(format!("database error: {e}"))
	} else {
		AuditSinkError::Permanent(format!("database error: {e}"))
	}
}

#[async_trait]
impl AuditSink for DatabaseSink {
	fn name(&self) -> &str {
		&self.name
	}

	async fn process(&self, batch: &[Arc<AuditRecord>]) -> Result<(), AuditSinkError> {
		if batch.is_empty() {
			return Ok(());
		}

		let tasks = batch
			.iter()
			.map(|record| {
				let payload = serde_json::to_vec(record.as_ref()).map_err(|e| {
					AuditSinkError::Permanent(format!("failed to serialize audit record: {e}"))
				})?;
				Ok(NewTask {
					payload,
					created_at: record.timestamp,
				})
			})
			.collect::<Result<Vec<_>, AuditSinkError>>()?;

		let inserted = self.store.create_tasks(&tasks).await.map_err(to_sink_error)?;
		tracing::debug!(sink = %self.name, inserted, "audit batch persisted to outbox");
		Ok(())
	}

	async fn health_check(&self) -> Result<(), AuditSinkError> {
		self
			.store
			.count_by_status()
			.await
			.map(|_| ())
			.map_err(|e| AuditSinkError::Transient(format!("health check failed: {e}")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pvz_server_db::testing::{create_outbox_test_pool, create_test_pool};
	use pvz_server_db::{TaskRepository, TaskStatus};

	async fn make_repo() -> TaskRepository {
		TaskRepository::new(create_outbox_test_pool().await)
	}

	fn record(order_id: &str) -> Arc<AuditRecord> {
		Arc::new(
			AuditRecord::builder("/orders/accept")
				.order_id(order_id)
				.states("", "accepted")
				.message("order accepted")
				.build(),
		)
	}

	#[tokio::test]
	async fn test_batch_becomes_one_task_per_record() {
		let repo = make_repo().await;
		let sink = DatabaseSink::new(Arc::new(repo.clone()));

		let batch = vec![record("1"), record("2"), record("3")];
		sink.process(&batch).await.unwrap();

		let pending = repo.get_pending_tasks(10, 3).await.unwrap();
		assert_eq!(pending.len(), 3);
		for (task, expected) in pending.iter().zip(&batch) {
			assert_eq!(task.status, TaskStatus::Created);
			assert_eq!(task.attempt_count, 0);
			let decoded: AuditRecord = serde_json::from_slice(&task.payload).unwrap();
			assert_eq!(&decoded, expected.as_ref());
		}
	}

	#[tokio::test]
	async fn test_empty_batch_is_noop() {
		let repo = make_repo().await;
		let sink = DatabaseSink::new(Arc::new(repo.clone()));

		sink.process(&[]).await.unwrap();
		assert_eq!(repo.count_by_status().await.unwrap().total(), 0);
	}

	#[tokio::test]
	async fn test_missing_table_fails_whole_batch() {
		let sink = DatabaseSink::new(Arc::new(TaskRepository::new(create_test_pool().await)));

		let err = sink.process(&[record("1")]).await.unwrap_err();
		assert!(matches!(err, AuditSinkError::Permanent(_)));
		assert!(sink.health_check().await.is_err());
	}

	#[tokio::test]
	async fn test_health_check_ok() {
		let sink = DatabaseSink::new(Arc::new(make_repo().await));
		assert!(sink.health_check().await.is_ok());
	}
}
