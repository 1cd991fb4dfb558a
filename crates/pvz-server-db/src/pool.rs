// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a SqlitePool with WAL mode and common settings.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./pvz.db")
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid or connection fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(BUSY_TIMEOUT)
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// Run the outbox schema migrations.
///
/// Migrations are idempotent and safe to run on every startup.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	let m1 = include_str!("../migrations/001_create_tasks.sql");
	for stmt in m1
		.split(';')
		.map(strip_sql_comments)
		.filter(|s| !s.is_empty())
	{
		if let Err(e) = sqlx::query(&stmt).execute(pool).await {
			if !e.to_string().contains("already exists") {
				return Err(e.into());
			}
		}
	}

	tracing::debug!("database migrations applied");
	Ok(())
}

fn strip_sql_comments(stmt: &str) -> String {
	stmt
		.lines()
		.filter(|line| !line.trim_start().starts_with("--"))
		.collect::<Vec<_>>()
		.join("\n")
		.trim()
		.to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_migrations_are_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let url = format!("sqlite:{}", dir.path().join("outbox.db").display());
		let pool = create_pool(&url).await.unwrap();

		run_migrations(&pool).await.unwrap();
		run_migrations(&pool).await.unwrap();

		let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
			.fetch_one(&pool)
			.await
			.unwrap();
		assert_eq!(count, 0);
	}

	#[tokio::test]
	async fn test_invalid_url_is_internal_error() {
		let err = create_pool("sqlite::memory:?mode=bogus").await.unwrap_err();
		assert!(matches!(err, DbError::Internal(_)));
	}

	#[test]
	fn test_strip_sql_comments() {
		let stmt = "-- header\nCREATE TABLE t (id INTEGER)\n";
		assert_eq!(strip_sql_comments(stmt), "CREATE TABLE t (id INTEGER)");
	}
}
