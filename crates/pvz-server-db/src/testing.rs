// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// In-memory pool pinned to one connection; every `:memory:` connection is
/// its own database.
pub async fn create_test_pool() -> SqlitePool {
	SqlitePoolOptions::new()
		.max_connections(1)
		.connect("sqlite::memory:")
		.await
		.unwrap()
}

pub async fn create_outbox_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	crate::pool::run_migrations(&pool).await.unwrap();
	pool
}
