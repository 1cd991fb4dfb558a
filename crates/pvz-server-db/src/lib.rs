// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # pvz-server-db
//!
//! Persistence for the audit outbox using SQLite via sqlx.
//!
//! The crate follows the repository pattern: [`TaskStore`] is the interface
//! consumed by the retry processor and the database audit sink, and
//! [`TaskRepository`] is the concrete implementation holding a `SqlitePool`.
//!
//! | Variant | When to use |
//! |---------|-------------|
//! | `NotFound` | Update/delete by ID on a row that does not exist |
//! | `Conflict` | Operation not allowed in the row's current state |
//! | `Sqlx` | Unexpected database errors, propagated via `?` |
//! | `Internal` | Invalid stored data or invalid arguments |

pub mod error;
pub mod pool;
pub mod task;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{is_transient_sqlx_error, DbError, Result};
pub use pool::{create_pool, run_migrations};
pub use task::{
	NewTask, Task, TaskRepository, TaskStatus, TaskStatusCounts, TaskStore, MAX_TASKS_PER_INSERT,
};
