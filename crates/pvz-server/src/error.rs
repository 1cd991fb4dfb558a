// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
	#[error("configuration error: {0}")]
	Config(#[from] pvz_server_config::ConfigError),

	#[error("database error: {0}")]
	Database(#[from] pvz_server_db::DbError),

	#[error("audit error: {0}")]
	Audit(#[from] pvz_server_audit::AuditError),

	#[error("queue error: {0}")]
	Queue(#[from] pvz_server_queue::QueueError),

	#[error("setup error: {0}")]
	Setup(String),
}
