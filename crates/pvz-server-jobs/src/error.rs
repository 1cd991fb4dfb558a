// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use pvz_server_db::DbError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, JobError>;

/// Failures that abort a whole poll cycle. Per-task publish and bookkeeping
/// errors are counted in the cycle summary instead.
#[derive(Error, Debug)]
pub enum JobError {
	#[error("outbox error: {0}")]
	Outbox(#[from] DbError),
}
