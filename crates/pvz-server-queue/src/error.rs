// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Error, Debug)]
pub enum QueueError {
	#[error("message queue unavailable: {0}")]
	Unavailable(String),

	#[error("message rejected with status {status}: {body}")]
	Rejected { status: u16, body: String },

	#[error("HTTP client error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("message queue closed")]
	Closed,
}

impl QueueError {
	/// Whether a later attempt with the same payload could succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			QueueError::Unavailable(_) | QueueError::Http(_) => true,
			QueueError::Rejected { status, .. } => *status == 429 || *status >= 500,
			QueueError::Closed => false,
		}
	}
}
