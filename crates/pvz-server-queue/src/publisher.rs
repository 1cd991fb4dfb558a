// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// A message as retained by a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	pub topic: String,
	pub offset: u64,
	pub payload: Bytes,
	pub published_at: DateTime<Utc>,
}

impl Message {
	pub fn payload_utf8(&self) -> std::borrow::Cow<'_, str> {
		String::from_utf8_lossy(&self.payload)
	}
}

/// Producer side of a message queue.
#[async_trait::async_trait]
pub trait MessagePublisher: Send + Sync {
	fn name(&self) -> &str;

	async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;
}
