// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, instrument, warn};

use crate::error::{QueueError, Result};
use crate::publisher::MessagePublisher;

/// Publishes by POSTing the raw payload to `<base_url>/topics/<topic>`.
pub struct HttpPublisher {
	client: Client,
	base_url: String,
}

impl HttpPublisher {
	pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
		let client = Client::builder().timeout(timeout).build()?;
		Ok(Self::with_client(client, base_url))
	}

	pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
		let base_url = base_url.into().trim_end_matches('/').to_string();
		Self { client, base_url }
	}

	pub fn topic_url(&self, topic: &str) -> String {
		format!("{}/topics/{}", self.base_url, topic)
	}
}

#[async_trait]
impl MessagePublisher for HttpPublisher {
	fn name(&self) -> &str {
		"http"
	}

	#[instrument(skip(self, payload), fields(bytes = payload.len()))]
	async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
		let url = self.topic_url(topic);

		let response = self
			.client
			.post(&url)
			.header(CONTENT_TYPE, "application/octet-stream")
			.body(payload)
			.send()
			.await
			.map_err(|e| QueueError::Unavailable(format!("POST {url} failed: {e}")))?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			warn!(%url, status = status.as_u16(), "publish rejected by broker");
			return Err(QueueError::Rejected {
				status: status.as_u16(),
				body,
			});
		}

		debug!(%url, "message published");
		Ok(())
	}
}
