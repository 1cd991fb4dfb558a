// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::QueueError;
use crate::memory::Subscription;

/// Log every message delivered on `subscription` until `cancel` fires or
/// the broker closes. Returns the number of messages consumed.
pub async fn run_logging_consumer(
	mut subscription: Subscription,
	group: String,
	cancel: CancellationToken,
) -> u64 {
	let mut consumed = 0u64;
	info!(topic = subscription.topic(), %group, "audit consumer started");

	loop {
		tokio::select! {
			biased;

			_ = cancel.cancelled() => break,

			received = subscription.recv() => match received {
				Ok(message) => {
					consumed += 1;
					info!(
						%group,
						topic = %message.topic,
						offset = message.offset,
						payload = %message.payload_utf8(),
						"consumed audit message"
					);
				}
				Err(QueueError::Closed) => break,
				Err(e) => {
					warn!(%group, error = %e, "audit consumer receive failed");
					break;
				}
			},
		}
	}

	info!(topic = subscription.topic(), %group, consumed, "audit consumer stopped");
	consumed
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::{InMemoryBroker, StartFrom};
	use bytes::Bytes;
	use std::time::Duration;

	#[tokio::test]
	async fn test_consumer_reads_until_cancelled() {
		let broker = InMemoryBroker::new();
		broker.append("audit-tasks", Bytes::from_static(b"one")).unwrap();
		broker.append("audit-tasks", Bytes::from_static(b"two")).unwrap();

		let subscription = broker.subscribe("audit-tasks", "audit-group", StartFrom::Committed);
		let cancel = CancellationToken::new();
		let handle = tokio::spawn(run_logging_consumer(
			subscription,
			"audit-group".to_string(),
			cancel.clone(),
		));

		for _ in 0..100 {
			if broker.committed_offset("audit-tasks", "audit-group") == Some(2) {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}

		cancel.cancel();
		let consumed = handle.await.unwrap();
		assert_eq!(consumed, 2);
	}

	#[tokio::test]
	async fn test_consumer_stops_when_broker_closes() {
		let broker = InMemoryBroker::new();
		let subscription = broker.subscribe("audit-tasks", "audit-group", StartFrom::Latest);
		let handle = tokio::spawn(run_logging_consumer(
			subscription,
			"audit-group".to_string(),
			CancellationToken::new(),
		));

		broker.append("audit-tasks", Bytes::from_static(b"only")).unwrap();
		broker.close();

		let consumed = tokio::time::timeout(Duration::from_secs(5), handle)
			.await
			.expect("consumer should stop")
			.unwrap();
		assert_eq!(consumed, 1);
	}
}
