// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process broker with per-topic retained logs.
//!
//! Each topic is an append-only log addressed by offset. Only the most recent
//! `retention` messages of a topic are kept; offsets keep counting up as old
//! messages are evicted. Subscriptions read
//! from a starting offset and park on a watch channel until the topic grows.
//! Consumer groups remember the offset after the last message they received,
//! so a new subscription with [`StartFrom::Committed`] resumes where the
//! previous one stopped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::error::{QueueError, Result};
use crate::publisher::{Message, MessagePublisher};

/// Messages kept per topic by [`InMemoryBroker::new`].
pub const DEFAULT_RETENTION: usize = 10_000;

/// Where a new subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
	Earliest,
	Latest,
	/// The group's committed offset, or the oldest retained message if it has
	/// none.
	Committed,
}

struct TopicLog {
	messages: VecDeque<Message>,
	/// Offset of `messages[0]`.
	base_offset: u64,
	/// Carries the offset the next append will get.
	len_tx: watch::Sender<u64>,
}

impl TopicLog {
	fn new() -> Self {
		let (len_tx, _) = watch::channel(0);
		Self {
			messages: VecDeque::new(),
			base_offset: 0,
			len_tx,
		}
	}

	fn end_offset(&self) -> u64 {
		self.base_offset + self.messages.len() as u64
	}

	fn get(&self, offset: u64) -> Option<&Message> {
		let index = offset.checked_sub(self.base_offset)?;
		self.messages.get(index as usize)
	}
}

#[derive(Default)]
struct BrokerState {
	topics: HashMap<String, TopicLog>,
	committed: HashMap<(String, String), u64>,
}

struct BrokerInner {
	state: Mutex<BrokerState>,
	retention: usize,
	available: AtomicBool,
	closed: AtomicBool,
}

impl BrokerInner {
	fn lock(&self) -> MutexGuard<'_, BrokerState> {
		// A panic while holding the lock cannot leave the log half-written,
		// so a poisoned guard is still usable.
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

#[derive(Clone)]
pub struct InMemoryBroker {
	inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
	fn default() -> Self {
		Self::new()
	}
}

impl InMemoryBroker {
	pub fn new() -> Self {
		Self::with_retention(DEFAULT_RETENTION)
	}

	/// A broker that keeps at most `retention` messages per topic. Zero is
	/// treated as one.
	pub fn with_retention(retention: usize) -> Self {
		Self {
			inner: Arc::new(BrokerInner {
				state: Mutex::new(BrokerState::default()),
				retention: retention.max(1),
				available: AtomicBool::new(true),
				closed: AtomicBool::new(false),
			}),
		}
	}

	/// Toggle availability. While unavailable every publish fails with
	/// [`QueueError::Unavailable`] and nothing is retained.
	pub fn set_available(&self, available: bool) {
		self.inner.available.store(available, Ordering::SeqCst);
		info!(available, "in-memory broker availability changed");
	}

	pub fn is_available(&self) -> bool {
		self.inner.available.load(Ordering::SeqCst)
	}

	/// Append a message and return its offset.
	pub fn append(&self, topic: &str, payload: Bytes) -> Result<u64> {
		if self.inner.closed.load(Ordering::SeqCst) {
			return Err(QueueError::Closed);
		}
		if !self.is_available() {
			return Err(QueueError::Unavailable("broker is not accepting messages".to_string()));
		}

		let mut state = self.inner.lock();
		let log = state
			.topics
			.entry(topic.to_string())
			.or_insert_with(TopicLog::new);

		let offset = log.end_offset();
		log.messages.push_back(Message {
			topic: topic.to_string(),
			offset,
			payload,
			published_at: Utc::now(),
		});
		while log.messages.len() > self.inner.retention {
			log.messages.pop_front();
			log.base_offset += 1;
		}
		log.len_tx.send_replace(offset + 1);

		debug!(topic, offset, "message appended");
		Ok(offset)
	}

	pub fn subscribe(&self, topic: &str, group: &str, start: StartFrom) -> Subscription {
		let mut state = self.inner.lock();
		let committed = state
			.committed
			.get(&(topic.to_string(), group.to_string()))
			.copied();
		let log = state
			.topics
			.entry(topic.to_string())
			.or_insert_with(TopicLog::new);

		let next_offset = match start {
			StartFrom::Earliest => log.base_offset,
			StartFrom::Latest => log.end_offset(),
			StartFrom::Committed => committed.unwrap_or(log.base_offset),
		};

		Subscription {
			broker: Arc::clone(&self.inner),
			topic: topic.to_string(),
			group: group.to_string(),
			next_offset,
			len_rx: log.len_tx.subscribe(),
		}
	}

	/// Snapshot of everything retained on `topic`.
	pub fn messages(&self, topic: &str) -> Vec<Message> {
		self.inner
			.lock()
			.topics
			.get(topic)
			.map(|log| log.messages.iter().cloned().collect())
			.unwrap_or_default()
	}

	pub fn committed_offset(&self, topic: &str, group: &str) -> Option<u64> {
		self.inner
			.lock()
			.committed
			.get(&(topic.to_string(), group.to_string()))
			.copied()
	}

	/// Reject further publishes and wake every subscription so it can
	/// observe [`QueueError::Closed`] once it has read what is retained.
	pub fn close(&self) {
		self.inner.closed.store(true, Ordering::SeqCst);
		let state = self.inner.lock();
		for log in state.topics.values() {
			log.len_tx.send_modify(|_| {});
		}
	}
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
	fn name(&self) -> &str {
		"memory"
	}

	#[instrument(skip(self, payload), fields(bytes = payload.len()))]
	async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
		self.append(topic, payload).map(|_| ())
	}
}

/// A cursor over one topic of an [`InMemoryBroker`].
pub struct Subscription {
	broker: Arc<BrokerInner>,
	topic: String,
	group: String,
	next_offset: u64,
	len_rx: watch::Receiver<u64>,
}

impl Subscription {
	pub fn topic(&self) -> &str {
		&self.topic
	}

	pub fn group(&self) -> &str {
		&self.group
	}

	pub fn next_offset(&self) -> u64 {
		self.next_offset
	}

	/// Wait for the next message. Cancel-safe: dropping the future before it
	/// resolves does not skip a message.
	pub async fn recv(&mut self) -> Result<Message> {
		loop {
			let _ = self.len_rx.borrow_and_update();

			if let Some(message) = self.take_next() {
				return Ok(message);
			}
			if self.broker.closed.load(Ordering::SeqCst) {
				return Err(QueueError::Closed);
			}

			self.len_rx.changed().await.map_err(|_| QueueError::Closed)?;
		}
	}

	fn take_next(&mut self) -> Option<Message> {
		let mut state = self.broker.lock();
		let log = state.topics.get(&self.topic)?;
		if self.next_offset < log.base_offset {
			debug!(
				topic = %self.topic,
				group = %self.group,
				skipped = log.base_offset - self.next_offset,
				"subscription fell behind retention"
			);
			self.next_offset = log.base_offset;
		}
		let message = log.get(self.next_offset).cloned()?;

		self.next_offset = message.offset + 1;
		state
			.committed
			.insert((self.topic.clone(), self.group.clone()), self.next_offset);
		Some(message)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn test_offsets_are_monotonic_per_topic() {
		let broker = InMemoryBroker::new();
		assert_eq!(broker.append("a", Bytes::from_static(b"1")).unwrap(), 0);
		assert_eq!(broker.append("a", Bytes::from_static(b"2")).unwrap(), 1);
		assert_eq!(broker.append("b", Bytes::from_static(b"x")).unwrap(), 0);

		let offsets: Vec<u64> = broker.messages("a").iter().map(|m| m.offset).collect();
		assert_eq!(offsets, vec![0, 1]);
	}

	#[tokio::test]
	async fn test_subscribe_earliest_reads_in_order() {
		let broker = InMemoryBroker::new();
		for payload in ["first", "second", "third"] {
			broker.publish("audit", Bytes::from(payload)).await.unwrap();
		}

		let mut sub = broker.subscribe("audit", "g", StartFrom::Earliest);
		for expected in ["first", "second", "third"] {
			let message = sub.recv().await.unwrap();
			assert_eq!(message.payload_utf8(), expected);
		}
		assert_eq!(sub.next_offset(), 3);
	}

	#[tokio::test]
	async fn test_subscribe_latest_skips_retained() {
		let broker = InMemoryBroker::new();
		broker.append("audit", Bytes::from_static(b"old")).unwrap();

		let mut sub = broker.subscribe("audit", "g", StartFrom::Latest);
		broker.append("audit", Bytes::from_static(b"new")).unwrap();

		let message = sub.recv().await.unwrap();
		assert_eq!(message.offset, 1);
		assert_eq!(&message.payload[..], b"new");
	}

	#[tokio::test]
	async fn test_recv_waits_for_publish() {
		let broker = InMemoryBroker::new();
		let mut sub = broker.subscribe("audit", "g", StartFrom::Earliest);

		let pending = tokio::time::timeout(Duration::from_millis(20), sub.recv()).await;
		assert!(pending.is_err());

		let publisher = broker.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(10)).await;
			publisher.append("audit", Bytes::from_static(b"late")).unwrap();
		});

		let message = tokio::time::timeout(Duration::from_secs(5), sub.recv())
			.await
			.expect("message should arrive")
			.unwrap();
		assert_eq!(message.offset, 0);
	}

	#[tokio::test]
	async fn test_unavailable_broker_rejects_and_retains_nothing() {
		let broker = InMemoryBroker::new();
		broker.set_available(false);

		let err = broker
			.publish("audit", Bytes::from_static(b"x"))
			.await
			.unwrap_err();
		assert!(matches!(err, QueueError::Unavailable(_)));
		assert!(broker.messages("audit").is_empty());

		broker.set_available(true);
		broker.publish("audit", Bytes::from_static(b"x")).await.unwrap();
		assert_eq!(broker.messages("audit").len(), 1);
	}

	#[tokio::test]
	async fn test_committed_offset_resumes_group() {
		let broker = InMemoryBroker::new();
		for i in 0..4u8 {
			broker.append("audit", Bytes::from(vec![i])).unwrap();
		}

		let mut first = broker.subscribe("audit", "audit-group", StartFrom::Committed);
		first.recv().await.unwrap();
		first.recv().await.unwrap();
		drop(first);
		assert_eq!(broker.committed_offset("audit", "audit-group"), Some(2));

		let mut resumed = broker.subscribe("audit", "audit-group", StartFrom::Committed);
		assert_eq!(resumed.recv().await.unwrap().offset, 2);

		let mut other = broker.subscribe("audit", "other-group", StartFrom::Committed);
		assert_eq!(other.recv().await.unwrap().offset, 0);
	}

	#[tokio::test]
	async fn test_close_drains_then_reports_closed() {
		let broker = InMemoryBroker::new();
		broker.append("audit", Bytes::from_static(b"kept")).unwrap();
		let mut sub = broker.subscribe("audit", "g", StartFrom::Earliest);

		broker.close();
		assert!(matches!(
			broker.append("audit", Bytes::from_static(b"x")),
			Err(QueueError::Closed)
		));

		assert_eq!(&sub.recv().await.unwrap().payload[..], b"kept");
		assert!(matches!(sub.recv().await, Err(QueueError::Closed)));
	}

	#[tokio::test]
	async fn test_retention_evicts_oldest_and_keeps_offsets() {
		let broker = InMemoryBroker::with_retention(3);
		let mut lagging = broker.subscribe("audit", "slow", StartFrom::Earliest);

		for i in 0..10u8 {
			assert_eq!(broker.append("audit", Bytes::from(vec![i])).unwrap(), i as u64);
		}

		let offsets: Vec<u64> = broker.messages("audit").iter().map(|m| m.offset).collect();
		assert_eq!(offsets, vec![7, 8, 9]);

		let message = lagging.recv().await.unwrap();
		assert_eq!(message.offset, 7);
		assert_eq!(&message.payload[..], &[7u8]);
		assert_eq!(broker.committed_offset("audit", "slow"), Some(8));

		let mut fresh = broker.subscribe("audit", "new-group", StartFrom::Committed);
		assert_eq!(fresh.recv().await.unwrap().offset, 7);

		let mut latest = broker.subscribe("audit", "tail", StartFrom::Latest);
		broker.append("audit", Bytes::from_static(b"next")).unwrap();
		assert_eq!(latest.recv().await.unwrap().offset, 10);
		assert_eq!(broker.messages("audit").len(), 3);
	}

	#[tokio::test]
	async fn test_close_wakes_waiting_subscription() {
		let broker = InMemoryBroker::new();
		let mut sub = broker.subscribe("audit", "g", StartFrom::Earliest);

		let closer = broker.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(10)).await;
			closer.close();
		});

		let result = tokio::time::timeout(Duration::from_secs(5), sub.recv())
			.await
			.expect("close should wake the subscription");
		assert!(matches!(result, Err(QueueError::Closed)));
	}
}
