// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Size-or-timeout batching in front of the audit sinks.
//!
//! Every sink owns a bounded queue and a worker task. The worker collects
//! records into a batch and hands it to the sink when the batch is full or
//! when the flush timeout elapses, whichever happens first. The timeout is
//! re-armed after every flush. On cancellation the worker keeps receiving
//! until every deferred send has landed, then drains the queue and flushes
//! it before exiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pvz_server_config::{BatchConfig, QueueOverflowPolicy};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuditError, AuditResult, AuditSinkError};
use crate::record::AuditRecord;
use crate::sink::AuditSink;

type Entry = Arc<AuditRecord>;

/// A sink together with the batching parameters of its worker.
pub struct SinkRegistration {
	pub sink: Arc<dyn AuditSink>,
	pub batch: BatchConfig,
}

impl SinkRegistration {
	pub fn new(sink: Arc<dyn AuditSink>, batch: BatchConfig) -> Self {
		Self { sink, batch }
	}
}

struct SinkQueue {
	sink: Arc<dyn AuditSink>,
	batch: BatchConfig,
	tx: mpsc::Sender<Entry>,
}

#[derive(Default)]
struct Lifecycle {
	started: bool,
	receivers: Vec<mpsc::Receiver<Entry>>,
	stop: Option<CancellationToken>,
	handles: Vec<JoinHandle<()>>,
}

pub struct AuditDispatcher {
	queues: Vec<SinkQueue>,
	overflow_policy: QueueOverflowPolicy,
	dropped: Arc<AtomicU64>,
	/// Sends parked by [`QueueOverflowPolicy::Block`] while a queue was full.
	deferred: TaskTracker,
	lifecycle: Mutex<Lifecycle>,
}

impl AuditDispatcher {
	/// Create queues for the given sinks. Records logged before [`Self::start`]
	/// wait in the queues.
	pub fn new(
		sinks: Vec<SinkRegistration>,
		overflow_policy: QueueOverflowPolicy,
	) -> AuditResult<Self> {
		let mut queues = Vec::with_capacity(sinks.len());
		let mut receivers = Vec::with_capacity(sinks.len());

		for SinkRegistration { sink, batch } in sinks {
			if batch.batch_size == 0 || batch.queue_capacity == 0 || batch.flush_timeout_ms == 0 {
				return Err(AuditError::ConfigError(format!(
					"sink '{}' needs batch_size, queue_capacity and flush_timeout_ms of at least 1",
					sink.name()
				)));
			}

			let (tx, rx) = mpsc::channel(batch.queue_capacity);
			queues.push(SinkQueue { sink, batch, tx });
			receivers.push(rx);
		}

		Ok(Self {
			queues,
			overflow_policy,
			dropped: Arc::new(AtomicU64::new(0)),
			deferred: TaskTracker::new(),
			lifecycle: Mutex::new(Lifecycle {
				receivers,
				..Default::default()
			}),
		})
	}

	/// Launch one worker per sink. Workers stop when `cancel` fires or when
	/// [`Self::shutdown`] is called.
	#[instrument(skip(self, cancel))]
	pub async fn start(&self, cancel: &CancellationToken) -> AuditResult<()> {
		let mut lifecycle = self.lifecycle.lock().await;
		if lifecycle.started {
			return Err(AuditError::AlreadyStarted);
		}
		lifecycle.started = true;

		let stop = cancel.child_token();
		let receivers = std::mem::take(&mut lifecycle.receivers);

		for (queue, rx) in self.queues.iter().zip(receivers) {
			let handle = tokio::spawn(run_worker(
				Arc::clone(&queue.sink),
				queue.batch,
				rx,
				stop.clone(),
				self.deferred.clone(),
			));
			lifecycle.handles.push(handle);
		}

		lifecycle.stop = Some(stop);
		info!(sinks = self.queues.len(), "audit dispatcher started");
		Ok(())
	}

	/// Queue a record for every sink without waiting on sink I/O.
	///
	/// Returns `true` if every sink accepted the record. With
	/// [`QueueOverflowPolicy::DropNewest`] a full queue drops the record for
	/// that sink; with [`QueueOverflowPolicy::Block`] the send is moved to a
	/// spawned task so the caller still returns immediately.
	pub fn log(&self, record: AuditRecord) -> bool {
		let entry = Arc::new(record);
		let mut accepted = true;

		for queue in &self.queues {
			let sink = queue.sink.name();
			match queue.tx.try_send(Arc::clone(&entry)) {
				Ok(()) => {}
				Err(TrySendError::Full(entry)) => match self.overflow_policy {
					QueueOverflowPolicy::DropNewest => {
						self.record_drop(sink, "audit queue full, dropping record");
						accepted = false;
					}
					QueueOverflowPolicy::Block => {
						if !self.send_in_background(queue.tx.clone(), entry) {
							self.record_drop(sink, "no async runtime for deferred audit send");
							accepted = false;
						}
					}
				},
				Err(TrySendError::Closed(_)) => {
					self.record_drop(sink, "audit dispatcher stopped, dropping record");
					accepted = false;
				}
			}
		}

		accepted
	}

	fn send_in_background(&self, tx: mpsc::Sender<Entry>, entry: Entry) -> bool {
		let Ok(runtime) = tokio::runtime::Handle::try_current() else {
			return false;
		};

		let dropped = Arc::clone(&self.dropped);
		runtime.spawn(self.deferred.track_future(async move {
			if tx.send(entry).await.is_err() {
				let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
				warn!(dropped_total = total, "audit worker gone, dropping deferred record");
			}
		}));
		true
	}

	fn record_drop(&self, sink: &str, reason: &'static str) {
		let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
		warn!(sink, dropped_total = total, "{reason}");
	}

	/// Number of per-sink deliveries dropped because a queue was full or closed.
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	/// Run every sink's health check, in registration order.
	pub async fn check_sinks(&self) -> Vec<(String, Result<(), AuditSinkError>)> {
		let mut results = Vec::with_capacity(self.queues.len());
		for queue in &self.queues {
			results.push((queue.sink.name().to_string(), queue.sink.health_check().await));
		}
		results
	}

	pub fn sink_names(&self) -> Vec<String> {
		self.queues.iter().map(|q| q.sink.name().to_string()).collect()
	}

	/// Stop all workers, flushing whatever they already hold, and wait for
	/// them to exit. Calling it again is a no-op.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let mut lifecycle = self.lifecycle.lock().await;

		let Some(stop) = lifecycle.stop.take() else {
			return;
		};
		stop.cancel();

		for handle in lifecycle.handles.drain(..) {
			if let Err(e) = handle.await {
				warn!(error = %e, "audit worker terminated abnormally");
			}
		}

		info!(dropped = self.dropped(), "audit dispatcher shut down");
	}
}

async fn run_worker(
	sink: Arc<dyn AuditSink>,
	config: BatchConfig,
	mut rx: mpsc::Receiver<Entry>,
	stop: CancellationToken,
	deferred: TaskTracker,
) {
	let batch_size = config.batch_size;
	let flush_timeout = config.flush_timeout();
	let mut batch: Vec<Entry> = Vec::with_capacity(batch_size);

	let timer = tokio::time::sleep(flush_timeout);
	tokio::pin!(timer);

	debug!(sink = sink.name(), batch_size, ?flush_timeout, "audit worker running");

	loop {
		tokio::select! {
			biased;

			_ = stop.cancelled() => break,

			_ = &mut timer => {
				if !batch.is_empty() {
					flush(sink.as_ref(), &mut batch).await;
				}
				timer.as_mut().reset(Instant::now() + flush_timeout);
			}

			received = rx.recv() => match received {
				Some(entry) => {
					batch.push(entry);
					if batch.len() >= batch_size {
						flush(sink.as_ref(), &mut batch).await;
						timer.as_mut().reset(Instant::now() + flush_timeout);
					}
				}
				None => break,
			},
		}
	}

	// Deferred sends were accepted by log() and are waiting for room in this
	// queue, so keep receiving until all of them have completed.
	deferred.close();
	loop {
		tokio::select! {
			biased;

			_ = deferred.wait() => break,

			received = rx.recv() => match received {
				Some(entry) => {
					batch.push(entry);
					if batch.len() >= batch_size {
						flush(sink.as_ref(), &mut batch).await;
					}
				}
				None => break,
			},
		}
	}

	// Nothing new gets in after close(); what is already queued still counts.
	rx.close();
	while let Some(entry) = rx.recv().await {
		batch.push(entry);
		if batch.len() >= batch_size {
			flush(sink.as_ref(), &mut batch).await;
		}
	}
	if !batch.is_empty() {
		flush(sink.as_ref(), &mut batch).await;
	}

	debug!(sink = sink.name(), "audit worker stopped");
}

async fn flush(sink: &dyn AuditSink, batch: &mut Vec<Entry>) {
	let size = batch.len();
	match sink.process(batch).await {
		Ok(()) => debug!(sink = sink.name(), size, "audit batch flushed"),
		Err(source) => {
			let err = AuditError::SinkError {
				sink: sink.name().to_string(),
				source,
			};
			warn!(sink = sink.name(), size, error = %err, "audit sink failed to process batch");
		}
	}
	batch.clear();
}
