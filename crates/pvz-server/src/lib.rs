// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wiring for the pvz-server audit pipeline.
//!
//! Producers hand [`AuditRecord`]s to the dispatcher. The stdout sink prints
//! them and the database sink writes each one to the outbox, from where the
//! retry processor publishes it to the message queue. With the in-memory
//! backend a logging consumer reads the topic back.

pub mod error;
pub mod telemetry;
pub mod version;

use std::sync::Arc;

use pvz_server_audit::{
	AuditDispatcher, AuditRecord, AuditSinkError, DatabaseSink, SinkRegistration, StdoutSink,
};
use pvz_server_config::{AuditConfig, QueueBackend, QueueConfig, ServerConfig};
use pvz_server_db::{TaskRepository, TaskStore};
use pvz_server_jobs::TaskRetryProcessor;
use pvz_server_queue::{run_logging_consumer, HttpPublisher, InMemoryBroker, MessagePublisher, StartFrom};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use error::{Result, ServerError};

/// The sinks enabled in `config`, in dispatch order: stdout, then database.
pub fn build_sinks(config: &AuditConfig, store: Arc<dyn TaskStore>) -> Vec<SinkRegistration> {
	let mut sinks = Vec::new();

	if config.stdout.enabled {
		sinks.push(SinkRegistration::new(
			Arc::new(StdoutSink::new(config.stdout.filter.clone())),
			config.stdout.batch,
		));
	}
	if config.database.enabled {
		sinks.push(SinkRegistration::new(
			Arc::new(DatabaseSink::new(store)),
			config.database.batch,
		));
	}

	sinks
}

/// A publisher for the configured backend. The in-memory broker is returned
/// separately as well so a consumer can subscribe to it.
pub fn build_publisher(
	config: &QueueConfig,
) -> Result<(Arc<dyn MessagePublisher>, Option<InMemoryBroker>)> {
	match config.backend {
		QueueBackend::Memory => {
			let broker = InMemoryBroker::with_retention(config.memory_retention);
			Ok((Arc::new(broker.clone()), Some(broker)))
		}
		QueueBackend::Http => {
			let url = config
				.http_url
				.clone()
				.ok_or_else(|| ServerError::Setup("queue.http_url is required for the http backend".into()))?;
			let publisher = HttpPublisher::new(url, config.timeout())?;
			Ok((Arc::new(publisher), None))
		}
	}
}

/// Running dispatcher, retry processor and consumer.
pub struct AuditPipeline {
	dispatcher: Option<Arc<AuditDispatcher>>,
	repository: TaskRepository,
	broker: Option<InMemoryBroker>,
	cancel: CancellationToken,
	handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl AuditPipeline {
	/// Build every component from `config` and start them under a child of
	/// `cancel`. Migrations must already have been applied to `pool`.
	pub async fn start(
		config: &ServerConfig,
		pool: SqlitePool,
		cancel: &CancellationToken,
	) -> Result<Self> {
		let cancel = cancel.child_token();
		let repository = TaskRepository::new(pool);
		let store: Arc<dyn TaskStore> = Arc::new(repository.clone());
		let mut handles = Vec::new();

		let dispatcher = if config.audit.enabled {
			let sinks = build_sinks(&config.audit, Arc::clone(&store));
			let dispatcher = Arc::new(AuditDispatcher::new(sinks, config.audit.queue_overflow_policy)?);
			dispatcher.start(&cancel).await?;
			info!(sinks = ?dispatcher.sink_names(), "audit dispatcher running");
			for (sink, result) in dispatcher.check_sinks().await {
				if let Err(e) = result {
					warn!(sink = %sink, error = %e, "audit sink failed its startup health check");
				}
			}
			Some(dispatcher)
		} else {
			info!("audit logging disabled");
			None
		};

		let (publisher, broker) = build_publisher(&config.queue)?;

		if config.outbox.enabled {
			let processor = TaskRetryProcessor::new(Arc::clone(&store), publisher, &config.outbox);
			let token = cancel.clone();
			handles.push((
				"retry-processor",
				tokio::spawn(async move { processor.run(token).await }),
			));
		}

		if let (true, Some(broker)) = (config.queue.consumer_enabled, broker.as_ref()) {
			let group = config.queue.consumer_group.clone();
			let subscription = broker.subscribe(&config.outbox.topic, &group, StartFrom::Committed);
			let token = cancel.clone();
			handles.push((
				"audit-consumer",
				tokio::spawn(async move {
					run_logging_consumer(subscription, group, token).await;
				}),
			));
		}

		Ok(Self {
			dispatcher,
			repository,
			broker,
			cancel,
			handles,
		})
	}

	/// Hand a record to the dispatcher. Never waits on sink I/O.
	pub fn log(&self, record: AuditRecord) -> bool {
		match &self.dispatcher {
			Some(dispatcher) => dispatcher.log(record),
			None => false,
		}
	}

	/// Health of every audit sink; empty when audit logging is disabled.
	pub async fn sink_health(&self) -> Vec<(String, std::result::Result<(), AuditSinkError>)> {
		match &self.dispatcher {
			Some(dispatcher) => dispatcher.check_sinks().await,
			None => Vec::new(),
		}
	}

	pub fn repository(&self) -> &TaskRepository {
		&self.repository
	}

	pub fn broker(&self) -> Option<&InMemoryBroker> {
		self.broker.as_ref()
	}

	pub fn dropped(&self) -> u64 {
		self.dispatcher.as_ref().map_or(0, |d| d.dropped())
	}

	/// Stop everything. The dispatcher flushes its partial batches into the
	/// sinks first; the retry processor finishes the publish it is in.
	pub async fn shutdown(self) {
		self.cancel.cancel();

		if let Some(dispatcher) = &self.dispatcher {
			dispatcher.shutdown().await;
		}

		for (name, handle) in self.handles {
			if let Err(e) = handle.await {
				warn!(task = name, error = %e, "background task terminated abnormally");
			}
		}

		info!("audit pipeline stopped");
	}
}
