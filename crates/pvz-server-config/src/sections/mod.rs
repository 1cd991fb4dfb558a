// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for pvz-server.

pub mod audit;
pub mod database;
pub mod logging;
pub mod outbox;
pub mod queue;

pub use audit::{
	AuditConfig, AuditConfigLayer, BatchConfig, DatabaseSinkConfig, DatabaseSinkConfigLayer,
	QueueOverflowPolicy, StdoutSinkConfig, StdoutSinkConfigLayer,
};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use outbox::{ClaimMode, OutboxConfig, OutboxConfigLayer};
pub use queue::{QueueBackend, QueueConfig, QueueConfigLayer};
