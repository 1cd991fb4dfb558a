// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod dispatcher;
pub mod error;
pub mod record;
pub mod sink;

pub use dispatcher::{AuditDispatcher, SinkRegistration};
pub use error::{AuditError, AuditResult, AuditSinkError};
pub use record::{AuditRecord, AuditRecordBuilder, OrderStatus};
pub use sink::AuditSink;

pub use pvz_server_config::{AuditConfig, BatchConfig, QueueOverflowPolicy};

#[cfg(feature = "sink-stdout")]
pub use sink::stdout::StdoutSink;

#[cfg(feature = "sink-database")]
pub use sink::database::DatabaseSink;
