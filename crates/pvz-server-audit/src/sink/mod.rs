// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;

pub use crate::error::AuditSinkError;
use crate::record::AuditRecord;

#[cfg(feature = "sink-database")]
pub mod database;
#[cfg(feature = "sink-stdout")]
pub mod stdout;

/// A consumer of audit batches.
///
/// Each registered sink is driven by its own dispatcher worker, so a slow or
/// failing sink only delays its own batches.
#[async_trait]
pub trait AuditSink: Send + Sync {
	fn name(&self) -> &str;

	/// Handle one batch. Records arrive in the order they were logged.
	async fn process(&self, batch: &[Arc<AuditRecord>]) -> Result<(), AuditSinkError>;

	async fn health_check(&self) -> Result<(), AuditSinkError> {
		Ok(())
	}
}
