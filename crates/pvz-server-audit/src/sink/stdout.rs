// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::AuditSinkError;
use crate::record::AuditRecord;
use crate::sink::AuditSink;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Prints one line per record, optionally keeping only records whose message
/// contains the filter (case-insensitive).
pub struct StdoutSink {
	name: String,
	filter: Option<String>,
	writer: Mutex<BoxedWriter>,
}

impl StdoutSink {
	pub fn new(filter: Option<String>) -> Self {
		Self::with_writer(filter, Box::new(tokio::io::stdout()))
	}

	pub fn with_writer(filter: Option<String>, writer: BoxedWriter) -> Self {
		Self {
			name: "stdout".to_string(),
			filter: filter
				.map(|f| f.to_lowercase())
				.filter(|f| !f.is_empty()),
			writer: Mutex::new(writer),
		}
	}

	pub fn matches(&self, record: &AuditRecord) -> bool {
		match &self.filter {
			None => true,
			Some(filter) => record.message.to_lowercase().contains(filter.as_str()),
		}
	}
}

pub fn format_line(record: &AuditRecord) -> String {
	format!(
		"STDOUT: {} | Order: {} | {} -> {} | Msg: {}\n",
		record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
		record.order_id,
		record.old_state,
		record.new_state,
		record.message
	)
}

#[async_trait]
impl AuditSink for StdoutSink {
	fn name(&self) -> &str {
		&self.name
	}

	async fn process(&self, batch: &[Arc<AuditRecord>]) -> Result<(), AuditSinkError> {
		let output: String = batch
			.iter()
			.filter(|record| self.matches(record))
			.map(|record| format_line(record))
			.collect();

		if output.is_empty() {
			return Ok(());
		}

		let mut writer = self.writer.lock().await;
		let written = async {
			writer.write_all(output.as_bytes()).await?;
			writer.flush().await
		}
		.await;

		if let Err(e) = written {
			warn!(sink = %self.name, error = %e, "failed to write audit records to stdout");
		}

		Ok(())
	}
}
