// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background delivery of outbox tasks to the message queue.

pub mod error;
pub mod health;
pub mod processor;

pub use error::{JobError, Result};
pub use health::{HealthState, OutboxHealth};
pub use processor::{RetryCycleSummary, TaskRetryProcessor};
