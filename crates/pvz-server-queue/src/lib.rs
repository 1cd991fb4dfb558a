// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Message queue collaborators for audit task delivery.
//!
//! The retry processor only needs [`MessagePublisher`]. Two backends exist:
//! [`InMemoryBroker`], which also supports subscriptions and is what the
//! server runs with by default, and [`HttpPublisher`] for an external broker
//! gateway.

pub mod consumer;
pub mod error;
pub mod http;
pub mod memory;
pub mod publisher;

pub use consumer::run_logging_consumer;
pub use error::{QueueError, Result};
pub use http::HttpPublisher;
pub use memory::{InMemoryBroker, StartFrom, Subscription, DEFAULT_RETENTION};
pub use publisher::{Message, MessagePublisher};
