// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use pvz_server_config::{LogFormat, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

	let registry = tracing_subscriber::registry().with(filter);
	match config.format {
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json().with_current_span(false))
			.init(),
	}
}
