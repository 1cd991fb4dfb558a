// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for pvz-server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Per-sink batching parameters for the audit dispatcher
//! - Consistent environment variable naming (`PVZ_SERVER_*`)
//!
//! # Usage
//!
//! ```ignore
//! use pvz_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("Outbox topic: {}", config.outbox.topic);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	pub audit: AuditConfig,
	pub outbox: OutboxConfig,
	pub queue: QueueConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`PVZ_SERVER_*`)
/// 2. Config file (`/etc/pvz/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let config = ServerConfig {
		database: layer.database.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
		audit: layer.audit.unwrap_or_default().finalize(),
		outbox: layer.outbox.unwrap_or_default().finalize(),
		queue: layer.queue.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		database = %config.database.url,
		audit_enabled = config.audit.enabled,
		stdout_sink = config.audit.stdout.enabled,
		database_sink = config.audit.database.enabled,
		outbox_enabled = config.outbox.enabled,
		topic = %config.outbox.topic,
		queue_backend = ?config.queue.backend,
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	for (name, batch) in [
		("audit.stdout", &config.audit.stdout.batch),
		("audit.database", &config.audit.database.batch),
	] {
		if batch.batch_size == 0 {
			return Err(ConfigError::Validation(format!(
				"{name}.batch_size must be at least 1"
			)));
		}
		if batch.queue_capacity == 0 {
			return Err(ConfigError::Validation(format!(
				"{name}.queue_capacity must be at least 1"
			)));
		}
		if batch.flush_timeout_ms == 0 {
			return Err(ConfigError::Validation(format!(
				"{name}.flush_timeout_ms must be at least 1"
			)));
		}
	}

	if config.outbox.poll_interval_ms == 0 {
		return Err(ConfigError::Validation(
			"outbox.poll_interval_ms must be at least 1".to_string(),
		));
	}

	if config.outbox.max_attempts == 0 {
		return Err(ConfigError::Validation(
			"outbox.max_attempts must be at least 1".to_string(),
		));
	}

	if config.queue.memory_retention == 0 {
		return Err(ConfigError::Validation(
			"queue.memory_retention must be at least 1".to_string(),
		));
	}

	if config.queue.backend == QueueBackend::Http && config.queue.http_url.is_none() {
		return Err(ConfigError::Validation(
			"queue.backend = \"http\" requires queue.http_url (PVZ_SERVER_QUEUE_HTTP_URL)"
				.to_string(),
		));
	}

	Ok(())
}
