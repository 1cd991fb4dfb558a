// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	AuditConfigLayer, ClaimMode, DatabaseConfigLayer, DatabaseSinkConfigLayer, LogFormat,
	LoggingConfigLayer, OutboxConfigLayer, QueueBackend, QueueConfigLayer, QueueOverflowPolicy,
	StdoutSinkConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/pvz/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: PVZ_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(load_database_from_env()),
			logging: Some(load_logging_from_env()?),
			audit: Some(load_audit_from_env()?),
			outbox: Some(load_outbox_from_env()?),
			queue: Some(load_queue_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: std::str::FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {kind} value '{v}'"),
		}),
		None => Ok(None),
	}
}

/// Parses a snake_case enum value using its serde representation.
fn env_enum<T: serde::de::DeserializeOwned>(name: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => {
			let normalized = v.trim().to_lowercase();
			T::deserialize(toml::Value::String(normalized))
				.map(Some)
				.map_err(|e| ConfigError::InvalidValue {
					key: name.to_string(),
					message: e.to_string(),
				})
		}
		None => Ok(None),
	}
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("PVZ_SERVER_DATABASE_URL"),
	}
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	Ok(LoggingConfigLayer {
		level: env_var("PVZ_SERVER_LOG_LEVEL"),
		format: env_enum::<LogFormat>("PVZ_SERVER_LOG_FORMAT")?,
	})
}

fn load_audit_from_env() -> Result<AuditConfigLayer, ConfigError> {
	Ok(AuditConfigLayer {
		enabled: env_bool("PVZ_SERVER_AUDIT_ENABLED"),
		queue_overflow_policy: env_enum::<QueueOverflowPolicy>(
			"PVZ_SERVER_AUDIT_QUEUE_OVERFLOW_POLICY",
		)?,
		stdout: Some(StdoutSinkConfigLayer {
			enabled: env_bool("PVZ_SERVER_AUDIT_STDOUT_ENABLED"),
			filter: env_var("PVZ_SERVER_AUDIT_STDOUT_FILTER"),
			batch_size: env_parse("PVZ_SERVER_AUDIT_STDOUT_BATCH_SIZE", "usize")?,
			flush_timeout_ms: env_parse("PVZ_SERVER_AUDIT_STDOUT_FLUSH_TIMEOUT_MS", "u64")?,
			queue_capacity: env_parse("PVZ_SERVER_AUDIT_STDOUT_QUEUE_CAPACITY", "usize")?,
		}),
		database: Some(DatabaseSinkConfigLayer {
			enabled: env_bool("PVZ_SERVER_AUDIT_DATABASE_ENABLED"),
			batch_size: env_parse("PVZ_SERVER_AUDIT_DATABASE_BATCH_SIZE", "usize")?,
			flush_timeout_ms: env_parse("PVZ_SERVER_AUDIT_DATABASE_FLUSH_TIMEOUT_MS", "u64")?,
			queue_capacity: env_parse("PVZ_SERVER_AUDIT_DATABASE_QUEUE_CAPACITY", "usize")?,
		}),
	})
}

fn load_outbox_from_env() -> Result<OutboxConfigLayer, ConfigError> {
	Ok(OutboxConfigLayer {
		enabled: env_bool("PVZ_SERVER_OUTBOX_ENABLED"),
		poll_interval_ms: env_parse("PVZ_SERVER_OUTBOX_POLL_INTERVAL_MS", "u64")?,
		batch_limit: env_parse("PVZ_SERVER_OUTBOX_BATCH_LIMIT", "u32")?,
		max_attempts: env_parse("PVZ_SERVER_OUTBOX_MAX_ATTEMPTS", "u32")?,
		retry_delay_ms: env_parse("PVZ_SERVER_OUTBOX_RETRY_DELAY_MS", "u64")?,
		topic: env_var("PVZ_SERVER_OUTBOX_TOPIC"),
		claim_mode: env_enum::<ClaimMode>("PVZ_SERVER_OUTBOX_CLAIM_MODE")?,
	})
}

fn load_queue_from_env() -> Result<QueueConfigLayer, ConfigError> {
	Ok(QueueConfigLayer {
		backend: env_enum::<QueueBackend>("PVZ_SERVER_QUEUE_BACKEND")?,
		http_url: env_var("PVZ_SERVER_QUEUE_HTTP_URL"),
		timeout_ms: env_parse("PVZ_SERVER_QUEUE_TIMEOUT_MS", "u64")?,
		consumer_enabled: env_bool("PVZ_SERVER_QUEUE_CONSUMER_ENABLED"),
		consumer_group: env_var("PVZ_SERVER_QUEUE_CONSUMER_GROUP"),
		memory_retention: env_parse("PVZ_SERVER_QUEUE_MEMORY_RETENTION", "usize")?,
	})
}
