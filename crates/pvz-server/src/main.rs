// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! pvz-server binary: runs the audit dispatcher and outbox delivery.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pvz_server::{telemetry, version, AuditPipeline};
use tokio_util::sync::CancellationToken;

/// Audit pipeline service for pickup-point order events.
#[derive(Parser, Debug)]
#[command(name = "pvz-server", about = "Pickup-point audit pipeline", version)]
struct Args {
	/// Path to a TOML config file (defaults to /etc/pvz/server.toml)
	#[arg(long, env = "PVZ_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version and build information
	Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	dotenvy::dotenv().ok();

	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	let config = match &args.config {
		Some(path) => pvz_server_config::load_config_with_file(path)?,
		None => pvz_server_config::load_config()?,
	};

	telemetry::init_tracing(&config.logging);

	tracing::info!(
		version = version::VERSION,
		database = %config.database.url,
		"starting pvz-server"
	);

	let pool = pvz_server_db::create_pool(&config.database.url).await?;
	pvz_server_db::run_migrations(&pool).await?;

	let cancel = CancellationToken::new();
	let pipeline = AuditPipeline::start(&config, pool.clone(), &cancel).await?;

	tokio::signal::ctrl_c().await?;
	tracing::info!("received shutdown signal");

	cancel.cancel();
	pipeline.shutdown().await;
	pool.close().await;

	tracing::info!("pvz-server shutdown complete");
	Ok(())
}
