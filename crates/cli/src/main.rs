//! cclaunch binary.
//!
//! Launches one configured chaincode through the process runtime and supervises it until it
//! exits or the user interrupts.

mod cli;
mod handler;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cclaunch_core::config::{ChaincodeDefinition, LauncherConfig};
use cclaunch_core::metrics::LaunchMetrics;
use cclaunch_core::process::ProcessRuntime;
use cclaunch_core::{ChaincodeId, Registry, RuntimeLauncher};
use clap::Parser;
use tracing::{error, info, warn};

use crate::cli::{Cli, Command};
use crate::handler::LoggingStreamHandler;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let cli = Cli::parse();
	setup_tracing(cli.verbose);

	match cli.command {
		Command::Launch { config, chaincode } => launch(&config, ChaincodeId::from(chaincode)).await,
		Command::CheckConfig { config } => check_config(&config),
	}
}

async fn launch(config_path: &Path, ccid: ChaincodeId) -> anyhow::Result<ExitCode> {
	let config = LauncherConfig::load(config_path).with_context(|| format!("loading {}", config_path.display()))?;
	let Some(definition) = config.chaincodes.get(&ccid) else {
		anyhow::bail!("chaincode {ccid} is not defined in {}", config_path.display());
	};
	if definition.connection.is_none() {
		warn!(chaincode = %ccid, "{}", describe_model(definition, config.startup_timeout()));
	}

	let registry = Arc::new(Registry::new());
	let metrics = Arc::new(LaunchMetrics::new());
	let runtime = Arc::new(ProcessRuntime::from_config(&config));
	let launcher = RuntimeLauncher::from_config(&config, runtime, registry.clone(), metrics.clone())
		.context("building launcher")?;
	let handler = Arc::new(LoggingStreamHandler::new(registry));

	info!(chaincode = %ccid, peer = %config.peer_address, timeout = ?launcher.startup_timeout(), "starting cclaunch");

	let launch = launcher.launch(&ccid, handler);
	tokio::pin!(launch);
	let finished = tokio::select! {
		result = &mut launch => Some(result),
		_ = tokio::signal::ctrl_c() => None,
	};

	let result = match finished {
		Some(Ok(())) => {
			info!(chaincode = %ccid, "chaincode ready, press Ctrl-C to stop");
			tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
			if let Err(e) = launcher.stop(&ccid).await {
				warn!(chaincode = %ccid, error = %e, "stop failed");
			}
			Ok(())
		}
		Some(result) => result,
		None => {
			info!(chaincode = %ccid, "interrupted, stopping chaincode");
			if let Err(e) = launcher.stop(&ccid).await {
				warn!(chaincode = %ccid, error = %e, "stop failed");
			}
			launch.await
		}
	};

	let stats = metrics.snapshot(&ccid);
	info!(
		chaincode = %ccid,
		launch_failures = stats.failures,
		launch_timeouts = stats.timeouts,
		launch_duration_secs = stats.total_duration_secs,
		"launch metrics"
	);

	match result {
		Ok(()) => Ok(ExitCode::SUCCESS),
		Err(e) => {
			error!(chaincode = %ccid, error = %e, "launch ended");
			Ok(ExitCode::FAILURE)
		}
	}
}

fn check_config(config_path: &Path) -> anyhow::Result<ExitCode> {
	let config = LauncherConfig::load(config_path).with_context(|| format!("loading {}", config_path.display()))?;

	println!("peer address:    {}", config.peer_address);
	println!("startup timeout: {:?}", config.startup_timeout());
	println!("stream pool:     {}", config.stream_pool_size);
	println!("mutual TLS:      {}", if config.tls.is_some() { "enabled" } else { "disabled" });
	for (ccid, definition) in &config.chaincodes {
		let build = definition.build.as_ref().map_or("-", |b| b.command.as_str());
		println!("  {ccid}: {}, build: {build}", describe_model(definition, config.startup_timeout()));
	}
	Ok(ExitCode::SUCCESS)
}

/// One-line description of how a chaincode is supervised.
///
/// Dial-back chaincodes only count as launched once they register with a peer. This binary runs no
/// peer listener, so they are supervised until the startup timeout and then reported as failed.
fn describe_model(definition: &ChaincodeDefinition, startup_timeout: Duration) -> String {
	if definition.connection.is_some() {
		return "server, supervised while its streams are open".to_string();
	}
	format!("dial-back, supervised for at most {startup_timeout:?} since no peer listens for its registration")
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("cclaunch=debug,cclaunch_core=debug,cclaunch_worker=trace,info")
		} else {
			EnvFilter::new("cclaunch=info,cclaunch_core=info,warn")
		}
	});

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
