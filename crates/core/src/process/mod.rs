//! [`Runtime`] running chaincodes as local processes.
//!
//! Each chaincode definition names an optional build command, a run command for chaincodes that
//! dial back to the peer, and an optional `connection.json` for chaincodes that host their own
//! server. A started process receives a private metadata directory as its last argument containing
//! `chaincode.json` with the peer address and TLS material.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use cclaunch_worker::{TaskClass, spawn};
use parking_lot::Mutex;
use serde::Serialize;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ChaincodeDefinition, CommandSpec, LauncherConfig};
use crate::{ChaincodeId, ChaincodeServerInfo, Error, PeerConnection, Result, Runtime};

/// File written into the metadata directory of every started chaincode.
pub const METADATA_FILE: &str = "chaincode.json";

type ExitSlot = Option<Result<i32>>;

struct Instance {
	exit: watch::Receiver<ExitSlot>,
	stop: CancellationToken,
	_metadata: TempDir,
}

impl Instance {
	fn is_running(&self) -> bool {
		self.exit.borrow().is_none()
	}
}

#[derive(Serialize)]
struct ChaincodeMetadata<'a> {
	chaincode_id: &'a str,
	peer_address: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	client_cert: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	client_key: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	root_cert: Option<&'a str>,
}

/// Process-backed [`Runtime`].
pub struct ProcessRuntime {
	definitions: BTreeMap<ChaincodeId, ChaincodeDefinition>,
	default_dial_timeout: Duration,
	instances: Mutex<HashMap<ChaincodeId, Instance>>,
}

impl ProcessRuntime {
	/// Creates a runtime for the given chaincode definitions.
	pub fn new(definitions: BTreeMap<ChaincodeId, ChaincodeDefinition>, default_dial_timeout: Duration) -> Self {
		Self {
			definitions,
			default_dial_timeout,
			instances: Mutex::new(HashMap::new()),
		}
	}

	/// Creates a runtime from the `chaincodes` table of a launcher configuration.
	pub fn from_config(config: &LauncherConfig) -> Self {
		Self::new(config.chaincodes.clone(), config.dial_timeout())
	}

	/// Returns `true` while a started process for `ccid` has not exited.
	pub fn is_running(&self, ccid: &ChaincodeId) -> bool {
		self.instances.lock().get(ccid).is_some_and(Instance::is_running)
	}

	fn definition(&self, ccid: &ChaincodeId) -> Result<&ChaincodeDefinition> {
		self.definitions.get(ccid).ok_or_else(|| Error::UnknownChaincode(ccid.clone()))
	}

	fn instance_handles(&self, ccid: &ChaincodeId) -> Result<(CancellationToken, watch::Receiver<ExitSlot>)> {
		let instances = self.instances.lock();
		let instance = instances
			.get(ccid)
			.ok_or_else(|| Error::other(format!("chaincode {ccid} was never started")))?;
		Ok((instance.stop.clone(), instance.exit.clone()))
	}

	fn spawn_instance(&self, ccid: &ChaincodeId, definition: &ChaincodeDefinition, peer: &PeerConnection) -> Result<()> {
		let run = definition
			.run
			.as_ref()
			.ok_or_else(|| Error::Config(format!("chaincode {ccid} has no run command")))?;

		let mut instances = self.instances.lock();
		if instances.get(ccid).is_some_and(Instance::is_running) {
			return Err(Error::AlreadyRunning(ccid.clone()));
		}

		let metadata = tempfile::Builder::new().prefix("cclaunch-").tempdir()?;
		write_metadata(metadata.path(), ccid, peer)?;

		let mut child = command(run, definition.working_dir.as_deref())
			.arg(metadata.path())
			.env("CORE_CHAINCODE_ID_NAME", ccid.as_str())
			.env("CORE_PEER_ADDRESS", &peer.address)
			.env("CORE_PEER_TLS_ENABLED", if peer.tls.is_some() { "true" } else { "false" })
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::other(format!("cannot spawn `{}`: {e}", run.command)))?;

		info!(chaincode = %ccid, command = %run.command, pid = child.id(), "started chaincode process");

		if let Some(stderr) = child.stderr.take() {
			spawn(TaskClass::Io, forward_stderr(ccid.clone(), stderr));
		}

		let (exit_tx, exit_rx) = watch::channel(None);
		let stop = CancellationToken::new();
		spawn(TaskClass::Monitor, monitor(ccid.clone(), child, stop.clone(), exit_tx));

		instances.insert(
			ccid.clone(),
			Instance {
				exit: exit_rx,
				stop,
				_metadata: metadata,
			},
		);
		Ok(())
	}
}

#[async_trait]
impl Runtime for ProcessRuntime {
	async fn build(&self, ccid: &ChaincodeId) -> Result<Option<ChaincodeServerInfo>> {
		let definition = self.definition(ccid)?;

		if let Some(build) = &definition.build {
			debug!(chaincode = %ccid, command = %build.command, "running chaincode build");
			let output = command(build, definition.working_dir.as_deref())
				.env("CHAINCODE_ID", ccid.as_str())
				.stdin(Stdio::null())
				.kill_on_drop(true)
				.output()
				.await
				.map_err(|e| Error::other(format!("cannot run `{}`: {e}", build.command)))?;

			if !output.status.success() {
				let stderr = String::from_utf8_lossy(&output.stderr);
				warn!(chaincode = %ccid, command = %build.command, stderr = %stderr.trim(), "chaincode build failed");
				return Err(Error::CommandFailed {
					command: build.command.clone(),
					code: exit_code(output.status),
				});
			}
		}

		match &definition.connection {
			Some(path) if path.exists() => {
				let info = ChaincodeServerInfo::from_connection_file(path, self.default_dial_timeout)?;
				debug!(chaincode = %ccid, address = %info.address, "chaincode runs as external server");
				Ok(Some(info))
			}
			_ => Ok(None),
		}
	}

	async fn start(&self, ccid: &ChaincodeId, peer: &PeerConnection) -> Result<()> {
		let definition = self.definition(ccid)?;
		self.spawn_instance(ccid, definition, peer)
	}

	async fn wait(&self, ccid: &ChaincodeId) -> Result<i32> {
		let (_, mut exit) = self.instance_handles(ccid)?;
		let exited = exit
			.wait_for(Option::is_some)
			.await
			.map_err(|_| Error::other(format!("monitor of chaincode {ccid} went away")))?
			.clone();
		exited.unwrap_or_else(|| Err(Error::other(format!("monitor of chaincode {ccid} went away"))))
	}

	async fn stop(&self, ccid: &ChaincodeId) -> Result<()> {
		let (stop, mut exit) = self.instance_handles(ccid)?;
		stop.cancel();
		let _ = exit.wait_for(Option::is_some).await;
		Ok(())
	}
}

fn command(spec: &CommandSpec, working_dir: Option<&Path>) -> Command {
	let mut cmd = Command::new(&spec.command);
	cmd.args(&spec.args).envs(&spec.env);
	if let Some(dir) = working_dir {
		cmd.current_dir(dir);
	}
	cmd
}

fn write_metadata(dir: &Path, ccid: &ChaincodeId, peer: &PeerConnection) -> Result<()> {
	let tls = peer.tls.as_ref();
	let metadata = ChaincodeMetadata {
		chaincode_id: ccid.as_str(),
		peer_address: &peer.address,
		client_cert: tls.map(|t| t.client_cert.as_str()),
		client_key: tls.map(|t| t.client_key.as_str()),
		root_cert: tls.map(|t| t.root_cert.as_str()),
	};
	let json = serde_json::to_vec_pretty(&metadata).map_err(|e| Error::other(e.to_string()))?;
	std::fs::write(dir.join(METADATA_FILE), json)?;
	Ok(())
}

/// Exit code of a finished process, `-1` when it was killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
	status.code().unwrap_or(-1)
}

async fn monitor(ccid: ChaincodeId, mut child: Child, stop: CancellationToken, exit_tx: watch::Sender<ExitSlot>) {
	let waited = tokio::select! {
		status = child.wait() => Some(status),
		_ = stop.cancelled() => None,
	};

	let status = match waited {
		Some(status) => status,
		None => {
			info!(chaincode = %ccid, "stopping chaincode process");
			if let Err(e) = child.start_kill() {
				warn!(chaincode = %ccid, error = %e, "failed to signal chaincode process");
			}
			child.wait().await
		}
	};

	let outcome = match status {
		Ok(status) => {
			let code = exit_code(status);
			info!(chaincode = %ccid, code, "chaincode process exited");
			Ok(code)
		}
		Err(e) => {
			error!(chaincode = %ccid, error = %e, "failed to wait on chaincode process");
			Err(Error::from(e))
		}
	};
	exit_tx.send_replace(Some(outcome));
}

async fn forward_stderr(ccid: ChaincodeId, stderr: ChildStderr) {
	let mut lines = BufReader::new(stderr).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) => info!(target: "cclaunch::chaincode", chaincode = %ccid, "{line}"),
			Ok(None) => break,
			Err(e) => {
				debug!(chaincode = %ccid, error = %e, "stopped reading chaincode stderr");
				break;
			}
		}
	}
}
