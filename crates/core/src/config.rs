//! Launcher configuration file.
//!
//! ```toml
//! peer_address = "peer0.example.com:7052"
//! startup_timeout_secs = 300
//!
//! [tls]
//! ca_cert = "tls/ca.pem"
//! ca_key = "tls/ca.key"
//!
//! [chaincodes."asset:1.0"]
//! run = { command = "./asset-cc", args = ["--verbose"] }
//! ```
//!
//! Relative paths are resolved against the directory containing the file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ChaincodeId, Error, Result};

const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 300;
const DEFAULT_STREAM_POOL_SIZE: usize = 10;
const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 10;

/// Top-level launcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LauncherConfig {
	/// Address chaincodes dial back to.
	pub peer_address: String,
	/// Seconds a launch may take before it is reported as timed out.
	#[serde(default = "default_startup_timeout_secs")]
	pub startup_timeout_secs: u64,
	/// Connections opened to an external chaincode server.
	#[serde(default = "default_stream_pool_size")]
	pub stream_pool_size: usize,
	/// Dial timeout applied when a `connection.json` does not carry one.
	#[serde(default = "default_dial_timeout_secs")]
	pub dial_timeout_secs: u64,
	/// Peer CA; its presence enables mutual TLS for dial-back chaincodes.
	#[serde(default)]
	pub tls: Option<TlsSettings>,
	/// Chaincodes the process runtime knows how to build and run.
	#[serde(default)]
	pub chaincodes: BTreeMap<ChaincodeId, ChaincodeDefinition>,
}

fn default_startup_timeout_secs() -> u64 {
	DEFAULT_STARTUP_TIMEOUT_SECS
}

fn default_stream_pool_size() -> usize {
	DEFAULT_STREAM_POOL_SIZE
}

fn default_dial_timeout_secs() -> u64 {
	DEFAULT_DIAL_TIMEOUT_SECS
}

/// PEM files of the CA used to issue chaincode client certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSettings {
	/// CA certificate.
	pub ca_cert: PathBuf,
	/// CA private key.
	pub ca_key: PathBuf,
}

impl TlsSettings {
	/// Reads the certificate and key PEM files.
	pub fn read_pem(&self) -> Result<(String, String)> {
		let read = |path: &Path| {
			std::fs::read_to_string(path).map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))
		};
		Ok((read(&self.ca_cert)?, read(&self.ca_key)?))
	}
}

/// How one chaincode is built and run by the process runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChaincodeDefinition {
	/// Command run to completion before start.
	#[serde(default)]
	pub build: Option<CommandSpec>,
	/// Long-running chaincode process, for chaincodes that dial back to the peer.
	#[serde(default)]
	pub run: Option<CommandSpec>,
	/// `connection.json` of a chaincode that runs as an external server.
	#[serde(default)]
	pub connection: Option<PathBuf>,
	/// Working directory of build and run commands.
	#[serde(default)]
	pub working_dir: Option<PathBuf>,
}

/// An external command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
	/// Program to execute.
	pub command: String,
	/// Arguments.
	#[serde(default)]
	pub args: Vec<String>,
	/// Extra environment variables.
	#[serde(default)]
	pub env: HashMap<String, String>,
}

impl LauncherConfig {
	/// Loads, resolves and validates a configuration file.
	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path).map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
		let mut config = Self::from_toml_str(&raw)?;
		if let Some(base) = path.parent() {
			config.resolve_paths(base);
		}
		config.validate()?;
		Ok(config)
	}

	/// Parses configuration without touching the filesystem or validating.
	pub fn from_toml_str(raw: &str) -> Result<Self> {
		toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
	}

	/// Checks values that deserialization cannot express.
	pub fn validate(&self) -> Result<()> {
		if self.peer_address.trim().is_empty() {
			return Err(Error::Config("peer_address must not be empty".into()));
		}
		if self.startup_timeout_secs == 0 {
			return Err(Error::Config("startup_timeout_secs must be at least 1".into()));
		}
		if self.stream_pool_size == 0 {
			return Err(Error::Config("stream_pool_size must be at least 1".into()));
		}

		for (ccid, definition) in &self.chaincodes {
			if definition.run.is_none() && definition.connection.is_none() {
				return Err(Error::Config(format!("chaincode {ccid} needs either `run` or `connection`")));
			}
			let commands = [("build", &definition.build), ("run", &definition.run)];
			for (kind, spec) in commands {
				if spec.as_ref().is_some_and(|spec| spec.command.trim().is_empty()) {
					return Err(Error::Config(format!("chaincode {ccid}: {kind} command must not be empty")));
				}
			}
		}
		Ok(())
	}

	/// Startup timeout as a [`Duration`].
	pub fn startup_timeout(&self) -> Duration {
		Duration::from_secs(self.startup_timeout_secs)
	}

	/// Default dial timeout as a [`Duration`].
	pub fn dial_timeout(&self) -> Duration {
		Duration::from_secs(self.dial_timeout_secs)
	}

	fn resolve_paths(&mut self, base: &Path) {
		let resolve = |path: &mut PathBuf| {
			if path.is_relative() {
				*path = base.join(&*path);
			}
		};
		if let Some(tls) = &mut self.tls {
			resolve(&mut tls.ca_cert);
			resolve(&mut tls.ca_key);
		}
		for definition in self.chaincodes.values_mut() {
			if let Some(path) = &mut definition.connection {
				resolve(path);
			}
			if let Some(path) = &mut definition.working_dir {
				resolve(path);
			}
		}
	}
}
