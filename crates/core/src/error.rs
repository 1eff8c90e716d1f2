//! Error type shared by every launcher component.

use std::io;
use std::sync::Arc;

use crate::ChaincodeId;

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
///
/// Errors are `Clone` because the terminal value of a launch is handed to every caller waiting on
/// it. Wrapping variants box the underlying [`Error`] so the display reads as a cause chain, e.g.
/// `chaincode registration failed: error building chaincode: <cause>`.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The runtime failed to build the chaincode.
	#[error("error building chaincode: {0}")]
	Build(Box<Error>),
	/// The pool of streams to an external chaincode server could not be opened.
	#[error("connection to {ccid} failed: {reason}")]
	Connection {
		/// Chaincode being connected to.
		ccid: ChaincodeId,
		/// Underlying failure.
		reason: Box<Error>,
	},
	/// Connection information for a dial-back chaincode could not be assembled.
	#[error("could not get connection info: {0}")]
	ConnectionInfo(Box<Error>),
	/// The runtime failed to start the chaincode.
	#[error("error starting container: {0}")]
	Start(Box<Error>),
	/// The runtime failed while waiting for the chaincode to exit.
	#[error("failed to wait on container exit: {0}")]
	Wait(Box<Error>),
	/// The chaincode process or container exited, whatever the exit code.
	#[error("container exited with {0}")]
	Exited(i32),
	/// The streaming session with an external chaincode server ended.
	#[error("connection to {0} terminated")]
	ConnectionTerminated(ChaincodeId),
	/// No terminal outcome arrived within the startup timeout.
	#[error("timeout expired while starting chaincode {0} for transaction")]
	StartupTimeout(ChaincodeId),
	/// Outcome observed through the shared launch state.
	#[error("chaincode registration failed: {0}")]
	Registration(Box<Error>),
	/// The runtime failed to stop the chaincode.
	#[error("failed to stop chaincode {ccid}: {reason}")]
	Stop {
		/// Chaincode being stopped.
		ccid: ChaincodeId,
		/// Underlying failure.
		reason: Box<Error>,
	},
	/// Client TLS material could not be issued.
	#[error("failed to generate TLS certificates for {ccid}: {reason}")]
	CertGeneration {
		/// Chaincode the certificate was requested for.
		ccid: ChaincodeId,
		/// Underlying failure.
		reason: Box<Error>,
	},
	/// One connection of a stream pool could not be dialed.
	#[error("error cannot create connection for {ccid}: {reason}")]
	Dial {
		/// Chaincode being dialed.
		ccid: ChaincodeId,
		/// Underlying failure.
		reason: Box<Error>,
	},
	/// A dialed connection refused to open its stream.
	#[error("error creating stream to {ccid}: {reason}")]
	OpenStream {
		/// Chaincode being dialed.
		ccid: ChaincodeId,
		/// Underlying failure.
		reason: Box<Error>,
	},
	/// Network-level failure reaching an address.
	#[error("error creating connection to {address}: {reason}")]
	Transport {
		/// Address being dialed.
		address: String,
		/// Description of the failure.
		reason: String,
	},
	/// The stream was closed together with its connection.
	#[error("stream to {0} is closed")]
	StreamClosed(ChaincodeId),
	/// Certificates, keys or TLS configuration were unusable.
	#[error("invalid TLS material: {0}")]
	Tls(String),
	/// No launch is registered for the chaincode.
	#[error("no launch registered for chaincode {0}")]
	NotRegistered(ChaincodeId),
	/// The runtime has no definition for the chaincode.
	#[error("chaincode {0} is not defined")]
	UnknownChaincode(ChaincodeId),
	/// The runtime already supervises a live instance of the chaincode.
	#[error("chaincode {0} is already running")]
	AlreadyRunning(ChaincodeId),
	/// An external command exited unsuccessfully.
	#[error("command `{command}` exited with {code}")]
	CommandFailed {
		/// Program that was run.
		command: String,
		/// Its exit code, `-1` when killed by a signal.
		code: i32,
	},
	/// Configuration could not be loaded or is inconsistent.
	#[error("invalid configuration: {0}")]
	Config(String),
	/// Input/output errors.
	#[error("{0}")]
	Io(Arc<io::Error>),
	/// Any other failure reported by a collaborator.
	#[error("{0}")]
	Other(String),
}

impl Error {
	/// Creates an [`Error::Other`] from any message.
	pub fn other(message: impl Into<String>) -> Self {
		Self::Other(message.into())
	}

	pub(crate) fn tls(err: impl std::fmt::Display) -> Self {
		Self::Tls(err.to_string())
	}

	/// Returns `true` for the synthetic startup timeout.
	pub fn is_timeout(&self) -> bool {
		match self {
			Self::StartupTimeout(_) => true,
			Self::Registration(inner) => inner.is_timeout(),
			_ => false,
		}
	}
}

impl From<io::Error> for Error {
	fn from(err: io::Error) -> Self {
		Self::Io(Arc::new(err))
	}
}
