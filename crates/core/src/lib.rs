//! Chaincode launch orchestration.
//!
//! A [`RuntimeLauncher`] starts chaincodes through a [`Runtime`] backend and makes sure that
//! concurrent launch requests for the same [`ChaincodeId`] share a single build. Chaincodes either
//! dial back to the peer (the launcher hands the runtime a [`PeerConnection`]) or host their own
//! server, in which case a [`ConnectionHandler`] opens a pool of streams to it.

#![warn(missing_docs)]

pub mod config;
mod connection;
mod error;
mod identity;
mod launch_state;
mod launcher;
pub mod metrics;
pub mod process;
mod registry;
mod runtime;
pub mod stream;
pub mod tls;

pub use connection::{ChaincodeServerInfo, ClientConfig, ConnectionDocument, PeerConnection, ServerTls, TlsBundle};
pub use error::{Error, Result};
pub use identity::ChaincodeId;
pub use launch_state::{LaunchOutcome, LaunchState};
pub use launcher::{DEFAULT_STARTUP_TIMEOUT, RuntimeLauncher};
pub use registry::{LaunchRegistry, Registry};
pub use runtime::Runtime;
pub use stream::{ConnectionHandler, StreamHandler};
