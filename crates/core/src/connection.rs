//! Connection information exchanged between the launcher and runtimes.
//!
//! A build produces either a [`ChaincodeServerInfo`] (the chaincode hosts its own server and the
//! peer dials it) or nothing, in which case the launcher hands the runtime a [`PeerConnection`]
//! describing how the chaincode dials back into the peer.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_rustls::rustls;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::{Error, Result};

/// Client TLS material handed to a chaincode so it can dial back with mutual TLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsBundle {
	/// PEM client certificate issued for the chaincode.
	pub client_cert: String,
	/// PEM private key of `client_cert`.
	pub client_key: String,
	/// PEM root CA certificate of the peer.
	pub root_cert: String,
}

/// Where a dial-back chaincode finds the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
	/// Peer chaincode listen address.
	pub address: String,
	/// Client TLS bundle, absent when mutual TLS is disabled.
	pub tls: Option<TlsBundle>,
}

/// TLS settings the peer uses when dialing an external chaincode server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTls {
	/// PEM root certificates trusted for the server.
	pub root_cert: String,
	/// PEM client certificate presented when the server requires client auth.
	pub client_cert: Option<String>,
	/// PEM private key of `client_cert`.
	pub client_key: Option<String>,
}

impl ServerTls {
	/// Builds a rustls client configuration from the PEM material.
	pub fn rustls_config(&self) -> Result<rustls::ClientConfig> {
		let mut roots = RootCertStore::empty();
		for cert in parse_certs(&self.root_cert)? {
			roots.add(cert).map_err(Error::tls)?;
		}
		if roots.is_empty() {
			return Err(Error::Tls("no root certificates found".into()));
		}

		let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
		match (&self.client_cert, &self.client_key) {
			(Some(cert), Some(key)) => builder.with_client_auth_cert(parse_certs(cert)?, parse_key(key)?).map_err(Error::tls),
			_ => Ok(builder.with_no_client_auth()),
		}
	}
}

/// Dial parameters for an external chaincode server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
	/// TLS settings, `None` for plaintext.
	pub tls: Option<ServerTls>,
	/// Upper bound for establishing one connection.
	pub dial_timeout: Duration,
}

/// An externally reachable chaincode server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodeServerInfo {
	/// `host:port` of the chaincode server.
	pub address: String,
	/// How to dial it.
	pub client_config: ClientConfig,
}

/// On-disk `connection.json` layout emitted by chaincode builds for the server model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionDocument {
	/// `host:port` of the chaincode server.
	pub address: String,
	/// Dial timeout in seconds; the launcher default applies when absent.
	pub dial_timeout_secs: Option<u64>,
	/// Whether the server speaks TLS.
	pub tls_required: bool,
	/// Whether the server requires a client certificate.
	pub client_auth_required: bool,
	/// PEM root certificate of the server.
	pub root_cert: Option<String>,
	/// PEM client certificate.
	pub client_cert: Option<String>,
	/// PEM client key.
	pub client_key: Option<String>,
}

impl ChaincodeServerInfo {
	/// Creates plaintext server info.
	pub fn plaintext(address: impl Into<String>, dial_timeout: Duration) -> Self {
		Self {
			address: address.into(),
			client_config: ClientConfig { tls: None, dial_timeout },
		}
	}

	/// Validates a [`ConnectionDocument`] and converts it.
	pub fn from_document(doc: ConnectionDocument, default_dial_timeout: Duration) -> Result<Self> {
		if doc.address.trim().is_empty() {
			return Err(Error::Config("chaincode address is required".into()));
		}

		let tls = if doc.tls_required {
			let root_cert = doc
				.root_cert
				.filter(|pem| !pem.trim().is_empty())
				.ok_or_else(|| Error::Config("root_cert is required when tls_required is set".into()))?;
			let (client_cert, client_key) = if doc.client_auth_required {
				match (doc.client_cert, doc.client_key) {
					(Some(cert), Some(key)) if !cert.trim().is_empty() && !key.trim().is_empty() => (Some(cert), Some(key)),
					_ => {
						return Err(Error::Config(
							"client_cert and client_key are required when client_auth_required is set".into(),
						));
					}
				}
			} else {
				(None, None)
			};
			Some(ServerTls {
				root_cert,
				client_cert,
				client_key,
			})
		} else {
			None
		};

		Ok(Self {
			address: doc.address,
			client_config: ClientConfig {
				tls,
				dial_timeout: doc.dial_timeout_secs.map_or(default_dial_timeout, Duration::from_secs),
			},
		})
	}

	/// Reads and validates a `connection.json` file.
	pub fn from_connection_file(path: &Path, default_dial_timeout: Duration) -> Result<Self> {
		let raw = std::fs::read(path)?;
		let doc: ConnectionDocument =
			serde_json::from_slice(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
		Self::from_document(doc, default_dial_timeout)
	}
}

pub(crate) fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
	let mut reader = pem.as_bytes();
	let certs = rustls_pemfile::certs(&mut reader).collect::<std::result::Result<Vec<_>, _>>().map_err(Error::tls)?;
	if certs.is_empty() {
		return Err(Error::Tls("no certificates found in PEM".into()));
	}
	Ok(certs)
}

fn parse_key(pem: &str) -> Result<PrivateKeyDer<'static>> {
	let mut reader = pem.as_bytes();
	rustls_pemfile::private_key(&mut reader)
		.map_err(Error::tls)?
		.ok_or_else(|| Error::Tls("no private key found in PEM".into()))
}
