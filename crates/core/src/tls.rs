//! Client TLS material for dial-back chaincodes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rcgen::{
	BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
	KeyUsagePurpose,
};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{ChaincodeId, Error, PeerConnection, Result, TlsBundle};

/// A PEM certificate and its private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertKeyPair {
	/// PEM certificate.
	pub cert: String,
	/// PEM private key.
	pub key: String,
}

/// Issues client certificates for chaincodes.
pub trait CertGenerator: Send + Sync {
	/// Returns a fresh certificate and key for `ccid` and binds the certificate to that identity.
	fn generate(&self, ccid: &ChaincodeId) -> Result<CertKeyPair>;
}

/// [`CertGenerator`] that signs client certificates with the peer's CA.
///
/// The SHA-256 of every issued certificate is remembered so that a chaincode presenting it can be
/// mapped back to its identity with [`identify`](Self::identify).
pub struct CaCertGenerator {
	ca_cert: Certificate,
	ca_key: KeyPair,
	ca_pem: String,
	issued: RwLock<HashMap<[u8; 32], ChaincodeId>>,
}

impl CaCertGenerator {
	/// Loads the CA from PEM encoded certificate and key.
	pub fn from_pem(ca_cert_pem: &str, ca_key_pem: &str) -> Result<Self> {
		let ca_key = KeyPair::from_pem(ca_key_pem).map_err(Error::tls)?;
		let params = CertificateParams::from_ca_cert_pem(ca_cert_pem).map_err(Error::tls)?;
		let ca_cert = params.self_signed(&ca_key).map_err(Error::tls)?;
		Ok(Self {
			ca_cert,
			ca_key,
			ca_pem: ca_cert_pem.to_string(),
			issued: RwLock::new(HashMap::new()),
		})
	}

	/// Creates a throwaway self-signed CA.
	pub fn self_signed(common_name: &str) -> Result<Self> {
		let ca_key = KeyPair::generate().map_err(Error::tls)?;
		let mut params = CertificateParams::new(Vec::<String>::new()).map_err(Error::tls)?;
		params.distinguished_name = DistinguishedName::new();
		params.distinguished_name.push(DnType::CommonName, common_name);
		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign, KeyUsagePurpose::DigitalSignature];
		let ca_cert = params.self_signed(&ca_key).map_err(Error::tls)?;
		let ca_pem = ca_cert.pem();
		Ok(Self {
			ca_cert,
			ca_key,
			ca_pem,
			issued: RwLock::new(HashMap::new()),
		})
	}

	/// PEM certificate of the CA, distributed to chaincodes as their root.
	pub fn ca_pem(&self) -> &str {
		&self.ca_pem
	}

	/// Returns the chaincode a DER certificate was issued to, if it came from this generator.
	pub fn identify(&self, cert_der: &[u8]) -> Option<ChaincodeId> {
		let hash: [u8; 32] = Sha256::digest(cert_der).into();
		self.issued.read().get(&hash).cloned()
	}
}

impl CertGenerator for CaCertGenerator {
	fn generate(&self, ccid: &ChaincodeId) -> Result<CertKeyPair> {
		let key = KeyPair::generate().map_err(Error::tls)?;
		let mut params = CertificateParams::new(Vec::<String>::new()).map_err(Error::tls)?;
		params.distinguished_name = DistinguishedName::new();
		params.distinguished_name.push(DnType::CommonName, ccid.as_str());
		params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
		params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
		let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).map_err(Error::tls)?;

		let hash: [u8; 32] = Sha256::digest(cert.der()).into();
		self.issued.write().insert(hash, ccid.clone());
		debug!(chaincode = %ccid, "issued chaincode client certificate");

		Ok(CertKeyPair {
			cert: cert.pem(),
			key: key.serialize_pem(),
		})
	}
}

/// Builds the [`PeerConnection`] handed to runtimes for the peer-as-server topology.
#[derive(Clone)]
pub struct ClientInfoProvider {
	peer_address: String,
	ca_cert: String,
	cert_generator: Option<Arc<dyn CertGenerator>>,
}

impl ClientInfoProvider {
	/// Connection info without TLS.
	pub fn plaintext(peer_address: impl Into<String>) -> Self {
		Self {
			peer_address: peer_address.into(),
			ca_cert: String::new(),
			cert_generator: None,
		}
	}

	/// Connection info with a per-chaincode mutual TLS bundle rooted at `ca_cert`.
	pub fn mutual_tls(peer_address: impl Into<String>, ca_cert: impl Into<String>, cert_generator: Arc<dyn CertGenerator>) -> Self {
		Self {
			peer_address: peer_address.into(),
			ca_cert: ca_cert.into(),
			cert_generator: Some(cert_generator),
		}
	}

	/// Peer address chaincodes dial back to.
	pub fn peer_address(&self) -> &str {
		&self.peer_address
	}

	/// Returns `true` when a TLS bundle is issued per chaincode.
	pub fn tls_enabled(&self) -> bool {
		self.cert_generator.is_some()
	}

	/// Assembles the connection info for `ccid`, issuing a fresh certificate when TLS is enabled.
	pub fn chaincode_client_info(&self, ccid: &ChaincodeId) -> Result<PeerConnection> {
		let tls = match &self.cert_generator {
			Some(generator) => {
				let pair = generator.generate(ccid).map_err(|e| Error::CertGeneration {
					ccid: ccid.clone(),
					reason: Box::new(e),
				})?;
				Some(TlsBundle {
					client_cert: pair.cert,
					client_key: pair.key,
					root_cert: self.ca_cert.clone(),
				})
			}
			None => None,
		};

		Ok(PeerConnection {
			address: self.peer_address.clone(),
			tls,
		})
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::connection::parse_certs;

	struct CountingGenerator {
		calls: AtomicUsize,
		fail: bool,
	}

	impl CertGenerator for CountingGenerator {
		fn generate(&self, ccid: &ChaincodeId) -> Result<CertKeyPair> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if self.fail {
				return Err(Error::other("ca offline"));
			}
			Ok(CertKeyPair {
				cert: format!("cert-{ccid}"),
				key: format!("key-{ccid}"),
			})
		}
	}

	#[test]
	fn plaintext_provider_has_no_bundle() {
		let provider = ClientInfoProvider::plaintext("peer:7052");
		let info = provider.chaincode_client_info(&"cc1".into()).unwrap();
		assert_eq!(info.address, "peer:7052");
		assert!(info.tls.is_none());
		assert!(!provider.tls_enabled());
	}

	#[test]
	fn mutual_tls_provider_issues_bundle_per_call() {
		let generator = Arc::new(CountingGenerator {
			calls: AtomicUsize::new(0),
			fail: false,
		});
		let provider = ClientInfoProvider::mutual_tls("peer:7052", "root-pem", generator.clone());

		let info = provider.chaincode_client_info(&"cc1".into()).unwrap();
		assert_eq!(
			info.tls,
			Some(TlsBundle {
				client_cert: "cert-cc1".into(),
				client_key: "key-cc1".into(),
				root_cert: "root-pem".into(),
			})
		);
		provider.chaincode_client_info(&"cc1".into()).unwrap();
		assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn generator_failure_names_the_chaincode() {
		let generator = Arc::new(CountingGenerator {
			calls: AtomicUsize::new(0),
			fail: true,
		});
		let provider = ClientInfoProvider::mutual_tls("peer:7052", "root-pem", generator);
		let err = provider.chaincode_client_info(&"cc9".into()).unwrap_err();
		assert_eq!(err.to_string(), "failed to generate TLS certificates for cc9: ca offline");
	}

	#[test]
	fn ca_generator_issues_identifiable_certificates() {
		let ca = CaCertGenerator::self_signed("peer-ca").unwrap();
		let pair = ca.generate(&"asset:1.0".into()).unwrap();
		assert!(pair.cert.starts_with("-----BEGIN CERTIFICATE-----"));
		assert!(pair.key.contains("PRIVATE KEY"));

		let der = parse_certs(&pair.cert).unwrap().remove(0);
		assert_eq!(ca.identify(der.as_ref()), Some(ChaincodeId::from("asset:1.0")));
		assert_eq!(ca.identify(b"not issued here"), None);
	}

	#[test]
	fn ca_generator_round_trips_through_pem() {
		let original = CaCertGenerator::self_signed("peer-ca").unwrap();
		let key_pem = original.ca_key.serialize_pem();
		let reloaded = CaCertGenerator::from_pem(original.ca_pem(), &key_pem).unwrap();

		assert_eq!(reloaded.ca_pem(), original.ca_pem());
		let pair = reloaded.generate(&"cc".into()).unwrap();
		assert!(!pair.cert.is_empty());
	}

	#[test]
	fn ca_generator_rejects_garbage_pem() {
		assert!(matches!(CaCertGenerator::from_pem("nope", "nope"), Err(Error::Tls(_))));
	}
}
