//! Chaincode identity.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of one chaincode instance, e.g. `asset:1.0` or a package id.
///
/// This is the deduplication key for launches: at most one launch generation exists per id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChaincodeId(String);

impl ChaincodeId {
	/// Wraps a raw identifier.
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// Returns the identifier as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ChaincodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ChaincodeId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

impl From<String> for ChaincodeId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl Borrow<str> for ChaincodeId {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl AsRef<str> for ChaincodeId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
