//! Chaincode runtime backend.

use async_trait::async_trait;

use crate::{ChaincodeId, ChaincodeServerInfo, PeerConnection, Result};

/// Builds, starts, waits on and stops chaincode instances.
///
/// Implementations are shared between concurrent launches of different chaincodes and must be
/// safe to call from any task.
#[async_trait]
pub trait Runtime: Send + Sync {
	/// Builds the chaincode.
	///
	/// Returns `Some` when the build produced an external server the peer must dial, `None` when the
	/// chaincode is to be started and will dial back.
	async fn build(&self, ccid: &ChaincodeId) -> Result<Option<ChaincodeServerInfo>>;

	/// Starts a chaincode that dials back to the peer described by `peer`.
	async fn start(&self, ccid: &ChaincodeId, peer: &PeerConnection) -> Result<()>;

	/// Resolves with the exit code once the started instance terminates.
	async fn wait(&self, ccid: &ChaincodeId) -> Result<i32>;

	/// Stops the running instance.
	async fn stop(&self, ccid: &ChaincodeId) -> Result<()>;
}
