//! Launch registry.
//!
//! Tracks which chaincodes have a launch in flight so that concurrent launch requests for the
//! same identity share one build instead of racing each other.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{ChaincodeId, Error, LaunchState, Result};

/// Deduplicates launches per chaincode identity.
pub trait LaunchRegistry: Send + Sync {
	/// Looks up or creates the launch state for `ccid` in one atomic step.
	///
	/// Returns `(state, false)` to exactly one caller per generation, the originator. Every other
	/// caller until [`deregister`](Self::deregister) gets the same state and `true`.
	fn launching(&self, ccid: &ChaincodeId) -> (Arc<LaunchState>, bool);

	/// Removes the entry for `ccid` so that the next [`launching`](Self::launching) call starts a
	/// fresh generation.
	///
	/// # Errors
	///
	/// Returns [`Error::NotRegistered`] when there is no entry.
	fn deregister(&self, ccid: &ChaincodeId) -> Result<()>;

	/// Like [`deregister`](Self::deregister), but only removes the entry while it still belongs to
	/// `generation`. A newer launch of the same chaincode is left alone.
	///
	/// # Errors
	///
	/// Returns [`Error::NotRegistered`] when there is no entry of that generation.
	fn deregister_generation(&self, ccid: &ChaincodeId, generation: u64) -> Result<()>;
}

#[derive(Default)]
struct RegistryState {
	launches: HashMap<ChaincodeId, Arc<LaunchState>>,
	next_generation: u64,
}

/// In-memory [`LaunchRegistry`].
///
/// A single mutex covers lookup and insertion so get-or-create cannot interleave. The lock is
/// never held across an await point; unrelated chaincodes only contend for the map itself.
#[derive(Default)]
pub struct Registry {
	state: Mutex<RegistryState>,
}

impl Registry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Marks the current launch of `ccid` as successful.
	///
	/// Called by the stream handler once the chaincode has registered over its stream. Waiters
	/// observe `Ok(())` and the entry stays registered.
	///
	/// # Errors
	///
	/// Returns [`Error::NotRegistered`] when no launch exists for `ccid`.
	pub fn ready(&self, ccid: &ChaincodeId) -> Result<()> {
		let state = self.launch_state(ccid).ok_or_else(|| Error::NotRegistered(ccid.clone()))?;
		if !state.notify(Ok(())) {
			debug!(chaincode = %ccid, generation = state.generation(), "launch already resolved, ignoring ready");
		}
		Ok(())
	}

	/// Returns the launch state of the current generation for `ccid`, if any.
	pub fn launch_state(&self, ccid: &ChaincodeId) -> Option<Arc<LaunchState>> {
		self.state.lock().launches.get(ccid).cloned()
	}

	/// Number of registered chaincodes.
	pub fn len(&self) -> usize {
		self.state.lock().launches.len()
	}

	/// Returns `true` if nothing is registered.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl LaunchRegistry for Registry {
	fn launching(&self, ccid: &ChaincodeId) -> (Arc<LaunchState>, bool) {
		let mut state = self.state.lock();
		let RegistryState { launches, next_generation } = &mut *state;
		match launches.entry(ccid.clone()) {
			Entry::Occupied(entry) => (Arc::clone(entry.get()), true),
			Entry::Vacant(entry) => {
				*next_generation += 1;
				let launch = Arc::new(LaunchState::new(*next_generation));
				debug!(chaincode = %ccid, generation = *next_generation, "registered new launch");
				(Arc::clone(entry.insert(launch)), false)
			}
		}
	}

	fn deregister(&self, ccid: &ChaincodeId) -> Result<()> {
		match self.state.lock().launches.remove(ccid) {
			Some(launch) => {
				debug!(chaincode = %ccid, generation = launch.generation(), "deregistered launch");
				Ok(())
			}
			None => Err(Error::NotRegistered(ccid.clone())),
		}
	}

	fn deregister_generation(&self, ccid: &ChaincodeId, generation: u64) -> Result<()> {
		let mut state = self.state.lock();
		match state.launches.get(ccid) {
			Some(launch) if launch.generation() == generation => {
				state.launches.remove(ccid);
				debug!(chaincode = %ccid, generation, "deregistered launch");
				Ok(())
			}
			_ => Err(Error::NotRegistered(ccid.clone())),
		}
	}
}

#[cfg(test)]
mod tests;
