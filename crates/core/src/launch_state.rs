//! One-shot completion signal for a launch generation.

use tokio::sync::watch;

use crate::Error;

/// Terminal value of a launch: `Ok(())` once the chaincode registered, or the error that ended it.
pub type LaunchOutcome = Result<(), Error>;

/// Completion signal shared by every caller waiting on one launch generation.
///
/// The outcome is written at most once. The first [`notify`](Self::notify) wins and later calls
/// are ignored, so racing completion paths (timeout, startup failure, runtime exit) can all report
/// without coordinating. Any number of tasks may wait on [`done`](Self::done).
#[derive(Debug)]
pub struct LaunchState {
	generation: u64,
	tx: watch::Sender<Option<LaunchOutcome>>,
}

impl LaunchState {
	/// Creates an unresolved state for the given registry generation.
	pub fn new(generation: u64) -> Self {
		let (tx, _rx) = watch::channel(None);
		Self { generation, tx }
	}

	/// Registry generation this state belongs to.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Records the terminal outcome and releases all waiters.
	///
	/// Returns `false` when the state was already resolved; the earlier outcome is kept.
	pub fn notify(&self, outcome: LaunchOutcome) -> bool {
		self.tx.send_if_modified(|slot| {
			if slot.is_some() {
				return false;
			}
			*slot = Some(outcome);
			true
		})
	}

	/// Resolves once an outcome has been recorded.
	pub async fn done(&self) {
		let mut rx = self.tx.subscribe();
		// The sender lives in `self`, so the channel cannot close while we wait.
		let _ = rx.wait_for(Option::is_some).await;
	}

	/// Returns `true` once an outcome has been recorded.
	pub fn is_done(&self) -> bool {
		self.tx.borrow().is_some()
	}

	/// The recorded outcome, if any.
	pub fn outcome(&self) -> Option<LaunchOutcome> {
		self.tx.borrow().clone()
	}

	/// The recorded error; `None` while unresolved or when the launch succeeded.
	pub fn err(&self) -> Option<Error> {
		match &*self.tx.borrow() {
			Some(Err(e)) => Some(e.clone()),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::time::Duration;

	use super::*;
	use crate::ChaincodeId;

	#[test]
	fn first_notify_wins() {
		let state = LaunchState::new(1);
		assert!(!state.is_done());
		assert!(state.err().is_none());

		assert!(state.notify(Err(Error::Exited(0))));
		assert!(!state.notify(Err(Error::StartupTimeout(ChaincodeId::from("cc")))));
		assert!(!state.notify(Ok(())));

		assert!(state.is_done());
		assert_eq!(state.err().map(|e| e.to_string()).as_deref(), Some("container exited with 0"));
	}

	#[test]
	fn successful_outcome_has_no_error() {
		let state = LaunchState::new(3);
		state.notify(Ok(()));
		assert!(state.is_done());
		assert!(state.err().is_none());
		assert!(matches!(state.outcome(), Some(Ok(()))));
		assert_eq!(state.generation(), 3);
	}

	#[tokio::test]
	async fn done_releases_every_waiter() {
		let state = Arc::new(LaunchState::new(1));
		let mut waiters = Vec::new();
		for _ in 0..16 {
			let state = Arc::clone(&state);
			waiters.push(tokio::spawn(async move {
				state.done().await;
				state.err().map(|e| e.to_string())
			}));
		}

		tokio::task::yield_now().await;
		state.notify(Err(Error::other("boom")));

		for waiter in waiters {
			let seen = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
			assert_eq!(seen.as_deref(), Some("boom"));
		}
	}

	#[tokio::test]
	async fn done_after_resolution_returns_immediately() {
		let state = LaunchState::new(1);
		state.notify(Ok(()));
		tokio::time::timeout(Duration::from_secs(1), state.done()).await.unwrap();
	}
}
