use std::future::Future;

use tokio::task::JoinHandle;

use crate::TaskClass;

/// Spawns a detached async task tagged with `class` on the current runtime.
///
/// # Panics
///
/// Panics when called outside a tokio runtime.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	tokio::spawn(fut)
}
