use std::future::Future;

use tokio::task::{JoinError, JoinSet};

use crate::TaskClass;

/// A [`JoinSet`] whose tasks all share one [`TaskClass`].
///
/// Dropping the set aborts every task still running in it.
#[derive(Debug)]
pub struct TaskSet<T> {
	class: TaskClass,
	inner: JoinSet<T>,
}

impl<T> TaskSet<T>
where
	T: Send + 'static,
{
	/// Creates an empty set for the given task class.
	pub fn new(class: TaskClass) -> Self {
		Self { class, inner: JoinSet::new() }
	}

	/// Returns the number of tasks currently in the set.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	/// Returns `true` if the set is empty.
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	/// Spawns a future into the set.
	pub fn spawn<F>(&mut self, fut: F)
	where
		F: Future<Output = T> + Send + 'static,
	{
		tracing::trace!(worker_class = self.class.as_str(), pending = self.inner.len(), "worker.task_set.spawn");
		self.inner.spawn(fut);
	}

	/// Waits for the next completed task.
	pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
		self.inner.join_next().await
	}

	/// Waits for every task and returns their outputs in completion order.
	///
	/// Tasks that panicked or were cancelled are skipped.
	pub async fn join_all(mut self) -> Vec<T> {
		let mut outputs = Vec::with_capacity(self.inner.len());
		while let Some(joined) = self.inner.join_next().await {
			match joined {
				Ok(output) => outputs.push(output),
				Err(e) => tracing::warn!(worker_class = self.class.as_str(), error = %e, "worker task did not complete"),
			}
		}
		outputs
	}
}
