use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;

#[tokio::test]
async fn spawn_runs_on_current_runtime() {
	let handle = spawn(TaskClass::Launch, async { tokio::runtime::Handle::current().runtime_flavor() });
	assert_eq!(handle.await.unwrap(), tokio::runtime::RuntimeFlavor::CurrentThread);
}

#[test]
#[should_panic]
fn spawn_requires_a_runtime() {
	let _handle = spawn(TaskClass::Monitor, async {});
}

#[tokio::test]
async fn task_set_joins_every_task() {
	let counter = Arc::new(AtomicUsize::new(0));
	let mut set = TaskSet::new(TaskClass::Io);
	for i in 0..4 {
		let counter = Arc::clone(&counter);
		set.spawn(async move {
			counter.fetch_add(1, Ordering::SeqCst);
			i
		});
	}
	assert_eq!(set.len(), 4);

	let mut outputs = set.join_all().await;
	outputs.sort_unstable();
	assert_eq!(outputs, vec![0, 1, 2, 3]);
	assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn task_set_skips_panicked_tasks() {
	let mut set = TaskSet::new(TaskClass::Io);
	set.spawn(async { 1 });
	set.spawn(async {
		if true {
			panic!("boom");
		}
		2
	});

	assert_eq!(set.join_all().await, vec![1]);
}
