use std::sync::Barrier;
use std::thread;

use super::*;

#[test]
fn first_caller_originates_and_later_callers_join() {
	let registry = Registry::new();
	let ccid = ChaincodeId::from("asset:1.0");

	let (first, already_started) = registry.launching(&ccid);
	assert!(!already_started);

	let (second, already_started) = registry.launching(&ccid);
	assert!(already_started);
	assert!(Arc::ptr_eq(&first, &second));
	assert_eq!(registry.len(), 1);
}

#[test]
fn distinct_chaincodes_get_distinct_states() {
	let registry = Registry::new();
	let (a, a_started) = registry.launching(&ChaincodeId::from("a"));
	let (b, b_started) = registry.launching(&ChaincodeId::from("b"));

	assert!(!a_started);
	assert!(!b_started);
	assert!(!Arc::ptr_eq(&a, &b));
	assert_ne!(a.generation(), b.generation());
}

#[test]
fn deregister_starts_a_new_generation() {
	let registry = Registry::new();
	let ccid = ChaincodeId::from("asset:1.0");

	let (first, _) = registry.launching(&ccid);
	first.notify(Err(Error::Exited(1)));
	registry.deregister(&ccid).unwrap();
	assert!(registry.is_empty());

	let (second, already_started) = registry.launching(&ccid);
	assert!(!already_started);
	assert!(!second.is_done());
	assert!(second.generation() > first.generation());
}

#[test]
fn deregister_unknown_chaincode_reports_error() {
	let registry = Registry::new();
	let err = registry.deregister(&ChaincodeId::from("missing")).unwrap_err();
	assert!(matches!(err, Error::NotRegistered(ref id) if id.as_str() == "missing"));
}

#[test]
fn stale_generation_does_not_deregister_newer_launch() {
	let registry = Registry::new();
	let ccid = ChaincodeId::from("asset:1.0");

	let (first, _) = registry.launching(&ccid);
	registry.deregister_generation(&ccid, first.generation()).unwrap();
	let (second, _) = registry.launching(&ccid);

	let err = registry.deregister_generation(&ccid, first.generation()).unwrap_err();
	assert!(matches!(err, Error::NotRegistered(_)));
	let current = registry.launch_state(&ccid).unwrap();
	assert!(Arc::ptr_eq(&current, &second));
}

#[test]
fn ready_resolves_current_launch_successfully() {
	let registry = Registry::new();
	let ccid = ChaincodeId::from("asset:1.0");
	let (state, _) = registry.launching(&ccid);

	registry.ready(&ccid).unwrap();
	assert!(state.is_done());
	assert!(state.err().is_none());

	// A later termination does not overwrite the success.
	assert!(!state.notify(Err(Error::Exited(0))));
	assert!(registry.launch_state(&ccid).is_some());
}

#[test]
fn ready_without_launch_is_an_error() {
	let registry = Registry::new();
	assert!(matches!(registry.ready(&ChaincodeId::from("nope")), Err(Error::NotRegistered(_))));
}

#[test]
fn concurrent_launching_elects_exactly_one_originator() {
	const CALLERS: usize = 32;
	let registry = Arc::new(Registry::new());
	let barrier = Arc::new(Barrier::new(CALLERS));

	let handles: Vec<_> = (0..CALLERS)
		.map(|_| {
			let registry = Arc::clone(&registry);
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				barrier.wait();
				let (state, already_started) = registry.launching(&ChaincodeId::from("contended"));
				(state.generation(), already_started)
			})
		})
		.collect();

	let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
	let originators = results.iter().filter(|(_, started)| !started).count();
	assert_eq!(originators, 1);
	assert!(results.iter().all(|(generation, _)| *generation == results[0].0));
}
