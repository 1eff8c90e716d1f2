//! End-to-end launch scenarios against scripted runtimes, run on paused time.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cclaunch_core::metrics::LaunchMetrics;
use cclaunch_core::stream::{ChaincodeConnection, ChaincodeStream, Dialer, Streamer, TcpDialer};
use cclaunch_core::tls::ClientInfoProvider;
use cclaunch_core::{
	ChaincodeId, ChaincodeServerInfo, ConnectionHandler, Error, LaunchRegistry, PeerConnection, Registry, Result, Runtime,
	RuntimeLauncher, StreamHandler,
};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ScriptedRuntime {
	build_delay: Duration,
	build_error: Option<&'static str>,
	server: Option<ChaincodeServerInfo>,
	run_for: Duration,
	exit_code: i32,
	builds: AtomicUsize,
	starts: AtomicUsize,
}

#[async_trait]
impl Runtime for ScriptedRuntime {
	async fn build(&self, _ccid: &ChaincodeId) -> Result<Option<ChaincodeServerInfo>> {
		self.builds.fetch_add(1, Ordering::SeqCst);
		tokio::time::sleep(self.build_delay).await;
		match self.build_error {
			Some(reason) => Err(Error::other(reason)),
			None => Ok(self.server.clone()),
		}
	}

	async fn start(&self, _ccid: &ChaincodeId, peer: &PeerConnection) -> Result<()> {
		assert!(peer.tls.is_none());
		self.starts.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn wait(&self, _ccid: &ChaincodeId) -> Result<i32> {
		tokio::time::sleep(self.run_for).await;
		Ok(self.exit_code)
	}

	async fn stop(&self, _ccid: &ChaincodeId) -> Result<()> {
		Ok(())
	}
}

#[derive(Default)]
struct CountingHandler {
	calls: AtomicUsize,
}

#[async_trait]
impl StreamHandler for CountingHandler {
	async fn handle_chaincode_streams(&self, _ccid: &ChaincodeId, _streams: Vec<ChaincodeStream>) -> Result<()> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

struct Fixture {
	launcher: RuntimeLauncher,
	runtime: Arc<ScriptedRuntime>,
	registry: Arc<Registry>,
	metrics: Arc<LaunchMetrics>,
}

fn fixture(runtime: ScriptedRuntime, connections: Arc<dyn ConnectionHandler>) -> Fixture {
	let runtime = Arc::new(runtime);
	let registry = Arc::new(Registry::new());
	let metrics = Arc::new(LaunchMetrics::new());
	let launcher = RuntimeLauncher::new(
		runtime.clone(),
		registry.clone(),
		connections,
		ClientInfoProvider::plaintext("peer0.example.com:7052"),
	)
	.with_startup_timeout(STARTUP_TIMEOUT)
	.with_metrics(metrics.clone());
	Fixture {
		launcher,
		runtime,
		registry,
		metrics,
	}
}

fn tcp_streamer() -> Arc<dyn ConnectionHandler> {
	Arc::new(Streamer::new(Arc::new(TcpDialer), Streamer::DEFAULT_POOL_SIZE))
}

fn spawn_launch(f: &Fixture, ccid: &str, handler: Arc<dyn StreamHandler>) -> JoinHandle<Result<()>> {
	let launcher = f.launcher.clone();
	let ccid = ChaincodeId::from(ccid);
	tokio::spawn(async move { launcher.launch(&ccid, handler).await })
}

async fn join_all(handles: Vec<JoinHandle<Result<()>>>) -> Vec<String> {
	let mut messages = Vec::with_capacity(handles.len());
	for handle in handles {
		let err = handle.await.unwrap().expect_err("every launch ends in an error-shaped outcome");
		messages.push(err.to_string());
	}
	messages
}

#[tokio::test(start_paused = true)]
async fn concurrent_launches_share_one_build() {
	let f = fixture(
		ScriptedRuntime {
			build_delay: Duration::from_secs(1),
			run_for: Duration::from_secs(2),
			..Default::default()
		},
		tcp_streamer(),
	);
	let handler: Arc<dyn StreamHandler> = Arc::new(CountingHandler::default());

	let handles = (0..16).map(|_| spawn_launch(&f, "X", handler.clone())).collect();
	let messages = join_all(handles).await;

	assert_eq!(f.runtime.builds.load(Ordering::SeqCst), 1);
	assert_eq!(f.runtime.starts.load(Ordering::SeqCst), 1);
	assert!(messages.iter().all(|m| m == "chaincode registration failed: container exited with 0"), "{messages:?}");
}

#[tokio::test(start_paused = true)]
async fn build_failure_reaches_every_waiter_and_deregisters() {
	let f = fixture(
		ScriptedRuntime {
			build_delay: Duration::from_millis(10),
			build_error: Some("no such package"),
			..Default::default()
		},
		tcp_streamer(),
	);
	let handler: Arc<dyn StreamHandler> = Arc::new(CountingHandler::default());
	let ccid = ChaincodeId::from("X");

	let handles = (0..8).map(|_| spawn_launch(&f, "X", handler.clone())).collect();
	let messages = join_all(handles).await;

	let raw = "error building chaincode: no such package";
	let wrapped = format!("chaincode registration failed: {raw}");
	assert_eq!(messages.iter().filter(|m| *m == raw).count(), 1, "{messages:?}");
	assert_eq!(messages.iter().filter(|m| **m == wrapped).count(), 7, "{messages:?}");
	assert_eq!(f.metrics.snapshot(&ccid).failures, 1);
	assert!(f.registry.launch_state(&ccid).is_none());

	let err = f.launcher.launch(&ccid, handler).await.unwrap_err();
	assert_eq!(err.to_string(), raw);
	assert_eq!(f.runtime.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_build_times_out_the_originator() {
	let f = fixture(
		ScriptedRuntime {
			build_delay: Duration::from_secs(10),
			run_for: Duration::from_secs(1),
			..Default::default()
		},
		tcp_streamer(),
	);
	let handler: Arc<dyn StreamHandler> = Arc::new(CountingHandler::default());
	let ccid = ChaincodeId::from("slow");

	let originator = spawn_launch(&f, "slow", handler.clone());
	tokio::time::sleep(Duration::from_secs(1)).await;
	let joiner = spawn_launch(&f, "slow", handler);

	let err = originator.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::StartupTimeout(_)), "{err}");
	assert_eq!(err.to_string(), "timeout expired while starting chaincode slow for transaction");
	assert_eq!(f.metrics.snapshot(&ccid).timeouts, 1);
	assert_eq!(f.metrics.snapshot(&ccid).unsuccessful_launches, 1);
	assert!(f.registry.launch_state(&ccid).is_none());

	// The timeout is published through the launch state, so the joiner sees it wrapped.
	let err = joiner.await.unwrap().unwrap_err();
	assert!(err.is_timeout(), "{err}");
	assert_eq!(f.metrics.snapshot(&ccid).timeouts, 1);

	// The build itself is not cancelled and runs to completion in the background.
	tokio::time::sleep(Duration::from_secs(10)).await;
	assert_eq!(f.runtime.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn joiner_has_no_startup_timeout_of_its_own() {
	let f = fixture(ScriptedRuntime::default(), tcp_streamer());
	let ccid = ChaincodeId::from("elsewhere");

	// A launch driven by someone else that takes far longer than the startup timeout.
	let (state, already_started) = f.registry.launching(&ccid);
	assert!(!already_started);
	let joiner = spawn_launch(&f, "elsewhere", Arc::new(CountingHandler::default()));

	tokio::time::sleep(STARTUP_TIMEOUT * 4).await;
	assert!(!joiner.is_finished());

	state.notify(Err(Error::Exited(2)));
	let err = joiner.await.unwrap().unwrap_err();
	assert_eq!(err.to_string(), "chaincode registration failed: container exited with 2");
	assert!(f.registry.launch_state(&ccid).is_some(), "joiners never deregister");
	assert_eq!(f.runtime.builds.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct PoolCounters {
	dials: AtomicUsize,
	closes: AtomicUsize,
}

struct FlakyDialer {
	counters: Arc<PoolCounters>,
	fail_at: usize,
}

#[async_trait]
impl Dialer for FlakyDialer {
	async fn dial(&self, ccid: &ChaincodeId, _info: &ChaincodeServerInfo) -> Result<Box<dyn ChaincodeConnection>> {
		let index = self.counters.dials.fetch_add(1, Ordering::SeqCst);
		if index == self.fail_at {
			return Err(Error::other("connection refused"));
		}
		let (near, far) = tokio::io::duplex(256);
		Ok(Box::new(InMemoryConnection {
			ccid: ccid.clone(),
			io: Some(near),
			_far: far,
			closed: CancellationToken::new(),
			counters: Arc::clone(&self.counters),
		}))
	}
}

struct InMemoryConnection {
	ccid: ChaincodeId,
	io: Option<DuplexStream>,
	_far: DuplexStream,
	closed: CancellationToken,
	counters: Arc<PoolCounters>,
}

#[async_trait]
impl ChaincodeConnection for InMemoryConnection {
	async fn connect(&mut self) -> Result<ChaincodeStream> {
		let io = self.io.take().ok_or_else(|| Error::StreamClosed(self.ccid.clone()))?;
		Ok(ChaincodeStream::new(self.ccid.clone(), 0, Box::new(io), self.closed.clone()))
	}

	async fn close(&mut self) -> Result<()> {
		self.counters.closes.fetch_add(1, Ordering::SeqCst);
		self.closed.cancel();
		Ok(())
	}
}

#[tokio::test(start_paused = true)]
async fn partial_stream_pool_is_never_handed_over() {
	let counters = Arc::new(PoolCounters::default());
	let dialer = FlakyDialer {
		counters: Arc::clone(&counters),
		fail_at: 6,
	};
	let f = fixture(
		ScriptedRuntime {
			server: Some(ChaincodeServerInfo::plaintext("ext.example.com:9999", Duration::from_secs(1))),
			..Default::default()
		},
		Arc::new(Streamer::new(Arc::new(dialer), 10)),
	);
	let handler = Arc::new(CountingHandler::default());
	let ccid = ChaincodeId::from("ext");

	let err = f.launcher.launch(&ccid, handler.clone()).await.unwrap_err();

	assert_eq!(
		err.to_string(),
		"connection to ext failed: error cannot create connection for ext: connection refused"
	);
	assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
	assert_eq!(counters.closes.load(Ordering::SeqCst), 6);
	assert_eq!(f.metrics.snapshot(&ccid).failures, 1);
	assert!(f.registry.launch_state(&ccid).is_none());
}

#[tokio::test(start_paused = true)]
async fn finished_server_session_terminates_the_launch() {
	let counters = Arc::new(PoolCounters::default());
	let dialer = FlakyDialer {
		counters: Arc::clone(&counters),
		fail_at: usize::MAX,
	};
	let f = fixture(
		ScriptedRuntime {
			server: Some(ChaincodeServerInfo::plaintext("ext.example.com:9999", Duration::from_secs(1))),
			..Default::default()
		},
		Arc::new(Streamer::new(Arc::new(dialer), 10)),
	);
	let handler = Arc::new(CountingHandler::default());

	let err = f.launcher.launch(&"ext".into(), handler.clone()).await.unwrap_err();

	assert_eq!(err.to_string(), "chaincode registration failed: connection to ext terminated");
	assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
	assert_eq!(counters.closes.load(Ordering::SeqCst), 10);
}

#[tokio::test(start_paused = true)]
async fn clean_exit_is_reported_as_an_error() {
	let f = fixture(
		ScriptedRuntime {
			run_for: Duration::from_secs(2),
			exit_code: 0,
			..Default::default()
		},
		tcp_streamer(),
	);
	let ccid = ChaincodeId::from("cc1");

	let err = f.launcher.launch(&ccid, Arc::new(CountingHandler::default())).await.unwrap_err();

	assert!(err.to_string().contains("container exited with 0"), "{err}");
	let stats = f.metrics.snapshot(&ccid);
	assert_eq!((stats.launches, stats.unsuccessful_launches), (1, 1));
	assert_eq!((stats.failures, stats.timeouts), (0, 0));
	assert!(
		(2.0..2.5).contains(&stats.total_duration_secs),
		"duration {}",
		stats.total_duration_secs
	);
}

#[tokio::test(start_paused = true)]
async fn two_callers_observe_the_same_outcome() {
	let f = fixture(
		ScriptedRuntime {
			build_delay: Duration::from_secs(1),
			run_for: Duration::from_secs(3),
			exit_code: 0,
			..Default::default()
		},
		tcp_streamer(),
	);
	let handler: Arc<dyn StreamHandler> = Arc::new(CountingHandler::default());

	let first = spawn_launch(&f, "cc2", handler.clone());
	let second = spawn_launch(&f, "cc2", handler);
	let messages = join_all(vec![first, second]).await;

	assert_eq!(messages[0], messages[1]);
	assert_eq!(f.runtime.builds.load(Ordering::SeqCst), 1);
	let stats = f.metrics.snapshot(&"cc2".into());
	assert_eq!((stats.launches, stats.unsuccessful_launches), (2, 1));
}
