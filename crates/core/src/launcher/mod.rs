//! Launch orchestration.
//!
//! [`RuntimeLauncher::launch`] deduplicates launches through a [`LaunchRegistry`]. The first caller
//! for a chaincode (the originator) spawns a detached driver that builds the chaincode and then
//! either streams to its server or starts it and waits for it to exit. Every caller then waits for
//! the first of:
//!
//! * the shared [`LaunchState`] resolving,
//! * a startup failure reported by the driver (originator only),
//! * the startup timeout (originator only).
//!
//! Whatever wins is written to the launch state so that joiners observe the same outcome. The
//! originator's side of that race runs in a detached task, so it completes even when the caller
//! drops its future. The driver is never cancelled: after a timeout it keeps running and its late
//! result is ignored.

use std::sync::Arc;
use std::time::Duration;

use cclaunch_worker::{TaskClass, spawn};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::LauncherConfig;
use crate::metrics::{LaunchMetricsSink, NopSink};
use crate::stream::{ConnectionHandler, StreamHandler, Streamer, TcpDialer};
use crate::tls::{CaCertGenerator, ClientInfoProvider};
use crate::{ChaincodeId, Error, LaunchRegistry, LaunchState, Result, Runtime};

/// Startup timeout used unless configured otherwise.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(300);

struct Inner {
	runtime: Arc<dyn Runtime>,
	connections: Arc<dyn ConnectionHandler>,
	client_info: ClientInfoProvider,
}

/// Launches chaincodes and reports how each launch ended.
#[derive(Clone)]
pub struct RuntimeLauncher {
	inner: Arc<Inner>,
	registry: Arc<dyn LaunchRegistry>,
	startup_timeout: Duration,
	metrics: Arc<dyn LaunchMetricsSink>,
}

/// How the driver of a launch finished.
enum Exit {
	/// Failed before the chaincode was up; reported to the originator.
	Startup(Error),
	/// The chaincode ran and went away; published through the launch state.
	Terminated(Error),
}

impl RuntimeLauncher {
	/// Creates a launcher with the default startup timeout and no metrics.
	pub fn new(
		runtime: Arc<dyn Runtime>,
		registry: Arc<dyn LaunchRegistry>,
		connections: Arc<dyn ConnectionHandler>,
		client_info: ClientInfoProvider,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				runtime,
				connections,
				client_info,
			}),
			registry,
			startup_timeout: DEFAULT_STARTUP_TIMEOUT,
			metrics: Arc::new(NopSink),
		}
	}

	/// Builds a launcher from configuration, dialing external servers over TCP.
	///
	/// When the configuration names a CA, dial-back chaincodes get a client certificate signed by it.
	pub fn from_config(
		config: &LauncherConfig,
		runtime: Arc<dyn Runtime>,
		registry: Arc<dyn LaunchRegistry>,
		metrics: Arc<dyn LaunchMetricsSink>,
	) -> Result<Self> {
		let client_info = match &config.tls {
			Some(tls) => {
				let (ca_cert, ca_key) = tls.read_pem()?;
				let generator = CaCertGenerator::from_pem(&ca_cert, &ca_key)?;
				ClientInfoProvider::mutual_tls(config.peer_address.clone(), ca_cert, Arc::new(generator))
			}
			None => ClientInfoProvider::plaintext(config.peer_address.clone()),
		};
		let connections = Arc::new(Streamer::new(Arc::new(TcpDialer), config.stream_pool_size));

		Ok(Self::new(runtime, registry, connections, client_info)
			.with_startup_timeout(config.startup_timeout())
			.with_metrics(metrics))
	}

	/// Sets how long an originator waits before giving up on a launch.
	pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
		self.startup_timeout = startup_timeout;
		self
	}

	/// Sets the metrics sink.
	pub fn with_metrics(mut self, metrics: Arc<dyn LaunchMetricsSink>) -> Self {
		self.metrics = metrics;
		self
	}

	/// Configured startup timeout.
	pub fn startup_timeout(&self) -> Duration {
		self.startup_timeout
	}

	/// Launches `ccid`, or joins the launch already in progress, and waits for its outcome.
	///
	/// `handler` receives the stream pool when the chaincode turns out to host its own server; it
	/// is ignored by joiners.
	///
	/// Returns `Ok(())` only when the launch was marked ready. Every other ending is an error,
	/// including a clean exit of the chaincode (`container exited with 0`). An originator whose
	/// launch ends in error deregisters the chaincode so the next call starts a fresh generation.
	///
	/// The originator's wait runs in its own task. Dropping the returned future detaches from the
	/// launch but the startup timer, the failure report and the deregistration still happen.
	pub async fn launch(&self, ccid: &ChaincodeId, handler: Arc<dyn StreamHandler>) -> Result<()> {
		info!(chaincode = %ccid, "launching chaincode");
		let started = Instant::now();

		let (state, already_started) = self.registry.launching(ccid);
		if already_started {
			debug!(chaincode = %ccid, generation = state.generation(), "joining launch in progress");
			return self.settle(ccid, &state, None, started).await;
		}

		let (fail_tx, fail_rx) = oneshot::channel();
		spawn(
			TaskClass::Launch,
			drive(Arc::clone(&self.inner), ccid.clone(), handler, Arc::clone(&state), fail_tx),
		);
		let launcher = self.clone();
		let owned = ccid.clone();
		let settled = spawn(TaskClass::Launch, async move {
			launcher.settle(&owned, &state, Some(fail_rx), started).await
		});
		settled.await.map_err(|e| Error::other(format!("launch of {ccid} was aborted: {e}")))?
	}

	/// Waits for the first of the launch state, a startup failure and the startup timeout.
	///
	/// Only the originator passes `startup_failures`; it alone arms the timer and deregisters.
	async fn settle(
		&self,
		ccid: &ChaincodeId,
		state: &LaunchState,
		startup_failures: Option<oneshot::Receiver<Error>>,
		started: Instant,
	) -> Result<()> {
		let originator = startup_failures.is_some();
		let deadline = originator.then(|| started + self.startup_timeout);

		let startup_failure = async move {
			match startup_failures {
				Some(rx) => match rx.await {
					Ok(err) => err,
					Err(_) => std::future::pending().await,
				},
				None => std::future::pending().await,
			}
		};
		let timeout = async move {
			match deadline {
				Some(deadline) => tokio::time::sleep_until(deadline).await,
				None => std::future::pending().await,
			}
		};

		let result = tokio::select! {
			biased;
			_ = state.done() => match state.outcome() {
				Some(Err(e)) => {
					debug!(chaincode = %ccid, error = %e, "launch state resolved with error");
					Err(Error::Registration(Box::new(e)))
				}
				_ => Ok(()),
			},
			err = startup_failure => {
				state.notify(Err(err.clone()));
				self.metrics.inc_launch_failures(ccid);
				Err(err)
			}
			() = timeout => {
				let err = Error::StartupTimeout(ccid.clone());
				warn!(chaincode = %ccid, timeout = ?self.startup_timeout, "timeout expired while starting chaincode");
				state.notify(Err(err.clone()));
				self.metrics.inc_launch_timeouts(ccid);
				Err(err)
			}
		};

		let mut success = true;
		if let Err(e) = &result
			&& originator
		{
			success = false;
			error!(chaincode = %ccid, error = %e, "stopping due to error while launching");
			if let Err(e) = self.registry.deregister_generation(ccid, state.generation()) {
				debug!(chaincode = %ccid, error = %e, "deregister after failed launch");
			}
		}

		self.metrics.observe_launch_duration(ccid, success, started.elapsed().as_secs_f64());
		info!(chaincode = %ccid, success, joined = !originator, "launch complete");
		result
	}

	/// Stops the running instance of `ccid`.
	///
	/// The registry is left alone; the launch driver observes the exit through its own wait.
	pub async fn stop(&self, ccid: &ChaincodeId) -> Result<()> {
		self.inner.runtime.stop(ccid).await.map_err(|e| Error::Stop {
			ccid: ccid.clone(),
			reason: Box::new(e),
		})
	}
}

async fn drive(
	inner: Arc<Inner>,
	ccid: ChaincodeId,
	handler: Arc<dyn StreamHandler>,
	state: Arc<LaunchState>,
	startup_failure: oneshot::Sender<Error>,
) {
	match run(&inner, &ccid, handler).await {
		Exit::Terminated(err) => {
			debug!(chaincode = %ccid, error = %err, "chaincode terminated");
			state.notify(Err(err));
		}
		Exit::Startup(err) => {
			// The launch may already have settled, e.g. on timeout.
			if let Err(err) = startup_failure.send(err) {
				debug!(chaincode = %ccid, error = %err, "launch already settled, startup failure ignored");
				state.notify(Err(err));
			}
		}
	}
}

async fn run(inner: &Inner, ccid: &ChaincodeId, handler: Arc<dyn StreamHandler>) -> Exit {
	debug!(chaincode = %ccid, "building chaincode");
	let server = match inner.runtime.build(ccid).await {
		Ok(server) => server,
		Err(e) => return Exit::Startup(Error::Build(Box::new(e))),
	};

	if let Some(info) = server {
		info!(chaincode = %ccid, address = %info.address, "connecting to external chaincode server");
		return match inner.connections.stream(ccid, &info, handler).await {
			Ok(()) => Exit::Terminated(Error::ConnectionTerminated(ccid.clone())),
			Err(e) => {
				error!(chaincode = %ccid, address = %info.address, error = %e, "external chaincode stream failed");
				Exit::Startup(Error::Connection {
					ccid: ccid.clone(),
					reason: Box::new(e),
				})
			}
		};
	}

	let peer = match inner.client_info.chaincode_client_info(ccid) {
		Ok(peer) => peer,
		Err(e) => return Exit::Startup(Error::ConnectionInfo(Box::new(e))),
	};

	debug!(chaincode = %ccid, peer = %peer.address, tls = peer.tls.is_some(), "starting chaincode");
	if let Err(e) = inner.runtime.start(ccid, &peer).await {
		return Exit::Startup(Error::Start(Box::new(e)));
	}

	debug!(chaincode = %ccid, "waiting for chaincode exit");
	match inner.runtime.wait(ccid).await {
		Ok(code) => Exit::Terminated(Error::Exited(code)),
		Err(e) => Exit::Terminated(Error::Wait(Box::new(e))),
	}
}
