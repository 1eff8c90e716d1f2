//! Stream handler used by the binary.
//!
//! The launcher core does not interpret chaincode messages. This handler only drains every stream,
//! logs frame sizes, and treats the first frame as the chaincode's registration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cclaunch_core::stream::ChaincodeStream;
use cclaunch_core::{ChaincodeId, Registry, Result, StreamHandler};
use cclaunch_worker::{TaskClass, TaskSet};
use tracing::{debug, info, warn};

pub struct LoggingStreamHandler {
	registry: Arc<Registry>,
}

impl LoggingStreamHandler {
	pub fn new(registry: Arc<Registry>) -> Self {
		Self { registry }
	}
}

#[async_trait]
impl StreamHandler for LoggingStreamHandler {
	async fn handle_chaincode_streams(&self, ccid: &ChaincodeId, streams: Vec<ChaincodeStream>) -> Result<()> {
		info!(chaincode = %ccid, streams = streams.len(), "serving chaincode streams");
		let registered = Arc::new(AtomicBool::new(false));
		let mut readers = TaskSet::new(TaskClass::Io);

		for mut stream in streams {
			let registry = Arc::clone(&self.registry);
			let registered = Arc::clone(&registered);
			let ccid = ccid.clone();
			readers.spawn(async move {
				let mut frames = 0usize;
				while let Some(frame) = stream.recv().await {
					let frame = frame?;
					frames += 1;
					debug!(chaincode = %ccid, stream = stream.index(), len = frame.len(), "chaincode frame");
					if !registered.swap(true, Ordering::SeqCst) {
						match registry.ready(&ccid) {
							Ok(()) => info!(chaincode = %ccid, "chaincode registered"),
							Err(e) => warn!(chaincode = %ccid, error = %e, "registration without launch"),
						}
					}
				}
				Ok::<_, cclaunch_core::Error>(frames)
			});
		}

		let mut frames = 0;
		let mut first_error = None;
		for outcome in readers.join_all().await {
			match outcome {
				Ok(count) => frames += count,
				Err(e) => {
					warn!(chaincode = %ccid, error = %e, "chaincode stream failed");
					first_error.get_or_insert(e);
				}
			}
		}
		info!(chaincode = %ccid, frames, "chaincode streams closed");
		first_error.map_or(Ok(()), Err)
	}
}
