//! Peer-to-chaincode streams for chaincodes that host their own server.
//!
//! [`Streamer`] dials a fixed-size pool of connections to the chaincode, opens one stream on each
//! and hands the whole set to a [`StreamHandler`]. Opening is all-or-nothing: if any connection or
//! stream fails, everything opened so far is closed and the handler is never called.

mod tcp;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use self::tcp::TcpDialer;
use crate::{ChaincodeId, ChaincodeServerInfo, Error, Result};

/// Byte transport underneath a [`ChaincodeStream`].
pub trait StreamIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> StreamIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// One bidirectional message stream to a chaincode.
///
/// Messages are opaque length-delimited frames. The stream stops yielding frames as soon as its
/// connection is closed.
pub struct ChaincodeStream {
	ccid: ChaincodeId,
	index: usize,
	framed: Framed<Box<dyn StreamIo>, LengthDelimitedCodec>,
	closed: CancellationToken,
}

impl ChaincodeStream {
	/// Wraps `io`; cancelling `closed` ends the stream.
	pub fn new(ccid: ChaincodeId, index: usize, io: Box<dyn StreamIo>, closed: CancellationToken) -> Self {
		Self {
			ccid,
			index,
			framed: Framed::new(io, LengthDelimitedCodec::new()),
			closed,
		}
	}

	/// Chaincode at the other end.
	pub fn ccid(&self) -> &ChaincodeId {
		&self.ccid
	}

	/// Position of this stream within its pool.
	pub fn index(&self) -> usize {
		self.index
	}

	pub(crate) fn with_index(mut self, index: usize) -> Self {
		self.index = index;
		self
	}

	/// Sends one message.
	pub async fn send(&mut self, frame: Bytes) -> Result<()> {
		if self.closed.is_cancelled() {
			return Err(Error::StreamClosed(self.ccid.clone()));
		}
		self.framed.send(frame).await?;
		Ok(())
	}

	/// Receives the next message, `None` once the peer hung up or the connection was closed.
	pub async fn recv(&mut self) -> Option<Result<Bytes>> {
		tokio::select! {
			biased;
			_ = self.closed.cancelled() => None,
			frame = self.framed.next() => frame.map(|frame| frame.map(|bytes| bytes.freeze()).map_err(Error::from)),
		}
	}
}

/// A dialed connection to a chaincode server.
#[async_trait]
pub trait ChaincodeConnection: Send {
	/// Opens the connection's stream.
	async fn connect(&mut self) -> Result<ChaincodeStream>;

	/// Releases the connection and ends its stream.
	async fn close(&mut self) -> Result<()>;
}

/// Establishes connections to chaincode servers.
#[async_trait]
pub trait Dialer: Send + Sync {
	/// Dials `info` on behalf of `ccid`.
	async fn dial(&self, ccid: &ChaincodeId, info: &ChaincodeServerInfo) -> Result<Box<dyn ChaincodeConnection>>;
}

/// Owns the message protocol spoken over a stream pool.
#[async_trait]
pub trait StreamHandler: Send + Sync {
	/// Serves `streams` until the chaincode session ends.
	async fn handle_chaincode_streams(&self, ccid: &ChaincodeId, streams: Vec<ChaincodeStream>) -> Result<()>;
}

/// Runs a streaming session with an external chaincode server.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
	/// Opens the stream pool, hands it to `handler` and returns once the session ended.
	async fn stream(&self, ccid: &ChaincodeId, info: &ChaincodeServerInfo, handler: Arc<dyn StreamHandler>) -> Result<()>;
}

/// [`ConnectionHandler`] opening a fixed-size pool through a [`Dialer`].
pub struct Streamer {
	dialer: Arc<dyn Dialer>,
	pool_size: usize,
}

impl Streamer {
	/// Pool size used when nothing else is configured.
	pub const DEFAULT_POOL_SIZE: usize = 10;

	/// Creates a streamer opening `pool_size` connections per session, at least one.
	pub fn new(dialer: Arc<dyn Dialer>, pool_size: usize) -> Self {
		Self {
			dialer,
			pool_size: pool_size.max(1),
		}
	}

	/// Connections opened per session.
	pub fn pool_size(&self) -> usize {
		self.pool_size
	}

	async fn open_pool(
		&self,
		ccid: &ChaincodeId,
		info: &ChaincodeServerInfo,
		connections: &mut Vec<Box<dyn ChaincodeConnection>>,
	) -> Result<Vec<ChaincodeStream>> {
		let mut streams = Vec::with_capacity(self.pool_size);
		for index in 0..self.pool_size {
			let mut connection = self.dialer.dial(ccid, info).await.map_err(|e| Error::Dial {
				ccid: ccid.clone(),
				reason: Box::new(e),
			})?;
			let opened = connection.connect().await;
			connections.push(connection);
			let stream = opened.map_err(|e| Error::OpenStream {
				ccid: ccid.clone(),
				reason: Box::new(e),
			})?;
			debug!(chaincode = %ccid, index, address = %info.address, "opened chaincode stream");
			streams.push(stream.with_index(index));
		}
		Ok(streams)
	}
}

#[async_trait]
impl ConnectionHandler for Streamer {
	async fn stream(&self, ccid: &ChaincodeId, info: &ChaincodeServerInfo, handler: Arc<dyn StreamHandler>) -> Result<()> {
		debug!(chaincode = %ccid, address = %info.address, pool_size = self.pool_size, "starting external chaincode session");

		let mut connections = Vec::with_capacity(self.pool_size);
		let result = match self.open_pool(ccid, info, &mut connections).await {
			Ok(streams) => {
				if let Err(e) = handler.handle_chaincode_streams(ccid, streams).await {
					warn!(chaincode = %ccid, error = %e, "chaincode stream handler failed");
				}
				debug!(chaincode = %ccid, "external chaincode session ended");
				Ok(())
			}
			Err(e) => Err(e),
		};

		for mut connection in connections {
			if let Err(e) = connection.close().await {
				debug!(chaincode = %ccid, error = %e, "ignoring connection close failure");
			}
		}
		result
	}
}
