use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChaincodeConnection, ChaincodeStream, Dialer, StreamIo};
use crate::{ChaincodeId, ChaincodeServerInfo, Error, Result};

/// [`Dialer`] over TCP, wrapped in rustls when the server info carries TLS settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
	async fn dial(&self, ccid: &ChaincodeId, info: &ChaincodeServerInfo) -> Result<Box<dyn ChaincodeConnection>> {
		let address = info.address.clone();
		let transport = |reason: String| Error::Transport {
			address: address.clone(),
			reason,
		};

		let tls = match &info.client_config.tls {
			Some(tls) => {
				let config = tls.rustls_config()?;
				let server_name = ServerName::try_from(host_of(&address).to_string()).map_err(|e| transport(e.to_string()))?;
				Some((TlsConnector::from(Arc::new(config)), server_name))
			}
			None => None,
		};

		let connect = async {
			let tcp = TcpStream::connect(&address).await.map_err(|e| transport(e.to_string()))?;
			tcp.set_nodelay(true).map_err(|e| transport(e.to_string()))?;
			let io: Box<dyn StreamIo> = match tls {
				Some((connector, server_name)) => {
					Box::new(connector.connect(server_name, tcp).await.map_err(|e| transport(e.to_string()))?)
				}
				None => Box::new(tcp),
			};
			Ok::<_, Error>(io)
		};

		let io = tokio::time::timeout(info.client_config.dial_timeout, connect)
			.await
			.map_err(|_| transport(format!("dial timed out after {:?}", info.client_config.dial_timeout)))??;

		debug!(chaincode = %ccid, %address, tls = info.client_config.tls.is_some(), "created external chaincode connection");
		Ok(Box::new(TcpConnection {
			ccid: ccid.clone(),
			io: Some(io),
			closed: CancellationToken::new(),
		}))
	}
}

struct TcpConnection {
	ccid: ChaincodeId,
	io: Option<Box<dyn StreamIo>>,
	closed: CancellationToken,
}

#[async_trait]
impl ChaincodeConnection for TcpConnection {
	async fn connect(&mut self) -> Result<ChaincodeStream> {
		let io = self.io.take().ok_or_else(|| Error::StreamClosed(self.ccid.clone()))?;
		Ok(ChaincodeStream::new(self.ccid.clone(), 0, io, self.closed.clone()))
	}

	async fn close(&mut self) -> Result<()> {
		self.closed.cancel();
		self.io = None;
		Ok(())
	}
}

impl Drop for TcpConnection {
	fn drop(&mut self) {
		self.closed.cancel();
	}
}

/// Host part of `host:port`, without IPv6 brackets.
fn host_of(address: &str) -> &str {
	let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
	host.trim_start_matches('[').trim_end_matches(']')
}
