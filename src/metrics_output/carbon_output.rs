use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::GraphiteConfig;
use crate::error::{AdapterError, Result};
use crate::metrics_output::MetricOutput;

/// Writes plaintext records to a Carbon listener over a persistent TCP
/// connection.
///
/// The connection is opened on first use and reused by later writes. Any
/// failure drops it so the next write reconnects, as does finding it closed
/// by Carbon before a write.
pub struct CarbonOutput {
    address: String,
    timeout: Duration,
    connection: Mutex<Option<TcpStream>>,
}

impl CarbonOutput {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            connection: Mutex::new(None),
        }
    }

    pub fn from_config(config: &GraphiteConfig) -> Self {
        Self::new(config.carbon.address(), config.request_timeout())
    }

    async fn connect(&self) -> Result<TcpStream> {
        let connect = TcpStream::connect(&self.address);
        let stream = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| {
                AdapterError::Transport(format!("timed out connecting to carbon at {}", self.address))
            })?
            .map_err(|e| {
                AdapterError::Transport(format!("failed to connect to carbon at {}: {e}", self.address))
            })?;
        debug!(address = %self.address, "connected to carbon");
        Ok(stream)
    }

    async fn transmit(&self, stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
        let write = async {
            stream.write_all(payload).await?;
            stream.flush().await
        };
        tokio::time::timeout(self.timeout, write)
            .await
            .map_err(|_| {
                AdapterError::Transport(format!("timed out writing to carbon at {}", self.address))
            })?
            .map_err(|e| {
                AdapterError::Transport(format!("failed to write to carbon at {}: {e}", self.address))
            })
    }
}

impl MetricOutput for CarbonOutput {
    type Error = AdapterError;

    async fn send_payload(&self, payload: &[u8]) -> Result<()> {
        let mut connection = self.connection.lock().await;

        let cached = connection.take().filter(|stream| {
            let closed = peer_closed(stream);
            if closed {
                debug!(address = %self.address, "carbon closed the connection, reconnecting");
            }
            !closed
        });
        let mut stream = match cached {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        match self.transmit(&mut stream, payload).await {
            Ok(()) => {
                *connection = Some(stream);
                Ok(())
            }
            Err(e) => {
                warn!(address = %self.address, error = %e, "dropping carbon connection");
                Err(e)
            }
        }
    }
}

/// Carbon never writes back, so anything readable on an idle connection
/// means it was closed or broken.
fn peer_closed(stream: &TcpStream) -> bool {
    let mut buf = [0u8; 1];
    match stream.try_read(&mut buf) {
        Ok(_) => true,
        Err(e) => e.kind() != ErrorKind::WouldBlock,
    }
}
