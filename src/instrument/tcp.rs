//! SCPI over TCP.
//!
//! LAN-enabled meters expose a raw SCPI socket (port 5025 on Keysight
//! instruments). Commands are terminated with `\n`; every query produces exactly
//! one reply line. Nagle's algorithm is disabled so the short INITIATE/FETCH?
//! exchanges leave immediately.
//!
//! A reply that shows up after its query timed out is discarded before the next
//! query goes out, so every reply is read by the query that asked for it.

use crate::error::{AppResult, DaqError};
use crate::instrument::ScpiTransport;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default raw-socket SCPI port.
pub const DEFAULT_PORT: u16 = 5025;

/// Time allowed for establishing the connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Session with one instrument over a persistent TCP connection.
pub struct TcpScpiSession {
    name: String,
    stream: Mutex<BufReader<TcpStream>>,
    timeout: Duration,
}

impl TcpScpiSession {
    /// Connect to `host:port`.
    ///
    /// `response_timeout` bounds every reply read by [`ask`](ScpiTransport::ask).
    pub async fn connect(
        name: &str,
        host: &str,
        port: u16,
        response_timeout: Duration,
    ) -> AppResult<Self> {
        info!(device = name, "Opening device at {}:{}", host, port);

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                DaqError::Instrument(format!(
                    "Connection timeout to '{}' at {}:{}",
                    name, host, port
                ))
            })?
            .map_err(|e| {
                DaqError::Instrument(format!(
                    "Failed to connect to '{}' at {}:{}: {}",
                    name, host, port, e
                ))
            })?;

        stream.set_nodelay(true)?;

        Ok(Self {
            name: name.to_string(),
            stream: Mutex::new(BufReader::new(stream)),
            timeout: response_timeout,
        })
    }

    /// Drop whatever is already buffered or waiting on the socket.
    fn discard_stale_input(&self, stream: &mut BufReader<TcpStream>) -> AppResult<()> {
        let mut stale = stream.buffer().to_vec();
        stream.consume(stale.len());

        let mut chunk = [0u8; 256];
        loop {
            match stream.get_ref().try_read(&mut chunk) {
                // The closed connection is reported by the next read.
                Ok(0) => break,
                Ok(n) => stale.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(DaqError::Io(e)),
            }
        }

        if !stale.is_empty() {
            warn!(
                device = %self.name,
                "Discarded {} stale bytes: {:?}",
                stale.len(),
                String::from_utf8_lossy(&stale).trim()
            );
        }
        Ok(())
    }

    async fn write_line(&self, stream: &mut BufReader<TcpStream>, command: &str) -> AppResult<()> {
        debug!(device = %self.name, "<< {}", command);
        let line = format!("{}\n", command);
        stream.get_mut().write_all(line.as_bytes()).await?;
        stream.get_mut().flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ScpiTransport for TcpScpiSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, command: &str) -> AppResult<()> {
        let mut stream = self.stream.lock().await;
        self.write_line(&mut stream, command).await
    }

    async fn ask(&self, command: &str) -> AppResult<String> {
        let mut stream = self.stream.lock().await;
        self.discard_stale_input(&mut stream)?;
        self.write_line(&mut stream, command).await?;

        let mut response = String::new();
        match timeout(self.timeout, stream.read_line(&mut response)).await {
            Ok(Ok(0)) => Err(DaqError::ConnectionClosed(self.name.clone())),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                debug!(device = %self.name, ">> {}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(DaqError::Io(e)),
            Err(_) => Err(DaqError::Timeout {
                device: self.name.clone(),
                command: command.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}
