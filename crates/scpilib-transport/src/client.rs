//! TCP client for SCPI servers.
//!
//! [`ScpiClient`] sends command lines and reads back complete replies. A
//! reply is complete at the first `\r\n` that is not inside a binary block,
//! so array answers in any data format arrive whole.
//!
//! # Example
//!
//! ```no_run
//! use scpilib_transport::ScpiClient;
//! use scpilib_text_io::{DataFormat, decode_values};
//!
//! # async fn example() -> scpilib_core::Result<()> {
//! let mut client = ScpiClient::connect("192.168.1.50:5025").await?;
//! println!("{}", client.query_text("*IDN?").await?);
//!
//! client.query(b"DATAFormat DOUBLE").await?;
//! let reply = client.query(b"WAVEform?").await?;
//! let samples = decode_values(&reply[..reply.len() - 2], DataFormat::Double)?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use scpilib_core::error::{Error, Result};
use scpilib_text_io::protocol::{self, TERMINATOR};

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time to wait for a reply (2 seconds).
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// A connection to an SCPI server.
#[derive(Debug)]
pub struct ScpiClient {
    /// The underlying TCP stream, `None` after `close()` is called.
    stream: Option<TcpStream>,
    /// The address string for logging.
    addr: String,
    /// Bytes received but not yet returned.
    pending: BytesMut,
    reply_timeout: Duration,
}

impl ScpiClient {
    /// Connect to a `host:port` address using the default timeout.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a `host:port` address, giving up after `timeout`.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(addr = %addr, timeout_ms = timeout.as_millis(), "connecting");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "connection failed");
                map_connect_error(e, addr)
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "failed to set TCP_NODELAY (continuing anyway)");
        }

        tracing::info!(addr = %addr, "connected");
        Ok(Self {
            stream: Some(stream),
            addr: addr.to_string(),
            pending: BytesMut::with_capacity(4096),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    /// Change how long [`query`](ScpiClient::query) waits for a reply.
    pub fn set_reply_timeout(&mut self, timeout: Duration) {
        self.reply_timeout = timeout;
    }

    /// The address this client connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the connection is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Send one command line. A `\n` is appended unless the line already
    /// ends in `\r` or `\n`.
    pub async fn send(&mut self, line: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        tracing::trace!(addr = %self.addr, data = %String::from_utf8_lossy(line), "sending");

        let mut framed = line.to_vec();
        if !matches!(framed.last(), Some(b'\r' | b'\n')) {
            framed.push(b'\n');
        }
        stream.write_all(&framed).await.map_err(map_io_error)?;
        stream.flush().await.map_err(map_io_error)?;
        Ok(())
    }

    /// Send `line` and wait for its complete reply, terminator included.
    ///
    /// Lines that produce no answer (for example a lone `*RST`) get no
    /// reply, so querying them ends in [`Error::Timeout`]; use
    /// [`send`](ScpiClient::send) for those.
    pub async fn query(&mut self, line: &[u8]) -> Result<Vec<u8>> {
        self.send(line).await?;
        self.read_reply().await
    }

    /// Like [`query`](ScpiClient::query) for text replies, returning the
    /// reply without its terminator.
    pub async fn query_text(&mut self, line: &str) -> Result<String> {
        let reply = self.query(line.as_bytes()).await?;
        let body = reply.strip_suffix(TERMINATOR).unwrap_or(&reply);
        Ok(String::from_utf8_lossy(body).into_owned())
    }

    /// Read the next complete reply.
    pub async fn read_reply(&mut self) -> Result<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + self.reply_timeout;
        loop {
            if let Some(len) = protocol::reply_len(&self.pending) {
                let reply = self.pending.split_to(len).to_vec();
                tracing::trace!(addr = %self.addr, bytes = reply.len(), "reply received");
                return Ok(reply);
            }

            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
            match tokio::time::timeout_at(deadline, stream.read_buf(&mut self.pending)).await {
                Ok(Ok(0)) => {
                    tracing::warn!(addr = %self.addr, "peer closed connection");
                    return Err(Error::ConnectionLost);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::error!(addr = %self.addr, error = %e, "receive failed");
                    return Err(map_io_error(e));
                }
                Err(_) => return Err(Error::Timeout),
            }
        }
    }

    /// Shut the connection down.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::warn!(addr = %self.addr, error = %e, "shutdown failed (continuing anyway)");
            }
            tracing::info!(addr = %self.addr, "connection closed");
        }
        Ok(())
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {addr}"))
        }
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
