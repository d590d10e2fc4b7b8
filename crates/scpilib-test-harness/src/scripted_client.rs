//! Scripted TCP client for end-to-end server testing.
//!
//! [`ScriptedClient`] connects to a running server and plays an ordered
//! script of command lines, checking that each reply matches byte for byte.
//!
//! # Example
//!
//! ```no_run
//! use scpilib_test_harness::ScriptedClient;
//!
//! # async fn example(addr: std::net::SocketAddr) -> Result<(), String> {
//! let mut client = ScriptedClient::new();
//! client.expect(b"*IDN?", b"scpilib,demo-instrument,0,0.1.0\r\n");
//! client.expect(b"SOUR:CURR:UPPE 42", b"ACK\r\n");
//! client.expect(b"*RST", b"");
//! client.run(addr).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::trace;

/// A scripted command and the reply it must produce.
#[derive(Debug, Clone)]
struct Step {
    /// The line to send, without terminator.
    command: Vec<u8>,
    /// The exact bytes expected back. Empty means no reply.
    reply: Vec<u8>,
}

/// An expectation-driven client for checking a server over TCP.
///
/// Steps are played in order on a single connection. Each command is sent
/// with a `\n` terminator, and exactly as many bytes as the expected reply
/// are then read back and compared. A step expecting an empty reply reads
/// nothing; the next step's read would see any stray bytes.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    steps: VecDeque<Step>,
    timeout: Option<Duration>,
}

impl ScriptedClient {
    /// Create a client with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail a step whose reply takes longer than `timeout` to arrive.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Append a command and the reply it must produce.
    pub fn expect(&mut self, command: &[u8], reply: &[u8]) {
        self.steps.push_back(Step {
            command: command.to_vec(),
            reply: reply.to_vec(),
        });
    }

    /// Number of steps in the script.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the script is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Connect to `addr` and play the whole script.
    pub async fn run(mut self, addr: SocketAddr) -> Result<(), String> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| format!("failed to connect to {addr}: {e}"))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        for (i, step) in self.steps.drain(..).enumerate() {
            let mut line = step.command.clone();
            line.push(b'\n');
            stream
                .write_all(&line)
                .await
                .map_err(|e| format!("step {i}: write error: {e}"))?;

            let mut buf = vec![0u8; step.reply.len()];
            let mut total_read = 0;
            while total_read < buf.len() {
                let n = tokio::time::timeout(timeout, stream.read(&mut buf[total_read..]))
                    .await
                    .map_err(|_| format!("step {i}: timed out after {total_read} bytes"))?
                    .map_err(|e| format!("step {i}: read error: {e}"))?;
                if n == 0 {
                    return Err(format!(
                        "step {i}: server disconnected after {total_read} bytes (expected {})",
                        buf.len()
                    ));
                }
                total_read += n;
            }
            trace!(step = i, reply = ?String::from_utf8_lossy(&buf), "scripted reply");

            if buf != step.reply {
                return Err(format!(
                    "step {i}: reply mismatch for {:?}: expected {:?}, got {:?}",
                    String::from_utf8_lossy(&step.command),
                    String::from_utf8_lossy(&step.reply),
                    String::from_utf8_lossy(&buf)
                ));
            }
        }
        Ok(())
    }

    /// Play the script in a background task.
    pub fn spawn(self, addr: SocketAddr) -> JoinHandle<Result<(), String>> {
        tokio::spawn(self.run(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    /// Echo each line back upper-cased, with `\r\n`.
    async fn upper_echo() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = format!("{}\r\n", line.to_uppercase());
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn script_passes_on_matching_replies() {
        let addr = upper_echo().await;
        let mut client = ScriptedClient::new();
        client.expect(b"abc", b"ABC\r\n");
        client.expect(b"x;y", b"X;Y\r\n");
        assert_eq!(client.len(), 2);
        client.run(addr).await.unwrap();
    }

    #[tokio::test]
    async fn script_reports_mismatch() {
        let addr = upper_echo().await;
        let mut client = ScriptedClient::new();
        client.expect(b"abc", b"abc\r\n");
        let err = client.run(addr).await.unwrap_err();
        assert!(err.contains("step 0: reply mismatch"), "{err}");
    }
}
