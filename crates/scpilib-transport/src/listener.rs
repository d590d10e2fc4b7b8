//! TCP listener serving a [`Dispatcher`].
//!
//! One accept task runs per bound address and one task per accepted
//! connection. Connection tasks read the socket, cut the byte stream into
//! lines at every `\r` or `\n`, hand each line to
//! [`Dispatcher::input_as`] under the peer's [`ClientId`], and write the
//! reply back verbatim. Empty replies are not written. Dispatch runs on
//! tokio's blocking pool, so callbacks may block on instrument I/O without
//! stalling other connections.
//!
//! The number of concurrent connections across all addresses is capped by
//! [`ListenerConfig::max_clients`]; a connection beyond the cap is closed as
//! soon as it is accepted.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scpilib_core::ClientId;
use scpilib_core::error::{Error, Result};
use scpilib_text_io::Dispatcher;

use crate::hook::ConnectionHook;

/// The conventional SCPI raw-socket port.
pub const DEFAULT_PORT: u16 = 5025;

/// Longest line accepted before the connection is dropped.
const MAX_LINE: usize = 64 * 1024;

/// Largest accepted [`ListenerConfig::max_clients`].
pub const MAX_CLIENTS: usize = Semaphore::MAX_PERMITS;

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// TCP port. `0` picks a free port per address.
    pub port: u16,
    /// Listen on IPv4 (`0.0.0.0`).
    pub ipv4: bool,
    /// Listen on IPv6 (`::`).
    pub ipv6: bool,
    /// Maximum concurrent connections over all addresses.
    pub max_clients: usize,
    /// Close a connection that sends nothing for this long.
    pub read_timeout: Option<Duration>,
    /// Listen on exactly this address instead of the wildcard addresses.
    pub bind_address: Option<IpAddr>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            port: DEFAULT_PORT,
            ipv4: true,
            ipv6: false,
            max_clients: 10,
            read_timeout: None,
            bind_address: None,
        }
    }
}

impl ListenerConfig {
    fn addresses(&self) -> Vec<SocketAddr> {
        if let Some(ip) = self.bind_address {
            return vec![SocketAddr::new(ip, self.port)];
        }
        let mut addrs = Vec::new();
        if self.ipv6 {
            addrs.push(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), self.port));
        }
        if self.ipv4 {
            addrs.push(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port));
        }
        addrs
    }
}

/// A running TCP listener.
///
/// Dropping the listener does not stop it; call
/// [`shutdown`](ScpiListener::shutdown).
#[derive(Debug)]
pub struct ScpiListener {
    local_addrs: Vec<SocketAddr>,
    limit: Arc<Semaphore>,
    max_clients: usize,
    cancel: CancellationToken,
    accept_tasks: Vec<JoinHandle<()>>,
}

/// What every connection task shares.
struct Shared {
    dispatcher: Arc<Dispatcher>,
    hooks: Vec<Arc<dyn ConnectionHook>>,
    read_timeout: Option<Duration>,
}

impl ScpiListener {
    /// Bind the configured addresses and start accepting connections.
    ///
    /// When both IPv4 and IPv6 are enabled on a fixed port and the IPv6
    /// socket already covers IPv4 (a dual-stack host), the IPv4 bind is
    /// skipped. Any other bind failure is an error.
    pub async fn bind(
        dispatcher: Arc<Dispatcher>,
        config: ListenerConfig,
        hooks: Vec<Arc<dyn ConnectionHook>>,
    ) -> Result<Self> {
        if config.max_clients == 0 || config.max_clients > MAX_CLIENTS {
            return Err(Error::Transport(format!(
                "max_clients must be between 1 and {MAX_CLIENTS}, got {}",
                config.max_clients
            )));
        }
        let addresses = config.addresses();
        if addresses.is_empty() {
            return Err(Error::Transport("neither IPv4 nor IPv6 enabled".into()));
        }

        let mut listeners = Vec::new();
        for addr in addresses {
            match TcpListener::bind(addr).await {
                Ok(listener) => listeners.push(listener),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && addr.is_ipv4() && !listeners.is_empty() => {
                    debug!(addr = %addr, "IPv4 already served by the dual-stack IPv6 socket");
                }
                Err(e) => {
                    error!(addr = %addr, error = %e, "bind failed");
                    return Err(Error::Transport(format!("failed to bind {addr}: {e}")));
                }
            }
        }

        let cancel = CancellationToken::new();
        let limit = Arc::new(Semaphore::new(config.max_clients));
        let shared = Arc::new(Shared {
            dispatcher,
            hooks,
            read_timeout: config.read_timeout,
        });

        let mut local_addrs = Vec::new();
        let mut accept_tasks = Vec::new();
        for listener in listeners {
            let addr = listener.local_addr().map_err(Error::Io)?;
            info!(addr = %addr, max_clients = config.max_clients, "listening");
            local_addrs.push(addr);
            accept_tasks.push(tokio::spawn(accept_loop(
                listener,
                Arc::clone(&shared),
                Arc::clone(&limit),
                cancel.clone(),
            )));
        }

        Ok(ScpiListener {
            local_addrs,
            limit,
            max_clients: config.max_clients,
            cancel,
            accept_tasks,
        })
    }

    /// The bound addresses, with the actual ports.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// The first bound address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addrs.first().copied()
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.max_clients - self.limit.available_permits()
    }

    /// A token that stops the listener when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting, close every connection and wait for all tasks.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.accept_tasks {
            if let Err(e) = task.await {
                error!(error = %e, "accept task panicked");
            }
        }
        info!("listener shut down");
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    limit: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(done) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = done {
                    error!(error = %e, "connection task panicked");
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                        warn!(peer = %peer, "too many clients, closing connection");
                        drop(stream);
                        continue;
                    };
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        Arc::clone(&shared),
                        cancel.child_token(),
                        permit,
                    ));
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            },
        }
    }

    while let Some(done) = connections.join_next().await {
        if let Err(e) = done {
            error!(error = %e, "connection task panicked");
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    let client = ClientId::from(peer);
    info!(client = %client, "client connected");
    if let Err(e) = stream.set_nodelay(true) {
        warn!(client = %client, error = %e, "failed to set TCP_NODELAY (continuing anyway)");
    }
    for hook in &shared.hooks {
        hook.on_connect(&client).await;
    }

    let reason = tokio::select! {
        _ = cancel.cancelled() => "shutdown",
        reason = connection_loop(stream, &client, &shared) => reason,
    };

    for hook in &shared.hooks {
        hook.on_disconnect(&client).await;
    }
    info!(client = %client, reason, "client disconnected");
}

/// Serve lines until the peer goes away. Returns why the loop ended.
async fn connection_loop(mut stream: TcpStream, client: &ClientId, shared: &Shared) -> &'static str {
    let mut pending = BytesMut::with_capacity(4096);
    loop {
        while let Some(end) = pending.iter().position(|&b| b == b'\r' || b == b'\n') {
            let line = pending.split_to(end + 1);
            let line = &line[..end];
            if line.is_empty() {
                continue;
            }
            for hook in &shared.hooks {
                hook.on_input(client, line).await;
            }
            let dispatcher = Arc::clone(&shared.dispatcher);
            let (who, owned) = (client.clone(), line.to_vec());
            let reply = match tokio::task::spawn_blocking(move || dispatcher.input_as(&who, &owned)).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(client = %client, error = %e, "dispatch task failed");
                    return "dispatch failed";
                }
            };
            if reply.is_empty() {
                continue;
            }
            for hook in &shared.hooks {
                hook.on_output(client, &reply).await;
            }
            if let Err(e) = stream.write_all(&reply).await {
                warn!(client = %client, error = %e, "write failed");
                return "write error";
            }
        }

        if pending.len() > MAX_LINE {
            warn!(client = %client, bytes = pending.len(), "line too long, closing");
            return "line too long";
        }

        let read = stream.read_buf(&mut pending);
        let result = match shared.read_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, read).await {
                Ok(result) => result,
                Err(_) => {
                    info!(client = %client, timeout_ms = timeout.as_millis(), "read timeout");
                    return "read timeout";
                }
            },
            None => read.await,
        };
        match result {
            Ok(0) => return "closed by peer",
            Ok(_) => {}
            Err(e) => {
                warn!(client = %client, error = %e, "read failed");
                return "read error";
            }
        }
    }
}
