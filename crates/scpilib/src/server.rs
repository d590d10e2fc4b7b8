//! A running SCPI server.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info};

use scpilib_text_io::Dispatcher;
use scpilib_transport::ScpiListener;

/// A dispatcher served over TCP, created by
/// [`ScpiBuilder::serve`](crate::ScpiBuilder::serve).
///
/// The server keeps running until [`close`](ScpiServer::close) is awaited.
#[derive(Debug)]
pub struct ScpiServer {
    dispatcher: Arc<Dispatcher>,
    listener: ScpiListener,
}

impl ScpiServer {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, listener: ScpiListener) -> Self {
        info!(addrs = ?listener.local_addrs(), "server started");
        ScpiServer {
            dispatcher,
            listener,
        }
    }

    /// The shared dispatcher, for in-process commands and lock
    /// administration.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The first listening address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Every listening address.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        self.listener.local_addrs()
    }

    /// Number of connected clients.
    pub fn active_connections(&self) -> usize {
        self.listener.active_connections()
    }

    /// Stop the listener, disconnect every client and release all locks.
    pub async fn close(self) {
        self.listener.shutdown().await;
        match Arc::try_unwrap(self.dispatcher) {
            Ok(dispatcher) => dispatcher.close(),
            Err(shared) => {
                debug!("dispatcher still shared, releasing locks only");
                shared.force_release_locks();
            }
        }
        info!("server closed");
    }
}
