//! Observers for raw connection traffic.
//!
//! Hooks see every line a client sends, and every reply, after the fact.
//! They cannot alter either. A listener awaits each hook in registration
//! order before moving on, so a slow hook slows that connection down.

use async_trait::async_trait;
use tracing::{debug, trace};

use scpilib_core::ClientId;

/// Callbacks invoked by the listener for each connection.
#[async_trait]
pub trait ConnectionHook: Send + Sync + 'static {
    /// A client connected.
    async fn on_connect(&self, _client: &ClientId) {}

    /// A line arrived from `client`, terminator stripped.
    async fn on_input(&self, client: &ClientId, data: &[u8]);

    /// A non-empty reply is about to be written to `client`.
    async fn on_output(&self, client: &ClientId, data: &[u8]);

    /// The connection to `client` ended.
    async fn on_disconnect(&self, _client: &ClientId) {}
}

#[async_trait]
impl<H: ConnectionHook> ConnectionHook for std::sync::Arc<H> {
    async fn on_connect(&self, client: &ClientId) {
        (**self).on_connect(client).await;
    }

    async fn on_input(&self, client: &ClientId, data: &[u8]) {
        (**self).on_input(client, data).await;
    }

    async fn on_output(&self, client: &ClientId, data: &[u8]) {
        (**self).on_output(client, data).await;
    }

    async fn on_disconnect(&self, client: &ClientId) {
        (**self).on_disconnect(client).await;
    }
}

/// Logs all traffic at `trace` level and connection changes at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHook;

#[async_trait]
impl ConnectionHook for LogHook {
    async fn on_connect(&self, client: &ClientId) {
        debug!(client = %client, "hook: connect");
    }

    async fn on_input(&self, client: &ClientId, data: &[u8]) {
        trace!(client = %client, data = %String::from_utf8_lossy(data), "hook: input");
    }

    async fn on_output(&self, client: &ClientId, data: &[u8]) {
        trace!(client = %client, bytes = data.len(), data = ?data, "hook: output");
    }

    async fn on_disconnect(&self, client: &ClientId) {
        debug!(client = %client, "hook: disconnect");
    }
}
