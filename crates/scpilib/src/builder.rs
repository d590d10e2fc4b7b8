//! ScpiBuilder -- fluent builder for dispatchers and servers.
//!
//! Collects the command tree, the special commands, and the dispatcher and
//! listener settings, then produces either a bare [`Dispatcher`] for
//! in-process use or a running [`ScpiServer`].
//!
//! # Example
//!
//! ```no_run
//! use scpilib::{Attribute, ScpiBuilder, Value};
//! use std::time::Duration;
//!
//! # async fn example() -> scpilib::Result<()> {
//! let server = ScpiBuilder::new()
//!     .identity("ACME,PSU-1,0001,1.0")
//!     .write_lock(true)
//!     .lock_expiration(Duration::from_secs(120))
//!     .root(|root| {
//!         root.add_component("SOURce")?
//!             .add_attribute(Attribute::new("VOLTage").read(|_| Ok(Value::Float(3.3))))?;
//!         Ok(())
//!     })
//!     .port(5025)
//!     .serve()
//!     .await?;
//! # server.close().await;
//! # Ok(())
//! # }
//! ```

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use scpilib_core::error::{Error, Result};
use scpilib_core::{Branch, MAX_EXPIRATION, SpecialCommand, SpecialCommands, Value};
use scpilib_text_io::{DataFormat, Dispatcher, DispatcherConfig};
use scpilib_transport::{ConnectionHook, ListenerConfig, MAX_CLIENTS, ScpiListener};

use crate::server::ScpiServer;

/// Fluent builder for [`Dispatcher`] and [`ScpiServer`].
///
/// Steps that can fail (adding special commands, building the tree) record
/// the first failure, which [`build`](ScpiBuilder::build) then returns.
pub struct ScpiBuilder {
    root: Branch,
    specials: SpecialCommands,
    dispatcher: DispatcherConfig,
    listener: ListenerConfig,
    hooks: Vec<Arc<dyn ConnectionHook>>,
    error: Option<Error>,
}

impl Default for ScpiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScpiBuilder {
    /// Create a builder with an empty tree and default settings.
    pub fn new() -> Self {
        Self::with_key_length(scpilib_core::DEFAULT_KEY_LENGTH)
    }

    /// Create a builder whose tree uses `key_len` as the minimum
    /// abbreviation length.
    pub fn with_key_length(key_len: usize) -> Self {
        ScpiBuilder {
            root: Branch::root_with_key_len(key_len),
            specials: SpecialCommands::new(),
            dispatcher: DispatcherConfig::default(),
            listener: ListenerConfig::default(),
            hooks: Vec::new(),
            error: None,
        }
    }

    /// Start from an existing tree and special-command table.
    pub fn from_parts(root: Branch, specials: SpecialCommands) -> Self {
        ScpiBuilder {
            root,
            specials,
            ..Self::new()
        }
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }

    /// Answer `*IDN?` with `identity`.
    pub fn identity(self, identity: &str) -> Self {
        let identity = identity.to_string();
        self.special_command(
            SpecialCommand::new("IDN?").read(move |_| Ok(Value::Text(identity.clone()))),
        )
    }

    /// Register a special command.
    pub fn special_command(mut self, cmd: SpecialCommand) -> Self {
        let result = self.specials.add(cmd);
        self.record(result);
        self
    }

    /// Add nodes to the tree.
    pub fn root<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut Branch) -> Result<()>,
    {
        let result = build(&mut self.root);
        self.record(result);
        self
    }

    /// Gate writes with a second, write-only lock.
    pub fn write_lock(mut self, enabled: bool) -> Self {
        self.dispatcher.write_lock = enabled;
        self
    }

    /// Default lock expiration (at most 600 s).
    pub fn lock_expiration(mut self, expiration: Duration) -> Self {
        self.dispatcher.lock_expiration = expiration;
        self
    }

    /// Initial data format for array answers.
    pub fn data_format(mut self, format: DataFormat) -> Self {
        self.dispatcher.data_format = format;
        self
    }

    /// TCP port to listen on.
    pub fn port(mut self, port: u16) -> Self {
        self.listener.port = port;
        self
    }

    /// Listen on IPv4.
    pub fn ipv4(mut self, enabled: bool) -> Self {
        self.listener.ipv4 = enabled;
        self
    }

    /// Listen on IPv6.
    pub fn ipv6(mut self, enabled: bool) -> Self {
        self.listener.ipv6 = enabled;
        self
    }

    /// Listen on exactly this address.
    pub fn bind_address(mut self, addr: IpAddr) -> Self {
        self.listener.bind_address = Some(addr);
        self
    }

    /// Maximum number of concurrent clients, from 1 to [`MAX_CLIENTS`].
    pub fn max_clients(mut self, n: usize) -> Self {
        self.listener.max_clients = n;
        self
    }

    /// Close connections idle for longer than `timeout`.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.listener.read_timeout = Some(timeout);
        self
    }

    /// Observe traffic on every connection.
    pub fn hook(mut self, hook: impl ConnectionHook) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Build a dispatcher for in-process use.
    pub fn build(self) -> Result<Dispatcher> {
        self.into_parts().map(|(dispatcher, _, _)| dispatcher)
    }

    /// Build the dispatcher and start listening.
    pub async fn serve(self) -> Result<ScpiServer> {
        let (dispatcher, listener, hooks) = self.into_parts()?;
        let dispatcher = Arc::new(dispatcher);
        let listener = ScpiListener::bind(Arc::clone(&dispatcher), listener, hooks).await?;
        Ok(ScpiServer::new(dispatcher, listener))
    }

    fn into_parts(self) -> Result<(Dispatcher, ListenerConfig, Vec<Arc<dyn ConnectionHook>>)> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let expiration = self.dispatcher.lock_expiration;
        if expiration.is_zero() {
            return Err(Error::InvalidLockTimeout("0".into()));
        }
        if expiration > MAX_EXPIRATION {
            return Err(Error::LockTimeoutOverflow(expiration.as_secs()));
        }
        let max_clients = self.listener.max_clients;
        if max_clients == 0 || max_clients > MAX_CLIENTS {
            return Err(Error::Transport(format!(
                "max_clients must be between 1 and {MAX_CLIENTS}, got {max_clients}"
            )));
        }

        let dispatcher = Dispatcher::new(self.root, self.specials, self.dispatcher)?;
        Ok((dispatcher, self.listener, self.hooks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scpilib_core::Attribute;

    #[test]
    fn builder_defaults() {
        let dispatcher = ScpiBuilder::new().build().unwrap();
        assert!(dispatcher.write_lock().is_none());
        assert_eq!(dispatcher.data_format(), DataFormat::Ascii);
        assert_eq!(dispatcher.input(b"DATA?"), b"ASCII\r\n");
    }

    #[test]
    fn builder_custom_settings() {
        let dispatcher = ScpiBuilder::new()
            .identity("ACME,X1,42,2.0")
            .write_lock(true)
            .data_format(DataFormat::Single)
            .lock_expiration(Duration::from_secs(30))
            .build()
            .unwrap();
        assert!(dispatcher.write_lock().is_some());
        assert_eq!(dispatcher.input(b"*IDN?"), b"ACME,X1,42,2.0\r\n");
        assert_eq!(dispatcher.input(b"DATA?"), b"SINGLE\r\n");
    }

    #[test]
    fn root_closure_builds_tree() {
        let dispatcher = ScpiBuilder::new()
            .root(|root| {
                root.add_component("MEASure")?
                    .add_attribute(Attribute::new("VOLTage").read(|_| Ok(Value::Float(1.25))))?;
                Ok(())
            })
            .build()
            .unwrap();
        assert_eq!(dispatcher.input(b"MEAS:VOLT?"), b"1.25\r\n");
    }

    #[test]
    fn first_error_is_reported() {
        let result = ScpiBuilder::new()
            .root(|root| root.add_channel("CHANnel", 100, 1).map(|_| ()))
            .identity("one")
            .identity("two")
            .build();
        assert!(matches!(result, Err(Error::ChannelCount(100))));
    }

    #[test]
    fn duplicate_identity_is_a_collision() {
        let result = ScpiBuilder::new().identity("one").identity("two").build();
        assert!(matches!(result, Err(Error::NameCollision { .. })));
    }

    #[test]
    fn lock_expiration_is_validated() {
        let result = ScpiBuilder::new()
            .lock_expiration(Duration::from_secs(601))
            .build();
        assert!(matches!(result, Err(Error::LockTimeoutOverflow(601))));
        let result = ScpiBuilder::new().lock_expiration(Duration::ZERO).build();
        assert!(matches!(result, Err(Error::InvalidLockTimeout(_))));
    }

    #[test]
    fn key_length_applies_to_tree() {
        let dispatcher = ScpiBuilder::with_key_length(3)
            .root(|root| {
                root.add_attribute(Attribute::new("VOLTage").read(|_| Ok(Value::Int(5))))?;
                Ok(())
            })
            .build()
            .unwrap();
        assert_eq!(dispatcher.input(b"VOL?"), b"5\r\n");
    }

    #[tokio::test]
    async fn zero_max_clients_rejected() {
        let result = ScpiBuilder::new().max_clients(0).serve().await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[test]
    fn oversized_max_clients_rejected() {
        let result = ScpiBuilder::new().max_clients(MAX_CLIENTS + 1).build();
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(ScpiBuilder::new().max_clients(MAX_CLIENTS).build().is_ok());
    }
}
