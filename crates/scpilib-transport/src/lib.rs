//! Network plumbing for scpilib.
//!
//! - [`ScpiListener`]: accepts TCP connections (IPv4 and/or IPv6) and feeds
//!   each received line to a shared [`Dispatcher`](scpilib_text_io::Dispatcher)
//! - [`ConnectionHook`]: observers for raw traffic on every connection
//! - [`ScpiClient`]: a TCP client that understands reply framing, used by
//!   tools and tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use scpilib_core::{Branch, SpecialCommands};
//! use scpilib_text_io::{Dispatcher, DispatcherConfig};
//! use scpilib_transport::{ListenerConfig, ScpiClient, ScpiListener};
//!
//! # async fn example() -> scpilib_core::Result<()> {
//! let dispatcher = Dispatcher::new(Branch::root(), SpecialCommands::new(), DispatcherConfig::default())?;
//! let listener = ScpiListener::bind(Arc::new(dispatcher), ListenerConfig::default(), Vec::new()).await?;
//!
//! let mut client = ScpiClient::connect("127.0.0.1:5025").await?;
//! let format = client.query_text("DATAFormat?").await?;
//! assert_eq!(format, "ASCII");
//!
//! listener.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod hook;
pub mod listener;

pub use client::ScpiClient;
pub use hook::{ConnectionHook, LogHook};
pub use listener::{DEFAULT_PORT, ListenerConfig, MAX_CLIENTS, ScpiListener};
