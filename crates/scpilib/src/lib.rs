//! # scpilib -- SCPI instrument command interpreter
//!
//! `scpilib` lets an instrument expose a hierarchical, abbreviation
//! tolerant SCPI command namespace over TCP. Commands such as
//! `SOURce:CURRent:UPPEr 42`, `CHANnel02:MEASure?` or `*IDN?` are resolved
//! against a tree of callbacks that the instrument registers at startup.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use scpilib::{Attribute, Error, ScpiBuilder, Value};
//!
//! #[tokio::main]
//! async fn main() -> scpilib::Result<()> {
//!     let level = Arc::new(AtomicI64::new(0));
//!     let (r, w) = (level.clone(), level.clone());
//!
//!     let server = ScpiBuilder::new()
//!         .identity("ACME,LOAD-1,0001,1.0")
//!         .root(move |root| {
//!             root.add_component("SOURce")?.add_attribute(
//!                 Attribute::new("LEVel")
//!                     .read(move |_| Ok(Value::Int(r.load(Ordering::SeqCst))))
//!                     .write(move |_, arg| {
//!                         let v = arg.parse().map_err(|_| Error::Callback(arg.into()))?;
//!                         w.store(v, Ordering::SeqCst);
//!                         Ok(Value::None)
//!                     }),
//!             )?;
//!             Ok(())
//!         })
//!         .serve()
//!         .await?;
//!
//!     // ... run until asked to stop ...
//!     server.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                          |
//! |------------------------|--------------------------------------------------|
//! | `scpilib-core`         | Keys, command tree, values, locks, errors        |
//! | `scpilib-text-io`      | Line protocol, data codec, dispatcher            |
//! | `scpilib-transport`    | TCP listener, connection hooks, TCP client       |
//! | **`scpilib`**          | This facade crate -- builder, server, re-exports |
//!
//! ## Reply tokens
//!
//! Every command on a line contributes at most one token to the reply.
//! Besides callback values, the dispatcher answers `ACK` for accepted
//! writes, `NOK` for malformed commands, `NaN` for unresolvable paths and
//! failed callbacks, and `NotAllow` when another client holds a lock.

pub use scpilib_core::*;

pub use scpilib_text_io::codec;
pub use scpilib_text_io::protocol;
pub use scpilib_text_io::{DataFormat, Dispatcher, DispatcherConfig, decode_block, decode_values};

pub use scpilib_transport::{
    ConnectionHook, DEFAULT_PORT, ListenerConfig, LogHook, MAX_CLIENTS, ScpiClient, ScpiListener,
};

pub mod builder;
pub mod server;

pub use builder::ScpiBuilder;
pub use server::ScpiServer;
