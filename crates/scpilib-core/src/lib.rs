//! scpilib-core: command tree, identifiers, values and access locks.
//!
//! This crate defines the protocol-agnostic building blocks of an SCPI
//! instrument server. Instrument code depends on these types to describe
//! its command namespace without pulling in the dispatcher or the network
//! listener.
//!
//! # Key types
//!
//! - [`Key`] -- abbreviation-aware node name with a lookup fingerprint
//! - [`Branch`], [`Leaf`], [`Node`] -- the command tree
//! - [`Attribute`] -- description of a leaf to attach
//! - [`SpecialCommands`] -- the `*IDN?`-style command table
//! - [`AccessLock`] / [`ClientId`] -- expiring single-owner locks
//! - [`Value`] -- what callbacks return
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod key;
pub mod lock;
pub mod node;
pub mod special;
pub mod tree;
pub mod value;

pub use error::{Error, Result};
pub use key::{DEFAULT_KEY_LENGTH, Key};
pub use lock::{AccessLock, ClientId, DEFAULT_EXPIRATION, MAX_EXPIRATION};
pub use node::{Attribute, Branch, Channel, Context, Leaf, Node, ReadFn, WriteFn};
pub use special::{SpecialCommand, SpecialCommands};
pub use value::Value;
