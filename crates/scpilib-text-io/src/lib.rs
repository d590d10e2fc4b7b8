//! SCPI text protocol and command dispatch.
//!
//! This crate turns raw command lines into replies. It knows how a line is
//! split into commands, how continuations and channel suffixes are
//! expanded, how array answers are encoded, and how the access locks gate
//! each command. It does no I/O: the listener in `scpilib-transport` feeds
//! it lines and writes back what it returns.
//!
//! # Architecture
//!
//! - [`protocol`] -- splitting, parsing and reply framing
//! - [`codec`] -- ASCII and binary-block encoding of arrays
//! - [`dispatcher`] -- resolution, lock gating and execution
//! - [`system`] -- the `SYSTem:LOCK` and `DATAFormat` nodes

pub mod codec;
pub mod dispatcher;
pub mod protocol;
pub mod system;

pub use codec::{DataFormat, DataFormatSetting, decode_block, decode_values, encode};
pub use dispatcher::{Dispatcher, DispatcherConfig};
