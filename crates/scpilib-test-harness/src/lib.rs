//! scpilib-test-harness: fixtures and network test utilities for scpilib.
//!
//! This crate provides [`demo_instrument`], a small but complete command
//! tree used across the workspace's tests and by the CLI's demo server, and
//! [`ScriptedClient`] for checking a running server over TCP against an
//! ordered script of command/reply pairs.

pub mod fixtures;
pub mod scripted_client;

pub use fixtures::{DemoInstrument, DemoState, IDENTITY, demo_instrument};
pub use scripted_client::ScriptedClient;
