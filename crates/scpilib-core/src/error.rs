//! Error types for scpilib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Tree construction errors, per-command
//! resolution errors, lock configuration errors, and transport errors are
//! all captured here.
//!
//! Construction errors are returned to whoever builds the command tree and
//! are never swallowed. Per-command errors are recovered inside the
//! dispatcher and turned into a reserved answer token, so a single bad
//! command never ends a client session.

/// The error type for all scpilib operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A command name is empty or contains non-alphabetic characters.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Two different names reduce to the same lookup key under one parent.
    #[error("name collision: {new:?} clashes with existing {existing:?}")]
    NameCollision {
        /// The name that was being registered.
        new: String,
        /// The name already registered under the same key.
        existing: String,
    },

    /// A channel count does not fit in two decimal digits.
    #[error("channel count out of range: {0} (must be 1..=99)")]
    ChannelCount(u32),

    /// A channel branch is being redefined with a different count or start.
    #[error("channel {name:?} already defined with count {count} starting at {start}")]
    ChannelConflict {
        /// The channel branch name.
        name: String,
        /// The count of the existing definition.
        count: u8,
        /// The start index of the existing definition.
        start: u8,
    },

    /// A name is already in use by a node of a different kind.
    #[error("{0:?} already exists as a different kind of node")]
    KindConflict(String),

    /// A default child was named that does not exist under its parent.
    #[error("default child {0:?} does not exist")]
    DefaultNotFound(String),

    /// A write callback was supplied for a query-only special command.
    #[error("special command {0:?} is query-only and cannot take a write callback")]
    WriteNotAllowed(String),

    /// A path segment did not resolve to any node.
    #[error("not found: {0:?}")]
    NotFound(String),

    /// The channel indices in a command do not match the channel branches
    /// on its path.
    #[error("channel mismatch at {0:?}")]
    ChannelMismatch(String),

    /// A channel index lies outside the range of its channel branch.
    #[error("channel index {index} out of range {start}..{end}")]
    ChannelOutOfRange {
        /// The index given in the command.
        index: u8,
        /// First valid index.
        start: u8,
        /// One past the last valid index.
        end: u16,
    },

    /// A write argument is not one of the attribute's allowed values.
    #[error("value {value:?} not allowed, expected one of {allowed:?}")]
    ValueNotAllowed {
        /// The rejected argument.
        value: String,
        /// The whitelist of accepted arguments.
        allowed: Vec<String>,
    },

    /// The node cannot answer queries.
    #[error("{0:?} is not readable")]
    NotReadable(String),

    /// The node does not accept writes.
    #[error("{0:?} is not writable")]
    NotWritable(String),

    /// An instrument callback reported a failure.
    #[error("callback failed: {0}")]
    Callback(String),

    /// A command could not be parsed.
    #[error("malformed command: {0:?}")]
    Malformed(String),

    /// A lock timeout exceeds the hard ceiling.
    #[error("lock timeout {0}s exceeds the maximum of {max}s", max = crate::lock::MAX_EXPIRATION.as_secs())]
    LockTimeoutOverflow(u64),

    /// A lock timeout could not be interpreted as a positive integer.
    #[error("invalid lock timeout: {0:?}")]
    InvalidLockTimeout(String),

    /// An array could not be encoded in the requested data format.
    #[error("codec error: {0}")]
    Codec(String),

    /// A transport-level error (TCP listener or client socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// Timed out waiting for a response.
    #[error("timeout waiting for response")]
    Timeout,

    /// No connection has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
