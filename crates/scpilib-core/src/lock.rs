//! Ownership tokens gating access to the instrument.
//!
//! An [`AccessLock`] is either free or held by one [`ClientId`] for a
//! limited time. The holder keeps the lock alive by using it: every
//! successful [`access`](AccessLock::access) by the owner restarts the
//! expiration clock (watchdog renewal). Anyone else is refused until the
//! owner goes quiet for longer than the expiration, at which point the
//! next check releases the lock.
//!
//! There is no background timer. Expiration is evaluated lazily by
//! [`request`](AccessLock::request), [`access`](AccessLock::access),
//! [`is_locked`](AccessLock::is_locked) and [`owner`](AccessLock::owner).
//!
//! Time is read from [`tokio::time::Instant`], so tests can drive
//! expiration deterministically with a paused runtime clock.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Expiration applied when a request does not name one.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(60);

/// Longest expiration a request may ask for.
pub const MAX_EXPIRATION: Duration = Duration::from_secs(600);

/// Identity of the party issuing commands, normally one network connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client identity from any label.
    pub fn new(id: impl Into<String>) -> Self {
        ClientId(id.into())
    }

    /// The identity used for commands issued in-process.
    pub fn local() -> Self {
        ClientId("local".to_string())
    }

    /// The identity label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SocketAddr> for ClientId {
    fn from(addr: SocketAddr) -> Self {
        ClientId(addr.to_string())
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        ClientId(id.to_string())
    }
}

#[derive(Debug)]
struct Holder {
    owner: ClientId,
    acquired_at: Instant,
    expiration: Duration,
}

impl Holder {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.acquired_at) > self.expiration
    }
}

/// A single-owner lock with sliding expiration.
#[derive(Debug)]
pub struct AccessLock {
    name: String,
    default_expiration: Duration,
    state: Mutex<Option<Holder>>,
}

impl AccessLock {
    /// Create an unlocked lock with the default 60 s expiration.
    pub fn new(name: &str) -> Self {
        Self::with_expiration(name, DEFAULT_EXPIRATION)
    }

    /// Create an unlocked lock whose requests default to `expiration`.
    ///
    /// The expiration is capped at [`MAX_EXPIRATION`].
    pub fn with_expiration(name: &str, expiration: Duration) -> Self {
        AccessLock {
            name: name.to_string(),
            default_expiration: expiration.min(MAX_EXPIRATION),
            state: Mutex::new(None),
        }
    }

    /// The label used in log messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Try to take the lock for `who`.
    ///
    /// Succeeds when the lock is free, has expired, or is already held by
    /// `who` (which renews it with the new expiration). `timeout_secs`
    /// overrides the default expiration. Returns `Ok(false)` if another
    /// party holds an unexpired lock.
    ///
    /// Fails with [`Error::LockTimeoutOverflow`] above 600 s and with
    /// [`Error::InvalidLockTimeout`] for a zero timeout.
    pub fn request(&self, who: &ClientId, timeout_secs: Option<u64>) -> Result<bool> {
        let expiration = match timeout_secs {
            None => self.default_expiration,
            Some(0) => return Err(Error::InvalidLockTimeout("0".into())),
            Some(secs) if secs > MAX_EXPIRATION.as_secs() => {
                return Err(Error::LockTimeoutOverflow(secs));
            }
            Some(secs) => Duration::from_secs(secs),
        };

        let now = Instant::now();
        let mut state = self.state.lock();
        if let Some(holder) = state.as_ref() {
            if holder.owner != *who && !holder.expired(now) {
                warn!(
                    lock = %self.name,
                    owner = %holder.owner,
                    requester = %who,
                    "lock request refused, already held"
                );
                return Ok(false);
            }
        }

        debug!(
            lock = %self.name,
            owner = %who,
            expiration_s = expiration.as_secs(),
            "lock acquired"
        );
        *state = Some(Holder {
            owner: who.clone(),
            acquired_at: now,
            expiration,
        });
        Ok(true)
    }

    /// Like [`request`](AccessLock::request) with the timeout given as text,
    /// as it arrives from a command argument.
    pub fn request_with(&self, who: &ClientId, timeout: Option<&str>) -> Result<bool> {
        let secs = timeout.map(parse_timeout).transpose()?;
        self.request(who, secs)
    }

    /// Check whether `who` may use the resource right now.
    ///
    /// A free lock admits everyone. The owner is admitted and renews the
    /// lock. Anyone else is admitted only if the lock has expired, in which
    /// case the lock is released.
    pub fn access(&self, who: &ClientId) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.as_mut() {
            None => true,
            Some(holder) if holder.owner == *who => {
                holder.acquired_at = now;
                true
            }
            Some(holder) if holder.expired(now) => {
                debug!(lock = %self.name, owner = %holder.owner, "lock expired");
                *state = None;
                true
            }
            Some(_) => false,
        }
    }

    /// Release the lock. Only the current owner may do so.
    pub fn release(&self, who: &ClientId) -> bool {
        let mut state = self.state.lock();
        match state.as_ref() {
            Some(holder) if holder.owner == *who => {
                debug!(lock = %self.name, owner = %who, "lock released");
                *state = None;
                true
            }
            Some(holder) => {
                error!(
                    lock = %self.name,
                    owner = %holder.owner,
                    requester = %who,
                    "lock release refused, not the owner"
                );
                false
            }
            None => {
                error!(lock = %self.name, requester = %who, "lock release refused, not locked");
                false
            }
        }
    }

    /// Release the lock regardless of owner.
    ///
    /// For supervisory recovery only; the command path never calls this.
    pub fn force_release(&self) {
        let mut state = self.state.lock();
        if let Some(holder) = state.take() {
            warn!(lock = %self.name, owner = %holder.owner, "lock forcibly released");
        }
    }

    /// Whether an unexpired lock is held. Releases an expired lock.
    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }

    /// The current owner, if the lock is held and unexpired.
    pub fn owner(&self) -> Option<ClientId> {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.as_ref() {
            Some(holder) if holder.expired(now) => {
                debug!(lock = %self.name, owner = %holder.owner, "lock expired");
                *state = None;
                None
            }
            Some(holder) => Some(holder.owner.clone()),
            None => None,
        }
    }

    /// The expiration of the current holder, if any.
    pub fn expiration(&self) -> Option<Duration> {
        self.state.lock().as_ref().map(|h| h.expiration)
    }
}

/// Parse a lock timeout argument in whole seconds.
///
/// Surrounding whitespace is ignored. Anything that is not an unsigned
/// integer fails with [`Error::InvalidLockTimeout`]; values above the
/// ceiling fail with [`Error::LockTimeoutOverflow`].
pub fn parse_timeout(text: &str) -> Result<u64> {
    let text = text.trim();
    let secs: u64 = text
        .parse()
        .map_err(|_| Error::InvalidLockTimeout(text.to_string()))?;
    if secs > MAX_EXPIRATION.as_secs() {
        return Err(Error::LockTimeoutOverflow(secs));
    }
    Ok(secs)
}
