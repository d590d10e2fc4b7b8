//! The command dispatcher.
//!
//! A [`Dispatcher`] owns the command tree, the special-command table, the
//! two access locks and the shared data format. Its only protocol entry
//! point is [`Dispatcher::input_as`]: one raw line in, one reply out.
//!
//! Every command on the line produces at most one answer token and per
//! command failures are folded into reserved tokens:
//!
//! - `NOK` for a command that does not parse;
//! - `NaN` for a path that does not resolve, a channel mismatch, a refused
//!   value or a failing callback;
//! - `NotAllow` when a lock held by another client refuses the command;
//! - `ACK` for a normal write whose callback returned no value.
//!
//! `input_as` never fails and never blocks beyond what the leaf callbacks
//! themselves do.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use scpilib_core::error::{Error, Result};
use scpilib_core::{
    AccessLock, Branch, ClientId, Context, DEFAULT_EXPIRATION, Node, SpecialCommands, Value,
};

use crate::codec::{self, DataFormat, DataFormatSetting};
use crate::protocol::{self, ACK, NAN, NOK, NOT_ALLOWED, Operation, PathCommand};
use crate::system;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Whether writes are additionally gated by a write lock.
    pub write_lock: bool,
    /// Default expiration of both locks (capped at 600 s).
    pub lock_expiration: Duration,
    /// Initial data format for array answers.
    pub data_format: DataFormat,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            write_lock: false,
            lock_expiration: DEFAULT_EXPIRATION,
            data_format: DataFormat::Ascii,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Parses command lines and executes them against a command tree.
///
/// A single dispatcher is shared by every connection of a server. The tree
/// is read-only once the dispatcher exists; the locks and the data format
/// are the only shared mutable state.
#[derive(Debug)]
pub struct Dispatcher {
    root: Branch,
    specials: SpecialCommands,
    system_lock: Arc<AccessLock>,
    write_lock: Option<Arc<AccessLock>>,
    data_format: Arc<DataFormatSetting>,
}

/// What a single command contributes to the reply.
type Token = Option<Vec<u8>>;

fn token(text: &str) -> Token {
    Some(text.as_bytes().to_vec())
}

impl Dispatcher {
    /// Create a dispatcher over `root` and `specials`.
    ///
    /// Installs the `DATAFormat` leaf and the `SYSTem:LOCK` subtree (plus
    /// `SYSTem:WLOCk` when the write lock is enabled). Fails if the tree
    /// already defines conflicting nodes at those paths.
    pub fn new(mut root: Branch, specials: SpecialCommands, config: DispatcherConfig) -> Result<Self> {
        let system_lock = Arc::new(AccessLock::with_expiration("system", config.lock_expiration));
        let write_lock = config
            .write_lock
            .then(|| Arc::new(AccessLock::with_expiration("write", config.lock_expiration)));
        let data_format = Arc::new(DataFormatSetting::new(config.data_format));

        system::install(&mut root, &system_lock, write_lock.as_ref(), &data_format)?;

        debug!(
            nodes = root.len(),
            specials = specials.len(),
            write_lock = config.write_lock,
            data_format = %config.data_format,
            "dispatcher created"
        );

        Ok(Dispatcher {
            root,
            specials,
            system_lock,
            write_lock,
            data_format,
        })
    }

    /// Process a line on behalf of the local, in-process client.
    pub fn input(&self, raw: &[u8]) -> Vec<u8> {
        self.input_as(&ClientId::local(), raw)
    }

    /// Process one raw line sent by `client` and return the reply bytes.
    ///
    /// The reply is the `;`-joined answer tokens followed by `\r\n`, or
    /// empty when no command produced an answer.
    pub fn input_as(&self, client: &ClientId, raw: &[u8]) -> Vec<u8> {
        let trimmed = protocol::trim_line(raw);
        if trimmed.is_empty() {
            return Vec::new();
        }
        let line = String::from_utf8_lossy(trimmed);
        trace!(client = %client, line = %line, "input");

        let mut tokens = Vec::new();
        let mut previous: Option<String> = None;
        for cmd in protocol::split_commands(&line) {
            // Every command, empty or failed ones included, is the sibling
            // the next continuation expands against.
            let (answer, expanded) = if cmd.is_empty() {
                debug!(client = %client, "empty command");
                (token(NOK), String::new())
            } else if cmd.starts_with('*') {
                (self.special(client, cmd), cmd.to_string())
            } else if cmd.starts_with(':') {
                match protocol::expand_continuation(previous.as_deref(), cmd) {
                    Some(full) => (self.path_command(client, &full), full),
                    None => {
                        warn!(client = %client, command = %cmd, "continuation as first command");
                        (token(NAN), String::new())
                    }
                }
            } else {
                (self.path_command(client, cmd), cmd.to_string())
            };
            tokens.extend(answer);
            previous = Some(expanded);
        }

        let reply = protocol::join_reply(&tokens);
        trace!(client = %client, len = reply.len(), "reply");
        reply
    }

    // -----------------------------------------------------------------------
    // Special commands
    // -----------------------------------------------------------------------

    fn special(&self, client: &ClientId, cmd: &str) -> Token {
        let request = match protocol::parse_special(cmd) {
            Ok(request) => request,
            Err(e) => {
                warn!(client = %client, error = %e, "malformed special command");
                return token(NOK);
            }
        };
        let Some(special) = self.specials.get(request.name) else {
            warn!(client = %client, command = %cmd, "unknown special command");
            return token(NAN);
        };
        if !self.admitted(client, !request.query, false) {
            return token(NOT_ALLOWED);
        }

        debug!(client = %client, command = %cmd, "special command");
        let ctx = Context::new(client);
        let result = if request.query {
            special.read_value(&ctx)
        } else {
            special.write_value(&ctx, request.arg)
        };
        match result {
            Ok(Value::None) => None,
            Ok(value) => self.render(value),
            Err(e) => {
                warn!(client = %client, command = %cmd, error = %e, "special command failed");
                token(NAN)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Path commands
    // -----------------------------------------------------------------------

    fn path_command(&self, client: &ClientId, cmd: &str) -> Token {
        let parsed = match protocol::parse_path(cmd) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(client = %client, error = %e, "malformed command");
                return token(NOK);
            }
        };
        let (node, channels) = match self.resolve(&parsed) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(client = %client, command = %cmd, error = %e, "command did not resolve");
                return token(NAN);
            }
        };

        let is_write = matches!(parsed.op, Operation::Write { .. });
        let exempt = node.target().is_some_and(|leaf| leaf.is_lock_exempt());
        if !self.admitted(client, is_write, exempt) {
            return token(NOT_ALLOWED);
        }

        debug!(client = %client, path = %node.path(), write = is_write, channels = ?channels, "dispatch");
        let result = match parsed.op {
            Operation::Read { params } => {
                let ctx = Context {
                    client,
                    channels: &channels,
                    params,
                };
                read_node(node, &ctx).map(|value| (!value.is_none()).then_some(value))
            }
            Operation::Write { arg } => {
                let ctx = Context {
                    client,
                    channels: &channels,
                    params: None,
                };
                write_node(node, &ctx, arg).map(|value| match value {
                    Value::None => Some(Value::from(ACK)),
                    value => Some(value),
                })
            }
        };

        match result {
            Ok(Some(value)) => self.render(value),
            Ok(None) => None,
            Err(e) => {
                warn!(client = %client, command = %cmd, error = %e, "command failed");
                token(NAN)
            }
        }
    }

    /// Walk the tree along `cmd`, collecting channel indices.
    fn resolve(&self, cmd: &PathCommand<'_>) -> Result<(&Node, Vec<u8>)> {
        let mut branch = &self.root;
        let mut channels = Vec::new();

        for segment in &cmd.segments {
            let child = branch
                .get(segment.name)?
                .as_branch()
                .ok_or_else(|| Error::NotFound(segment.name.to_string()))?;
            match (child.channel(), segment.index) {
                (Some(channel), Some(index)) => {
                    channel.check(index)?;
                    channels.push(index);
                }
                (None, None) => {}
                _ => return Err(Error::ChannelMismatch(child.path().to_string())),
            }
            branch = child;
        }

        let node = branch.get(cmd.name)?;
        let depth = match node {
            Node::Leaf(leaf) => leaf.channel_depth(),
            Node::Branch(branch) => branch.channel_depth(),
        };
        if depth != channels.len() {
            return Err(Error::ChannelMismatch(node.path().to_string()));
        }
        Ok((node, channels))
    }

    // -----------------------------------------------------------------------
    // Locks and rendering
    // -----------------------------------------------------------------------

    /// Whether `client` may run a command, renewing locks it owns.
    fn admitted(&self, client: &ClientId, is_write: bool, exempt: bool) -> bool {
        if exempt {
            return true;
        }
        if !self.system_lock.access(client) {
            debug!(client = %client, lock = %self.system_lock.name(), "refused by lock");
            return false;
        }
        match &self.write_lock {
            Some(lock) if is_write && !lock.access(client) => {
                debug!(client = %client, lock = %lock.name(), "refused by lock");
                false
            }
            _ => true,
        }
    }

    fn render(&self, value: Value) -> Token {
        match value {
            Value::Array(samples) => {
                let format = self.data_format.get();
                match codec::encode(&samples, format) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        error!(format = %format, samples = samples.len(), error = %e, "array encoding failed");
                        token(NAN)
                    }
                }
            }
            value => Some(value.to_string().into_bytes()),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors and lifecycle
    // -----------------------------------------------------------------------

    /// The command tree, including the built-in nodes.
    pub fn root(&self) -> &Branch {
        &self.root
    }

    /// The special-command table.
    pub fn specials(&self) -> &SpecialCommands {
        &self.specials
    }

    /// The lock gating every command.
    pub fn system_lock(&self) -> &Arc<AccessLock> {
        &self.system_lock
    }

    /// The lock gating writes, if enabled.
    pub fn write_lock(&self) -> Option<&Arc<AccessLock>> {
        self.write_lock.as_ref()
    }

    /// The current data format.
    pub fn data_format(&self) -> DataFormat {
        self.data_format.get()
    }

    /// Change the data format for every client.
    pub fn set_data_format(&self, format: DataFormat) {
        self.data_format.set(format);
    }

    /// Release both locks regardless of owner.
    ///
    /// For supervisory recovery, such as after a client that held a lock
    /// has gone away.
    pub fn force_release_locks(&self) {
        self.system_lock.force_release();
        if let Some(lock) = &self.write_lock {
            lock.force_release();
        }
    }

    /// End the dispatcher's life, releasing any held locks.
    pub fn close(self) {
        self.force_release_locks();
        info!("dispatcher closed");
    }
}

fn read_node(node: &Node, ctx: &Context<'_>) -> Result<Value> {
    match node {
        Node::Leaf(leaf) => leaf.read(ctx),
        Node::Branch(branch) => branch.read(ctx),
    }
}

fn write_node(node: &Node, ctx: &Context<'_>, arg: &str) -> Result<Value> {
    match node {
        Node::Leaf(leaf) => leaf.write(ctx, arg),
        Node::Branch(branch) => branch.write(ctx, arg),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;
    use scpilib_core::{Attribute, SpecialCommand};
    use scpilib_test_harness::demo_instrument;

    fn demo(config: DispatcherConfig) -> Dispatcher {
        let demo = demo_instrument().unwrap();
        Dispatcher::new(demo.root, demo.specials, config).unwrap()
    }

    fn reply(d: &Dispatcher, line: &str) -> String {
        String::from_utf8(d.input(line.as_bytes())).unwrap()
    }

    fn reply_as(d: &Dispatcher, client: &ClientId, line: &str) -> String {
        String::from_utf8(d.input_as(client, line.as_bytes())).unwrap()
    }

    // -----------------------------------------------------------------------
    // Scalar round trips
    // -----------------------------------------------------------------------

    #[test]
    fn scalar_attribute_round_trip() {
        let cell = Arc::new(AtomicI64::new(7));
        let mut root = Branch::root();
        let (r, w) = (Arc::clone(&cell), Arc::clone(&cell));
        root.add_component("source")
            .unwrap()
            .add_component("current")
            .unwrap()
            .add_attribute(
                Attribute::new("upper")
                    .read(move |_| Ok(Value::Int(r.load(Ordering::SeqCst))))
                    .write(move |_, arg| {
                        let v = arg.parse().map_err(|_| Error::Callback(arg.to_string()))?;
                        w.store(v, Ordering::SeqCst);
                        Ok(Value::None)
                    }),
            )
            .unwrap();
        let d = Dispatcher::new(root, SpecialCommands::new(), DispatcherConfig::default()).unwrap();

        assert_eq!(reply(&d, "SOUR:CURR:UPPER?"), "7\r\n");
        assert_eq!(reply(&d, "SOUR:CURR:UPPER 42"), "ACK\r\n");
        assert_eq!(reply(&d, "SOUR:CURR:UPPER?"), "42\r\n");
        assert_eq!(reply(&d, "source:current:upper?\n"), "42\r\n");
        assert_eq!(reply(&d, "SOUR:CURR:UPPER abc"), "NaN\r\n");
        assert_eq!(cell.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn multi_command_line_keeps_order() {
        let d = demo(DispatcherConfig::default());
        let out = reply(&d, "*IDN?;SOUR:CURR:UPPER?");
        let tokens: Vec<_> = out.trim_end().split(';').collect();
        assert_eq!(tokens.len(), 2);
        assert!(tokens[0].starts_with("scpilib"));
        assert_eq!(tokens[1], "7");
    }

    #[test]
    fn continuation_reuses_previous_prefix() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "SOUR:CURR:LOWE?;:UPPE?"), "0;7\r\n");
        assert_eq!(reply(&d, "SOUR:CURR:LOWE 3;:UPPE 9;:LOWE?;:UPPE?"), "ACK;ACK;3;9\r\n");
    }

    #[test]
    fn continuation_as_first_command_is_nan() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, ":UPPE?"), "NaN\r\n");
        assert_eq!(reply(&d, ":SOUR:CURR:UPPE?;:LOWE?"), "NaN;NaN\r\n");
    }

    #[test]
    fn continuation_after_top_level_command_starts_at_root() {
        let d = demo(DispatcherConfig::default());
        let out = reply(&d, "*IDN?;:SOUR:CURR:UPPE?");
        assert!(out.ends_with(";7\r\n"));
        assert_eq!(reply(&d, "WAVE? 2;:SOUR:CURR:LOWE?"), "0,0.5;0\r\n");
        assert_eq!(reply(&d, "SOUR:CURR:UPPE?;;:SOUR:CURR:LOWE?"), "7;NOK;0\r\n");
    }

    #[test]
    fn continuation_after_failed_command_keeps_its_prefix() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "SOUR:CURR:NOPE?;:UPPE?"), "NaN;7\r\n");
    }

    #[test]
    fn final_segment_channel_suffix_does_not_resolve() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "CHAN02?"), "NaN\r\n");
        assert_eq!(reply(&d, "SOUR:CURR:UPPE01?"), "NaN\r\n");
        assert_eq!(reply(&d, "CHAN2:MEAS?"), "NOK\r\n");
    }

    #[test]
    fn write_argument_must_match_whitelist_exactly() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "SOUR:VOLT  HIGH"), "NaN\r\n");
        assert_eq!(reply(&d, "SOUR:VOLT HIGH"), "ACK\r\n");
        assert_eq!(reply(&d, "SOUR:VOLT?"), "HIGH\r\n");
    }

    #[test]
    fn empty_input_gives_empty_reply() {
        let d = demo(DispatcherConfig::default());
        assert!(d.input(b"").is_empty());
        assert!(d.input(b"\r\n").is_empty());
        assert!(d.input(b";;\n").is_empty());
    }

    #[test]
    fn reserved_tokens_for_failures() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "SOUR:NOPE?"), "NaN\r\n");
        assert_eq!(reply(&d, "SOUR::UPPE?"), "NOK\r\n");
        assert_eq!(reply(&d, "SOUR:CURR:UPPE?;;*IDN?").split(';').nth(1), Some("NOK"));
        assert_eq!(reply(&d, "*NOPE?"), "NaN\r\n");
        assert_eq!(reply(&d, "*5?"), "NOK\r\n");
    }

    #[test]
    fn whitelist_rejects_unlisted_value() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "SOUR:VOLT HIGH"), "ACK\r\n");
        assert_eq!(reply(&d, "SOUR:VOLT?"), "HIGH\r\n");
        assert_eq!(reply(&d, "SOUR:VOLT high"), "NaN\r\n");
        assert_eq!(reply(&d, "SOUR:VOLT?"), "HIGH\r\n");
    }

    #[test]
    fn branch_without_default_is_harmless() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "SOUR:CURR?"), "NaN\r\n");
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    #[test]
    fn channel_indices_reach_callbacks() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "CHAN03:FUNC?"), "VOLT\r\n");
        assert_eq!(reply(&d, "CHAN03:FUNC CURR"), "ACK\r\n");
        assert_eq!(reply(&d, "CHAN03:FUNC?;CHAN01:FUNC?"), "CURR;VOLT\r\n");
        assert_eq!(reply(&d, "CHAN02:MEAS?"), "2.5\r\n");
    }

    #[test]
    fn channel_bounds_and_arity() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "CHAN04:MEAS?"), "4.5\r\n");
        assert_eq!(reply(&d, "CHAN00:MEAS?"), "NaN\r\n");
        assert_eq!(reply(&d, "CHAN05:MEAS?"), "NaN\r\n");
        assert_eq!(reply(&d, "CHAN:MEAS?"), "NaN\r\n");
        assert_eq!(reply(&d, "SOUR01:CURR:UPPE?"), "NaN\r\n");
        assert_eq!(reply(&d, "CHAN?"), "NaN\r\n");
    }

    // -----------------------------------------------------------------------
    // Arrays
    // -----------------------------------------------------------------------

    #[test]
    fn array_answer_in_ascii() {
        let d = demo(DispatcherConfig::default());
        let out = reply(&d, "WAVE?");
        let body = out.trim_end();
        assert_eq!(body.split(',').count(), 5);
        assert!(!body.ends_with(','));
    }

    #[test]
    fn array_answer_follows_data_format_leaf() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "DATA?"), "ASCII\r\n");
        assert_eq!(reply(&d, "DATA DOUBLE"), "ACK\r\n");
        assert_eq!(d.data_format(), DataFormat::Double);

        let out = d.input(b"WAVE?");
        assert!(out.starts_with(b"#240"));
        assert_eq!(out.len(), 4 + 40 + 2);
        assert!(out.ends_with(b"\r\n"));
        let samples = codec::decode_values(&out[..out.len() - 2], DataFormat::Double).unwrap();
        assert_eq!(samples.len(), 5);

        assert_eq!(reply(&d, "DATA XML"), "NaN\r\n");
        assert_eq!(d.data_format(), DataFormat::Double);
    }

    // -----------------------------------------------------------------------
    // Special commands
    // -----------------------------------------------------------------------

    #[test]
    fn special_write_without_value_has_no_answer() {
        let d = demo(DispatcherConfig::default());
        reply(&d, "SOUR:CURR:UPPE 99");
        assert_eq!(reply(&d, "*RST"), "");
        assert_eq!(reply(&d, "*RST;SOUR:CURR:UPPE?"), "7\r\n");
    }

    #[test]
    fn special_lookup_is_exact() {
        let d = demo(DispatcherConfig::default());
        assert!(reply(&d, "*idn?").starts_with("scpilib"));
        assert_eq!(reply(&d, "*ID?"), "NaN\r\n");
    }

    #[test]
    fn special_write_receives_argument() {
        let mut specials = SpecialCommands::new();
        specials
            .add(SpecialCommand::new("ECHO").write(|_, arg| Ok(Value::from(arg.unwrap_or("-")))))
            .unwrap();
        let d = Dispatcher::new(Branch::root(), specials, DispatcherConfig::default()).unwrap();
        assert_eq!(reply(&d, "*ECHO hello"), "hello\r\n");
        assert_eq!(reply(&d, "*ECHO"), "-\r\n");
    }

    // -----------------------------------------------------------------------
    // Locks
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn system_lock_refuses_other_clients() {
        let d = demo(DispatcherConfig::default());
        let a = ClientId::new("A");
        let b = ClientId::new("B");

        assert_eq!(reply_as(&d, &a, "SYST:LOCK:REQ?"), "1\r\n");
        assert_eq!(reply_as(&d, &b, "SYST:LOCK:REQ?"), "0\r\n");
        assert_eq!(reply_as(&d, &b, "SYST:LOCK?"), "A\r\n");
        assert_eq!(reply_as(&d, &b, "SOUR:CURR:UPPE?"), "NotAllow\r\n");
        assert_eq!(reply_as(&d, &b, "*IDN?"), "NotAllow\r\n");
        assert_eq!(reply_as(&d, &a, "SOUR:CURR:UPPE?"), "7\r\n");

        assert_eq!(reply_as(&d, &b, "SYST:LOCK:REL?"), "0\r\n");
        assert_eq!(reply_as(&d, &a, "SYST:LOCK:REL?"), "1\r\n");
        assert_eq!(reply_as(&d, &b, "SOUR:CURR:UPPE?"), "7\r\n");
        assert_eq!(reply_as(&d, &b, "SYST:LOCK:OWNE?"), "NONE\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn lock_expires_and_owner_activity_renews() {
        let d = demo(DispatcherConfig::default());
        let a = ClientId::new("A");
        let b = ClientId::new("B");

        assert_eq!(reply_as(&d, &a, "SYST:LOCK:REQ? 10"), "1\r\n");
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(8)).await;
            assert_eq!(reply_as(&d, &a, "SOUR:CURR:UPPE?"), "7\r\n");
        }
        assert_eq!(reply_as(&d, &b, "SOUR:CURR:UPPE?"), "NotAllow\r\n");

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(reply_as(&d, &b, "SOUR:CURR:UPPE?"), "7\r\n");
        assert!(!d.system_lock().is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_lock_timeouts_answer_nan() {
        let d = demo(DispatcherConfig::default());
        assert_eq!(reply(&d, "SYST:LOCK:REQ? 601"), "NaN\r\n");
        assert_eq!(reply(&d, "SYST:LOCK:REQ? soon"), "NaN\r\n");
        assert_eq!(reply(&d, "SYST:LOCK:REQ? 0"), "NaN\r\n");
        assert!(!d.system_lock().is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn write_lock_gates_only_writes() {
        let d = demo(DispatcherConfig {
            write_lock: true,
            ..DispatcherConfig::default()
        });
        let a = ClientId::new("A");
        let b = ClientId::new("B");

        assert_eq!(reply_as(&d, &a, "SYST:WLOC:REQ?"), "1\r\n");
        assert_eq!(reply_as(&d, &b, "SOUR:CURR:UPPE?"), "7\r\n");
        assert_eq!(reply_as(&d, &b, "SOUR:CURR:UPPE 1"), "NotAllow\r\n");
        assert_eq!(reply_as(&d, &b, "*RST"), "NotAllow\r\n");
        assert!(reply_as(&d, &b, "*IDN?").starts_with("scpilib"));
        assert_eq!(reply_as(&d, &a, "SOUR:CURR:UPPE 1"), "ACK\r\n");
        assert_eq!(reply_as(&d, &b, "SOUR:CURR:UPPE?"), "1\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn force_release_clears_both_locks() {
        let d = demo(DispatcherConfig {
            write_lock: true,
            ..DispatcherConfig::default()
        });
        let a = ClientId::new("A");
        reply_as(&d, &a, "SYST:LOCK:REQ?;SYST:WLOC:REQ?");
        assert!(d.system_lock().is_locked());
        assert!(d.write_lock().is_some_and(|l| l.is_locked()));

        d.force_release_locks();
        assert!(!d.system_lock().is_locked());
        assert!(d.write_lock().is_some_and(|l| !l.is_locked()));
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn conflicting_system_subtree_is_reported() {
        let mut root = Branch::root();
        root.add_component("system")
            .unwrap()
            .add_attribute(Attribute::new("lock"))
            .unwrap();
        assert!(matches!(
            Dispatcher::new(root, SpecialCommands::new(), DispatcherConfig::default()),
            Err(Error::KindConflict(_))
        ));
    }
}
