//! The command tree: branches, channel branches and leaves.
//!
//! The tree is owned top-down. The root [`Branch`] owns its children by
//! value in an insertion-ordered map keyed by [`Key`] fingerprint. Nodes do
//! not point back at their parents; the two facts a node needs from its
//! ancestry are computed once when it is attached:
//!
//! - its full path (`SOURce:CURRent:UPPEr` style, for diagnostics), and
//! - its channel depth, the number of channel branches above it.
//!
//! A channel branch stands for `count` numbered repetitions of the same
//! subtree (`CHANnel01`..`CHANnel04`). The dispatcher strips the two-digit
//! suffix from the path segment and hands the collected indices to the
//! leaf callback in [`Context::channels`].

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::key::{self, DEFAULT_KEY_LENGTH, Key};
use crate::lock::ClientId;
use crate::value::Value;

/// Callback answering a query on a leaf.
///
/// Callbacks may block on instrument I/O; the TCP listener runs dispatch on
/// tokio's blocking pool.
pub type ReadFn = Arc<dyn Fn(&Context<'_>) -> Result<Value> + Send + Sync>;

/// Callback applying a write to a leaf. Returning [`Value::None`] means the
/// write has no explicit reply.
pub type WriteFn = Arc<dyn Fn(&Context<'_>, &str) -> Result<Value> + Send + Sync>;

/// Per-command information handed to every callback.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    /// The client issuing the command.
    pub client: &'a ClientId,
    /// Channel indices collected along the path, outermost first.
    pub channels: &'a [u8],
    /// Query parameters following `?`, if any.
    pub params: Option<&'a str>,
}

impl<'a> Context<'a> {
    /// A context with no channels and no parameters.
    pub fn new(client: &'a ClientId) -> Self {
        Context {
            client,
            channels: &[],
            params: None,
        }
    }
}

/// The numbering of a channel branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    count: u8,
    start: u8,
}

impl Channel {
    /// Create a channel numbering of `count` instances starting at `start`.
    ///
    /// `count` must be in `1..=99` so every index fits in two digits.
    pub fn new(count: u32, start: u8) -> Result<Self> {
        if count == 0 || count > 99 {
            return Err(Error::ChannelCount(count));
        }
        Ok(Channel {
            count: count as u8,
            start,
        })
    }

    /// Number of instances.
    pub fn count(&self) -> u8 {
        self.count
    }

    /// First valid index.
    pub fn start(&self) -> u8 {
        self.start
    }

    /// One past the last valid index.
    pub fn end(&self) -> u16 {
        u16::from(self.start) + u16::from(self.count)
    }

    /// Whether `index` addresses one of the instances.
    pub fn contains(&self, index: u8) -> bool {
        index >= self.start && u16::from(index) < self.end()
    }

    /// Check `index`, failing with [`Error::ChannelOutOfRange`].
    pub fn check(&self, index: u8) -> Result<()> {
        if self.contains(index) {
            Ok(())
        } else {
            Err(Error::ChannelOutOfRange {
                index,
                start: self.start,
                end: self.end(),
            })
        }
    }
}

/// Description of a leaf to attach with [`Branch::add_attribute`].
pub struct Attribute {
    pub(crate) name: String,
    pub(crate) read: Option<ReadFn>,
    pub(crate) write: Option<WriteFn>,
    pub(crate) default: bool,
    pub(crate) allowed: Option<Vec<String>>,
    pub(crate) lock_exempt: bool,
}

impl Attribute {
    /// Start describing an attribute called `name`.
    pub fn new(name: &str) -> Self {
        Attribute {
            name: name.to_string(),
            read: None,
            write: None,
            default: false,
            allowed: None,
            lock_exempt: false,
        }
    }

    /// Set the query callback.
    pub fn read<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.read = Some(Arc::new(f));
        self
    }

    /// Set the write callback.
    pub fn write<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context<'_>, &str) -> Result<Value> + Send + Sync + 'static,
    {
        self.write = Some(Arc::new(f));
        self
    }

    /// Make this attribute the parent's default child.
    pub fn default(mut self) -> Self {
        self.default = true;
        self
    }

    /// Restrict writes to exactly these argument strings.
    pub fn allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Let this attribute run even while another client holds a lock.
    pub fn lock_exempt(mut self) -> Self {
        self.lock_exempt = true;
        self
    }
}

/// A node carrying read and write callbacks.
pub struct Leaf {
    pub(crate) key: Key,
    pub(crate) path: String,
    pub(crate) read: Option<ReadFn>,
    pub(crate) write: Option<WriteFn>,
    pub(crate) allowed: Option<Vec<String>>,
    pub(crate) channel_depth: usize,
    pub(crate) lock_exempt: bool,
}

impl Leaf {
    /// The leaf's key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Full colon-separated path from the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of channel branches above this leaf.
    pub fn channel_depth(&self) -> usize {
        self.channel_depth
    }

    /// Whether the leaf lives inside a channel branch.
    pub fn is_indexed(&self) -> bool {
        self.channel_depth > 0
    }

    /// Whether the leaf answers queries.
    pub fn is_readable(&self) -> bool {
        self.read.is_some()
    }

    /// Whether the leaf accepts writes.
    pub fn is_writable(&self) -> bool {
        self.write.is_some()
    }

    /// The write whitelist, if any.
    pub fn allowed_values(&self) -> Option<&[String]> {
        self.allowed.as_deref()
    }

    /// Whether the leaf bypasses lock gating.
    pub fn is_lock_exempt(&self) -> bool {
        self.lock_exempt
    }

    /// Invoke the read callback.
    pub fn read(&self, ctx: &Context<'_>) -> Result<Value> {
        let read = self
            .read
            .as_ref()
            .ok_or_else(|| Error::NotReadable(self.path.clone()))?;
        read(ctx)
    }

    /// Check the whitelist and invoke the write callback.
    pub fn write(&self, ctx: &Context<'_>, arg: &str) -> Result<Value> {
        let write = self
            .write
            .as_ref()
            .ok_or_else(|| Error::NotWritable(self.path.clone()))?;
        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|v| v == arg) {
                return Err(Error::ValueNotAllowed {
                    value: arg.to_string(),
                    allowed: allowed.clone(),
                });
            }
        }
        write(ctx, arg)
    }
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("path", &self.path)
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .field("allowed", &self.allowed)
            .field("channel_depth", &self.channel_depth)
            .finish_non_exhaustive()
    }
}

/// A container node, optionally repeated as a channel branch.
#[derive(Debug)]
pub struct Branch {
    pub(crate) key: Option<Key>,
    pub(crate) path: String,
    pub(crate) channel: Option<Channel>,
    pub(crate) children: IndexMap<u64, Node>,
    pub(crate) default: Option<u64>,
    pub(crate) key_len: usize,
    pub(crate) channel_depth: usize,
}

/// Any node of the command tree.
#[derive(Debug)]
pub enum Node {
    /// A callback-carrying leaf.
    Leaf(Leaf),
    /// A branch or channel branch.
    Branch(Branch),
}

impl Node {
    /// The node's key. Only the root has none, and the root is never a child.
    pub fn key(&self) -> Option<&Key> {
        match self {
            Node::Leaf(leaf) => Some(&leaf.key),
            Node::Branch(branch) => branch.key.as_ref(),
        }
    }

    /// Full colon-separated path from the root.
    pub fn path(&self) -> &str {
        match self {
            Node::Leaf(leaf) => &leaf.path,
            Node::Branch(branch) => &branch.path,
        }
    }

    /// The node as a branch, if it is one.
    pub fn as_branch(&self) -> Option<&Branch> {
        match self {
            Node::Branch(branch) => Some(branch),
            Node::Leaf(_) => None,
        }
    }

    /// The node as a leaf, if it is one.
    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Branch(_) => None,
        }
    }

    /// The leaf this node stands for: itself, or its chain of default children.
    pub fn target(&self) -> Option<&Leaf> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Branch(branch) => branch.default_leaf(),
        }
    }

    fn matches(&self, segment: &str) -> bool {
        self.key().is_some_and(|k| k.matches(segment))
    }
}

impl Branch {
    /// Create an empty root with the default key length.
    pub fn root() -> Self {
        Self::root_with_key_len(DEFAULT_KEY_LENGTH)
    }

    /// Create an empty root whose descendants use `key_len` as their
    /// minimum abbreviation length.
    pub fn root_with_key_len(key_len: usize) -> Self {
        Branch {
            key: None,
            path: String::new(),
            channel: None,
            children: IndexMap::new(),
            default: None,
            key_len: key_len.max(1),
            channel_depth: 0,
        }
    }

    /// The branch's key, `None` for the root.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Whether this is the root.
    pub fn is_root(&self) -> bool {
        self.key.is_none()
    }

    /// Full colon-separated path from the root (empty for the root).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The minimum abbreviation length applied to children.
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// The channel numbering, if this is a channel branch.
    pub fn channel(&self) -> Option<Channel> {
        self.channel
    }

    /// Number of channel branches on the path to this branch, itself included.
    pub fn channel_depth(&self) -> usize {
        self.channel_depth
    }

    /// Whether this branch is, or lives inside, a channel branch.
    pub fn is_indexed(&self) -> bool {
        self.channel_depth > 0
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the branch has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Iterate direct children in registration order.
    pub fn children(&self) -> impl Iterator<Item = &Node> {
        self.children.values()
    }

    /// Resolve one path segment against the direct children.
    ///
    /// The segment is fingerprinted at this branch's key length, and the
    /// single candidate must then accept it as an abbreviation.
    pub fn get(&self, segment: &str) -> Result<&Node> {
        self.children
            .get(&key::fingerprint(segment, self.key_len))
            .filter(|node| node.matches(segment))
            .ok_or_else(|| Error::NotFound(segment.to_string()))
    }

    /// The default child, if one is set.
    pub fn default_child(&self) -> Option<&Node> {
        self.default.and_then(|fp| self.children.get(&fp))
    }

    /// Follow default children down to a leaf.
    pub fn default_leaf(&self) -> Option<&Leaf> {
        self.default_child().and_then(Node::target)
    }

    /// Make the existing child `name` the default.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let fp = key::fingerprint(name, self.key_len);
        match self.children.get(&fp) {
            Some(node) if node.matches(name) => {
                self.default = Some(fp);
                Ok(())
            }
            _ => Err(Error::DefaultNotFound(name.to_string())),
        }
    }

    /// Query the default child. Without one, the answer is `NaN`.
    pub fn read(&self, ctx: &Context<'_>) -> Result<Value> {
        match self.default_leaf() {
            Some(leaf) => leaf.read(ctx),
            None => Ok(Value::Nan),
        }
    }

    /// Write to the default child. Without one, the answer is `NaN`.
    pub fn write(&self, ctx: &Context<'_>, arg: &str) -> Result<Value> {
        match self.default_leaf() {
            Some(leaf) => leaf.write(ctx, arg),
            None => Ok(Value::Nan),
        }
    }

    pub(crate) fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", self.path, name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_bounds() {
        let ch = Channel::new(4, 1).unwrap();
        for i in 1..=4 {
            assert!(ch.contains(i));
        }
        assert!(!ch.contains(0));
        assert!(!ch.contains(5));
        assert!(matches!(
            ch.check(5),
            Err(Error::ChannelOutOfRange {
                index: 5,
                start: 1,
                end: 5
            })
        ));
    }

    #[test]
    fn channel_with_custom_start() {
        let ch = Channel::new(2, 10).unwrap();
        assert!(!ch.contains(9));
        assert!(ch.contains(10));
        assert!(ch.contains(11));
        assert!(!ch.contains(12));
    }

    #[test]
    fn channel_count_limits() {
        assert!(Channel::new(99, 1).is_ok());
        assert!(matches!(Channel::new(100, 1), Err(Error::ChannelCount(100))));
        assert!(matches!(Channel::new(0, 1), Err(Error::ChannelCount(0))));
    }

    #[test]
    fn branch_without_default_reads_nan() {
        let root = Branch::root();
        let client = ClientId::local();
        assert_eq!(root.read(&Context::new(&client)).unwrap(), Value::Nan);
        assert_eq!(root.write(&Context::new(&client), "1").unwrap(), Value::Nan);
    }

    #[test]
    fn leaf_without_callbacks() {
        let mut root = Branch::root();
        root.add_attribute(Attribute::new("status")).unwrap();
        let client = ClientId::local();
        let ctx = Context::new(&client);
        let leaf = root.get("STAT").unwrap().as_leaf().unwrap();
        assert!(matches!(leaf.read(&ctx), Err(Error::NotReadable(_))));
        assert!(matches!(leaf.write(&ctx, "1"), Err(Error::NotWritable(_))));
    }

    #[test]
    fn whitelist_is_case_sensitive() {
        let mut root = Branch::root();
        root.add_attribute(
            Attribute::new("mode")
                .write(|_, _| Ok(Value::None))
                .allowed_values(["ON", "OFF"]),
        )
        .unwrap();
        let client = ClientId::local();
        let ctx = Context::new(&client);
        let leaf = root.get("mode").unwrap().as_leaf().unwrap();
        assert!(leaf.write(&ctx, "ON").is_ok());
        assert!(matches!(
            leaf.write(&ctx, "on"),
            Err(Error::ValueNotAllowed { .. })
        ));
    }
}
