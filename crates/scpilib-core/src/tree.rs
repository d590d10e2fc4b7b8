//! Attaching nodes to the command tree.
//!
//! Topology is built once at startup by calling these methods on the root
//! [`Branch`]. Adding a branch that already exists is idempotent and hands
//! back the existing node, so independent subsystems can each declare the
//! part of the tree they contribute:
//!
//! ```
//! use scpilib_core::{Attribute, Branch, Value};
//!
//! let mut root = Branch::root();
//! let source = root.add_component("source").unwrap();
//! let current = source.add_component("current").unwrap();
//! current
//!     .add_attribute(Attribute::new("upper").read(|_| Ok(Value::Int(7))))
//!     .unwrap();
//!
//! // A second declaration reuses the same node.
//! root.add_component("SOURce").unwrap();
//! assert_eq!(root.len(), 1);
//! ```

use indexmap::IndexMap;
use tracing::trace;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::node::{Attribute, Branch, Channel, Leaf, Node};

impl Branch {
    /// Add (or find) a plain branch called `name`.
    pub fn add_component(&mut self, name: &str) -> Result<&mut Branch> {
        self.attach_branch(name, None)
    }

    /// Add (or find) a channel branch of `count` instances numbered from
    /// `start`.
    ///
    /// Fails with [`Error::ChannelCount`] unless `count` is in `1..=99`, and
    /// with [`Error::ChannelConflict`] if `name` already exists with a
    /// different numbering.
    pub fn add_channel(&mut self, name: &str, count: u32, start: u8) -> Result<&mut Branch> {
        let channel = Channel::new(count, start)?;
        self.attach_branch(name, Some(channel))
    }

    /// Attach a leaf described by `attr`.
    ///
    /// If the attribute is marked default it becomes this branch's default
    /// child. Redefining an existing leaf is an error.
    pub fn add_attribute(&mut self, attr: Attribute) -> Result<&mut Leaf> {
        let key = Key::with_min_len(&attr.name, self.key_len)?;
        let fp = key.fingerprint();
        if let Some(existing) = self.children.get(&fp) {
            return Err(collision(existing, &key));
        }

        let leaf = Leaf {
            path: self.child_path(key.name()),
            key,
            read: attr.read,
            write: attr.write,
            allowed: attr.allowed,
            channel_depth: self.channel_depth,
            lock_exempt: attr.lock_exempt,
        };
        trace!(path = %leaf.path, indexed = leaf.is_indexed(), "attribute attached");
        self.children.insert(fp, Node::Leaf(leaf));
        if attr.default {
            self.default = Some(fp);
        }

        match self.children.get_mut(&fp) {
            Some(Node::Leaf(leaf)) => Ok(leaf),
            _ => Err(Error::NotFound(attr.name)),
        }
    }

    fn attach_branch(&mut self, name: &str, channel: Option<Channel>) -> Result<&mut Branch> {
        let key = Key::with_min_len(name, self.key_len)?;
        let fp = key.fingerprint();

        match self.children.get(&fp) {
            Some(existing) => {
                if !same_name(existing, &key) {
                    return Err(collision(existing, &key));
                }
                match existing {
                    Node::Branch(branch) if branch.channel == channel => {}
                    Node::Branch(Branch {
                        channel: Some(existing),
                        ..
                    }) => {
                        return Err(Error::ChannelConflict {
                            name: key.name().to_string(),
                            count: existing.count(),
                            start: existing.start(),
                        });
                    }
                    _ => return Err(Error::KindConflict(key.name().to_string())),
                }
            }
            None => {
                let child = Branch {
                    path: self.child_path(key.name()),
                    key: Some(key),
                    channel,
                    children: IndexMap::new(),
                    default: None,
                    key_len: self.key_len,
                    channel_depth: self.channel_depth + usize::from(channel.is_some()),
                };
                trace!(
                    path = %child.path,
                    channel = ?child.channel,
                    "branch attached"
                );
                self.children.insert(fp, Node::Branch(child));
            }
        }

        match self.children.get_mut(&fp) {
            Some(Node::Branch(branch)) => Ok(branch),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }
}

fn same_name(node: &Node, key: &Key) -> bool {
    node.key()
        .is_some_and(|k| k.name().eq_ignore_ascii_case(key.name()))
}

fn collision(existing: &Node, key: &Key) -> Error {
    Error::NameCollision {
        new: key.name().to_string(),
        existing: existing.key().map(|k| k.name().to_string()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::ClientId;
    use crate::node::Context;
    use crate::value::Value;

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    #[test]
    fn add_component_is_idempotent() {
        let mut root = Branch::root();
        root.add_component("source")
            .unwrap()
            .add_component("current")
            .unwrap();
        let again = root.add_component("source").unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(root.len(), 1);
    }

    #[test]
    fn add_component_case_insensitive_reuse() {
        let mut root = Branch::root();
        root.add_component("source").unwrap();
        root.add_component("SOURCE").unwrap();
        assert_eq!(root.len(), 1);
    }

    #[test]
    fn add_component_rejects_invalid_name() {
        let mut root = Branch::root();
        assert!(matches!(
            root.add_component("chan01"),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(root.add_component(""), Err(Error::InvalidName(_))));
    }

    #[test]
    fn fingerprint_collision_is_reported() {
        let mut root = Branch::root();
        root.add_component("volt").unwrap();
        assert!(matches!(
            root.add_component("voltage"),
            Err(Error::NameCollision { .. })
        ));
    }

    #[test]
    fn paths_are_built_from_ancestry() {
        let mut root = Branch::root();
        let leaf = root
            .add_component("source")
            .unwrap()
            .add_component("current")
            .unwrap()
            .add_attribute(Attribute::new("upper"))
            .unwrap();
        assert_eq!(leaf.path(), "source:current:upper");
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    #[test]
    fn channel_propagates_indexed_status() {
        let mut root = Branch::root();
        let chan = root.add_channel("channel", 4, 1).unwrap();
        assert!(chan.is_indexed());
        let inner = chan.add_component("trigger").unwrap();
        assert!(inner.is_indexed());
        assert_eq!(inner.channel_depth(), 1);
        let nested = inner.add_channel("input", 2, 1).unwrap();
        let leaf = nested.add_attribute(Attribute::new("gain")).unwrap();
        assert_eq!(leaf.channel_depth(), 2);
        assert!(leaf.is_indexed());

        let plain = root.add_component("system").unwrap();
        assert!(!plain.is_indexed());
    }

    #[test]
    fn add_channel_is_idempotent_with_same_numbering() {
        let mut root = Branch::root();
        root.add_channel("channel", 4, 1).unwrap();
        let again = root.add_channel("channel", 4, 1).unwrap();
        assert_eq!(again.channel().map(|c| c.count()), Some(4));
        assert_eq!(root.len(), 1);
    }

    #[test]
    fn add_channel_conflicting_numbering_fails() {
        let mut root = Branch::root();
        root.add_channel("channel", 4, 1).unwrap();
        assert!(matches!(
            root.add_channel("channel", 8, 1),
            Err(Error::ChannelConflict { count: 4, start: 1, .. })
        ));
        assert!(matches!(
            root.add_channel("channel", 4, 0),
            Err(Error::ChannelConflict { .. })
        ));
    }

    #[test]
    fn add_channel_count_overflow() {
        let mut root = Branch::root();
        assert!(matches!(
            root.add_channel("channel", 100, 1),
            Err(Error::ChannelCount(100))
        ));
        assert!(root.is_empty());
    }

    #[test]
    fn channel_and_component_do_not_mix() {
        let mut root = Branch::root();
        root.add_component("channel").unwrap();
        assert!(matches!(
            root.add_channel("channel", 2, 1),
            Err(Error::KindConflict(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    #[test]
    fn default_attribute_answers_branch_reads() {
        let mut root = Branch::root();
        let meas = root.add_component("measure").unwrap();
        meas.add_attribute(Attribute::new("voltage").read(|_| Ok(Value::Float(1.5))).default())
            .unwrap();
        meas.add_attribute(Attribute::new("current").read(|_| Ok(Value::Float(0.2))))
            .unwrap();

        let client = ClientId::local();
        let branch = root.get("MEAS").unwrap().as_branch().unwrap();
        assert_eq!(branch.read(&Context::new(&client)).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn set_default_requires_existing_child() {
        let mut root = Branch::root();
        let meas = root.add_component("measure").unwrap();
        assert!(matches!(
            meas.set_default("voltage"),
            Err(Error::DefaultNotFound(_))
        ));
        meas.add_attribute(Attribute::new("voltage")).unwrap();
        meas.set_default("VOLT").unwrap();
        assert!(meas.default_leaf().is_some());
    }

    #[test]
    fn redefining_attribute_fails() {
        let mut root = Branch::root();
        root.add_attribute(Attribute::new("level")).unwrap();
        assert!(matches!(
            root.add_attribute(Attribute::new("LEVEL")),
            Err(Error::NameCollision { .. })
        ));
    }

    #[test]
    fn lookup_uses_abbreviation_rules() {
        let mut root = Branch::root();
        root.add_attribute(Attribute::new("voltage")).unwrap();
        assert!(root.get("VOLT").is_ok());
        assert!(root.get("volta").is_ok());
        assert!(matches!(root.get("vol"), Err(Error::NotFound(_))));
        assert!(matches!(root.get("voltagex"), Err(Error::NotFound(_))));
        assert!(matches!(root.get("VOLX"), Err(Error::NotFound(_))));
    }

    #[test]
    fn children_keep_registration_order() {
        let mut root = Branch::root();
        for name in ["zeta", "alpha", "mid"] {
            root.add_component(name).unwrap();
        }
        let names: Vec<_> = root
            .children()
            .filter_map(|n| n.key().map(|k| k.name().to_string()))
            .collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }
}
