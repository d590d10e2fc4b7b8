//! The `*`-prefixed common commands (`*IDN?`, `*RST`, ...).
//!
//! Special commands live in a flat table beside the command tree. They are
//! matched by their full name, case-insensitively, with no abbreviation and
//! no channel indices.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::key::validate_name;
use crate::node::Context;
use crate::value::Value;

/// Callback answering `*NAME?`.
pub type SpecialReadFn = Arc<dyn Fn(&Context<'_>) -> Result<Value> + Send + Sync>;

/// Callback executing `*NAME` or `*NAME <arg>`.
pub type SpecialWriteFn = Arc<dyn Fn(&Context<'_>, Option<&str>) -> Result<Value> + Send + Sync>;

/// One entry of the special-command table.
pub struct SpecialCommand {
    name: String,
    query_only: bool,
    read: Option<SpecialReadFn>,
    write: Option<SpecialWriteFn>,
}

impl SpecialCommand {
    /// Start describing a special command.
    ///
    /// A leading `*` is ignored. A trailing `?` declares the command
    /// query-only; [`SpecialCommands::add`] then refuses a write callback.
    pub fn new(name: &str) -> Self {
        let name = name.strip_prefix('*').unwrap_or(name);
        let (name, query_only) = match name.strip_suffix('?') {
            Some(stripped) => (stripped, true),
            None => (name, false),
        };
        SpecialCommand {
            name: name.to_string(),
            query_only,
            read: None,
            write: None,
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

    /// Set the action callback.
    pub fn write<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context<'_>, Option<&str>) -> Result<Value> + Send + Sync + 'static,
    {
        self.write = Some(Arc::new(f));
        self
    }

    /// The command name without `*` or `?`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the query callback.
    pub fn read_value(&self, ctx: &Context<'_>) -> Result<Value> {
        let read = self
            .read
            .as_ref()
            .ok_or_else(|| Error::NotReadable(format!("*{}", self.name)))?;
        read(ctx)
    }

    /// Invoke the action callback.
    pub fn write_value(&self, ctx: &Context<'_>, arg: Option<&str>) -> Result<Value> {
        let write = self
            .write
            .as_ref()
            .ok_or_else(|| Error::NotWritable(format!("*{}", self.name)))?;
        write(ctx, arg)
    }
}

impl fmt::Debug for SpecialCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecialCommand")
            .field("name", &self.name)
            .field("query_only", &self.query_only)
            .field("readable", &self.read.is_some())
            .field("writable", &self.write.is_some())
            .finish()
    }
}

/// Table of special commands keyed by upper-case name.
#[derive(Debug, Default)]
pub struct SpecialCommands {
    commands: IndexMap<String, SpecialCommand>,
}

impl SpecialCommands {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a special command.
    ///
    /// Fails with [`Error::InvalidName`] unless the name is alphabetic, with
    /// [`Error::WriteNotAllowed`] for a query-only command carrying a write
    /// callback, and with [`Error::NameCollision`] if the name is taken.
    pub fn add(&mut self, cmd: SpecialCommand) -> Result<()> {
        validate_name(&cmd.name)?;
        if cmd.query_only && cmd.write.is_some() {
            return Err(Error::WriteNotAllowed(cmd.name));
        }
        let upper = cmd.name.to_ascii_uppercase();
        if let Some(existing) = self.commands.get(&upper) {
            return Err(Error::NameCollision {
                new: cmd.name.clone(),
                existing: existing.name.clone(),
            });
        }
        self.commands.insert(upper, cmd);
        Ok(())
    }

    /// Look up a command by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&SpecialCommand> {
        self.commands.get(&name.to_ascii_uppercase())
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.values().map(|c| c.name.as_str())
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
