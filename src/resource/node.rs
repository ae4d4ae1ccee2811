//! Resource node variants
//!
//! A closed set of node kinds share one capability surface: `read`, `write`,
//! `delete` and `add`. Each operation takes the absolute path of the node it
//! is invoked on plus the remaining path segments below it, and either
//! handles the request itself or forwards it to the named child.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{flatten_value, Resource, ResourceError, ResourceKind, ResourcePath};

/// Child name of a state node holding its current value
const STATE_CURRENT: &str = "current";
/// Child name of a state node listing its allowed values
const STATE_ALLOWED: &str = "allowed";

/// External source for the children of a [`LookupNode`].
///
/// Lookups may block (database queries, helper processes); callers run them
/// through [`PendingLookup::fetch`], which moves them onto the blocking pool.
pub trait Lookup: Send + Sync {
    /// Materialise the child named `key`.
    fn lookup(&self, key: &str) -> Result<Value, ResourceError>;
}

/// Result of reading a node
pub enum ReadOutcome {
    /// The read was answered from the tree itself.
    Resources(Vec<Resource>),
    /// The read needs an external lookup to complete.
    Pending(PendingLookup),
}

/// A lookup resolved against the tree but not yet performed
pub struct PendingLookup {
    path: ResourcePath,
    key: String,
    source: Arc<dyn Lookup>,
}

impl PendingLookup {
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Run the lookup and flatten its result under the requested path
    pub async fn fetch(self) -> Result<Vec<Resource>, ResourceError> {
        let PendingLookup { path, key, source } = self;
        let value = tokio::task::spawn_blocking(move || source.lookup(&key))
            .await
            .map_err(|e| ResourceError::Backend(format!("lookup task failed: {}", e)))?
            .map_err(|e| match e {
                ResourceError::NotFound(_) => ResourceError::NotFound(path.to_string()),
                e => e,
            })?;
        Ok(flatten_value(&path, &value))
    }
}

impl fmt::Debug for PendingLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLookup")
            .field("path", &self.path)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Result of a successful write or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    /// Value now held by the resource
    pub value: String,
    /// Whether the write moved a state node into its final value
    pub terminal: bool,
}

/// A node in the resource tree
pub enum ResourceNode {
    Directory(Directory),
    Entry(Entry),
    State(StateNode),
    Lookup(LookupNode),
}

impl ResourceNode {
    pub fn entry(value: impl Into<String>) -> Self {
        ResourceNode::Entry(Entry::new(value))
    }

    pub fn lookup(source: Arc<dyn Lookup>) -> Self {
        ResourceNode::Lookup(LookupNode::new(source))
    }

    /// Read the resource at `rel` below this node.
    pub fn read(&self, here: &ResourcePath, rel: &[String]) -> Result<ReadOutcome, ResourceError> {
        match self {
            ResourceNode::Directory(dir) => match rel.split_first() {
                None => Ok(ReadOutcome::Resources(self.flatten(here))),
                Some((name, rest)) => dir.child(here, name)?.read(&here.join(name.as_str()), rest),
            },
            ResourceNode::Entry(entry) => {
                if rel.is_empty() {
                    Ok(ReadOutcome::Resources(vec![Resource::entry(
                        here.clone(),
                        entry.value.as_str(),
                    )]))
                } else {
                    Err(ResourceError::NotFound(here.join_all(rel).to_string()))
                }
            }
            ResourceNode::State(state) => state.read(here, rel).map(ReadOutcome::Resources),
            ResourceNode::Lookup(lookup) => lookup.read(here, rel),
        }
    }

    /// Write `value` to the resource at `rel` below this node.
    pub fn write(
        &mut self,
        here: &ResourcePath,
        rel: &[String],
        value: &str,
    ) -> Result<Written, ResourceError> {
        match self {
            ResourceNode::Directory(dir) => match rel.split_first() {
                None => Err(ResourceError::ReadOnly(here.to_string())),
                Some((name, rest)) => {
                    let path = here.join(name.as_str());
                    dir.child_mut(here, name)?.write(&path, rest, value)
                }
            },
            ResourceNode::Entry(_) => Err(ResourceError::ReadOnly(here.join_all(rel).to_string())),
            ResourceNode::State(state) => state.write(here, rel, value),
            ResourceNode::Lookup(_) => Err(ResourceError::Rejected(here.join_all(rel).to_string())),
        }
    }

    /// Delete the resource at `rel` below this node.
    pub fn delete(&mut self, here: &ResourcePath, rel: &[String]) -> Result<Written, ResourceError> {
        match self {
            ResourceNode::Directory(dir) => match rel.split_first() {
                None => Err(ResourceError::ReadOnly(here.to_string())),
                Some((name, rest)) => {
                    let path = here.join(name.as_str());
                    dir.child_mut(here, name)?.delete(&path, rest)
                }
            },
            ResourceNode::Entry(_) => Err(ResourceError::ReadOnly(here.join_all(rel).to_string())),
            ResourceNode::State(state) => state.delete(here, rel),
            ResourceNode::Lookup(_) => Err(ResourceError::Rejected(here.join_all(rel).to_string())),
        }
    }

    /// Add `child` at `rel` below this node.
    ///
    /// Directory membership is fixed once the tree is built, so this only
    /// ever reports why the addition is refused.
    pub fn add(
        &mut self,
        here: &ResourcePath,
        rel: &[String],
        child: ResourceNode,
    ) -> Result<(), ResourceError> {
        match self {
            ResourceNode::Directory(dir) => match rel {
                [] => Err(ResourceError::AlreadyExists(here.to_string())),
                [name] => {
                    if dir.children.contains_key(name) {
                        Err(ResourceError::AlreadyExists(here.join(name.as_str()).to_string()))
                    } else {
                        Err(ResourceError::Immutable(here.to_string()))
                    }
                }
                [name, rest @ ..] => {
                    let path = here.join(name.as_str());
                    dir.child_mut(here, name)?.add(&path, rest, child)
                }
            },
            ResourceNode::Entry(_) | ResourceNode::State(_) => {
                Err(ResourceError::ReadOnly(here.join_all(rel).to_string()))
            }
            ResourceNode::Lookup(_) => Err(ResourceError::Rejected(here.join_all(rel).to_string())),
        }
    }

    /// Flatten this node and everything below it that the tree itself holds.
    ///
    /// Externally backed nodes cannot enumerate their children and appear as
    /// empty directories.
    pub fn flatten(&self, here: &ResourcePath) -> Vec<Resource> {
        let mut out = Vec::new();
        self.push_flattened(&mut out, here);
        out
    }

    fn push_flattened(&self, out: &mut Vec<Resource>, here: &ResourcePath) {
        match self {
            ResourceNode::Directory(dir) => {
                out.push(Resource::new(
                    here.clone(),
                    ResourceKind::Directory,
                    dir.children.len().to_string(),
                ));
                for (name, child) in &dir.children {
                    child.push_flattened(out, &here.join(name.as_str()));
                }
            }
            ResourceNode::Entry(entry) => out.push(Resource::entry(here.clone(), entry.value.as_str())),
            ResourceNode::State(state) => out.push(Resource::entry(here.clone(), state.current())),
            ResourceNode::Lookup(_) => {
                out.push(Resource::new(here.clone(), ResourceKind::Directory, "0"))
            }
        }
    }
}

/// Named children, listed in name order
#[derive(Default)]
pub struct Directory {
    children: BTreeMap<String, ResourceNode>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used while constructing the tree.
    pub fn with_child(mut self, name: impl Into<String>, child: ResourceNode) -> Self {
        self.children.insert(name.into(), child);
        self
    }

    fn child(&self, here: &ResourcePath, name: &str) -> Result<&ResourceNode, ResourceError> {
        self.children
            .get(name)
            .ok_or_else(|| ResourceError::NotFound(here.join(name).to_string()))
    }

    fn child_mut(&mut self, here: &ResourcePath, name: &str) -> Result<&mut ResourceNode, ResourceError> {
        self.children
            .get_mut(name)
            .ok_or_else(|| ResourceError::NotFound(here.join(name).to_string()))
    }
}

impl From<Directory> for ResourceNode {
    fn from(dir: Directory) -> Self {
        ResourceNode::Directory(dir)
    }
}

/// A fixed scalar
pub struct Entry {
    value: String,
}

impl Entry {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }
}

/// An enumerated state with a one-way final value.
///
/// Values and the `current`/`allowed` child names compare
/// case-insensitively. Once the final value is reached every further write
/// fails; deleting the state is the same as writing the final value.
pub struct StateNode {
    current: String,
    allowed: Vec<String>,
    terminal: String,
}

impl StateNode {
    /// `initial` and `terminal` are added to `allowed` if missing.
    pub fn new<I, S>(initial: impl Into<String>, allowed: I, terminal: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let current = initial.into();
        let terminal = terminal.into();
        let mut allowed: Vec<String> = allowed.into_iter().map(Into::into).collect();
        for required in [&current, &terminal] {
            if !allowed.iter().any(|a| a.eq_ignore_ascii_case(required)) {
                allowed.push(required.clone());
            }
        }
        Self {
            current,
            allowed,
            terminal,
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn is_terminal(&self) -> bool {
        self.current.eq_ignore_ascii_case(&self.terminal)
    }

    /// Move to `value`, which must be one of the allowed values.
    pub fn set(&mut self, value: &str) -> Result<Written, ResourceError> {
        if self.is_terminal() {
            return Err(ResourceError::Terminal(self.current.clone()));
        }
        let canonical = self
            .allowed
            .iter()
            .find(|a| a.eq_ignore_ascii_case(value))
            .ok_or_else(|| ResourceError::InvalidValue {
                value: value.to_string(),
                allowed: self.allowed.join(", "),
            })?;
        self.current = canonical.clone();
        Ok(Written {
            value: self.current.clone(),
            terminal: self.is_terminal(),
        })
    }

    fn read(&self, here: &ResourcePath, rel: &[String]) -> Result<Vec<Resource>, ResourceError> {
        match rel {
            [] => Ok(vec![Resource::entry(here.clone(), self.current.as_str())]),
            [name] if name.eq_ignore_ascii_case(STATE_CURRENT) => Ok(vec![Resource::entry(
                here.join(STATE_CURRENT),
                self.current.as_str(),
            )]),
            [name] if name.eq_ignore_ascii_case(STATE_ALLOWED) => {
                Ok(flatten_value(&here.join(STATE_ALLOWED), &Value::from(self.allowed.clone())))
            }
            _ => Err(ResourceError::NotFound(here.join_all(rel).to_string())),
        }
    }

    fn write(&mut self, here: &ResourcePath, rel: &[String], value: &str) -> Result<Written, ResourceError> {
        match rel {
            [] => self.set(value),
            [name] if name.eq_ignore_ascii_case(STATE_CURRENT) => self.set(value),
            [name] if name.eq_ignore_ascii_case(STATE_ALLOWED) => {
                Err(ResourceError::ReadOnly(here.join(STATE_ALLOWED).to_string()))
            }
            _ => Err(ResourceError::NotFound(here.join_all(rel).to_string())),
        }
    }

    fn delete(&mut self, here: &ResourcePath, rel: &[String]) -> Result<Written, ResourceError> {
        let terminal = self.terminal.clone();
        self.write(here, rel, &terminal)
    }
}

/// A directory whose children live outside the tree, fetched by name
pub struct LookupNode {
    source: Arc<dyn Lookup>,
}

impl LookupNode {
    pub fn new(source: Arc<dyn Lookup>) -> Self {
        Self { source }
    }

    fn read(&self, here: &ResourcePath, rel: &[String]) -> Result<ReadOutcome, ResourceError> {
        match rel {
            [] => Ok(ReadOutcome::Resources(vec![Resource::new(
                here.clone(),
                ResourceKind::Directory,
                "0",
            )])),
            [key] => Ok(ReadOutcome::Pending(PendingLookup {
                path: here.join(key.as_str()),
                key: key.clone(),
                source: Arc::clone(&self.source),
            })),
            _ => Err(ResourceError::NotFound(here.join_all(rel).to_string())),
        }
    }
}
