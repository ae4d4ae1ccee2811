//! Hierarchical resource tree
//!
//! Clients address everything the daemon exposes by slash-separated paths
//! into a tree of [`ResourceNode`]s. Reading any part of the tree flattens it
//! into a list of [`Resource`] triples which travel over the wire as `RES`
//! messages:
//!
//! ```text
//! /tracks/42               directory 7
//! /tracks/42/path          entry     M:\7\42
//! /tracks/42/title         entry     Song
//! ...
//! ```
//!
//! Directories and lists announce the number of children they contain, and
//! their children always follow them. Structured values (such as a track
//! looked up from the catalogue) are flattened from their `serde`
//! serialization, so field names come from the struct definition (or its
//! `#[serde(rename)]` attributes) and field order is preserved.

pub mod node;
pub mod path;

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::{Message, RES};

pub use node::{
    Directory, Entry, Lookup, LookupNode, PendingLookup, ReadOutcome, ResourceNode, StateNode,
    Written,
};
pub use path::ResourcePath;

/// Error operating on a resource.
///
/// The display form is sent verbatim to clients as the reason of an
/// `ACK FAIL`.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("read-only: {0}")]
    ReadOnly(String),

    #[error("invalid value {value:?}, expected one of: {allowed}")]
    InvalidValue { value: String, allowed: String },

    #[error("state is final: {0}")]
    Terminal(String),

    #[error("directory is fixed: {0}")]
    Immutable(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("externally backed: {0}")]
    Rejected(String),

    #[error("bad key: {0}")]
    BadKey(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Kind of a flattened resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Directory,
    List,
    Entry,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Directory => "directory",
            ResourceKind::List => "list",
            ResourceKind::Entry => "entry",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flattened resource: full path, kind, and value.
///
/// For directories and lists the value is the number of children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub path: ResourcePath,
    pub kind: ResourceKind,
    pub value: String,
}

impl Resource {
    pub fn new(path: ResourcePath, kind: ResourceKind, value: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            value: value.into(),
        }
    }

    pub fn entry(path: ResourcePath, value: impl Into<String>) -> Self {
        Self::new(path, ResourceKind::Entry, value)
    }

    /// `RES TAG PATH KIND VALUE`
    pub fn to_message(&self, tag: &str) -> Message {
        Message::new(RES)
            .arg(tag)
            .arg(self.path.to_string())
            .arg(self.kind.as_str())
            .arg(self.value.as_str())
    }
}

/// Flatten any serializable value into resources rooted at `path`
pub fn to_resources<T: Serialize + ?Sized>(
    path: &ResourcePath,
    item: &T,
) -> Result<Vec<Resource>, ResourceError> {
    let value = serde_json::to_value(item)?;
    Ok(flatten_value(path, &value))
}

/// Flatten a JSON value: objects become directories, arrays become lists
/// indexed from zero, and everything else becomes an entry.
pub fn flatten_value(path: &ResourcePath, value: &Value) -> Vec<Resource> {
    let mut resources = Vec::new();
    push_value(&mut resources, path, value);
    resources
}

fn push_value(out: &mut Vec<Resource>, path: &ResourcePath, value: &Value) {
    match value {
        Value::Object(fields) => {
            out.push(Resource::new(
                path.clone(),
                ResourceKind::Directory,
                fields.len().to_string(),
            ));
            for (name, field) in fields {
                push_value(out, &path.join(name.as_str()), field);
            }
        }
        Value::Array(items) => {
            out.push(Resource::new(
                path.clone(),
                ResourceKind::List,
                items.len().to_string(),
            ));
            for (index, item) in items.iter().enumerate() {
                push_value(out, &path.join(index.to_string()), item);
            }
        }
        Value::String(s) => out.push(Resource::entry(path.clone(), s.as_str())),
        Value::Null => out.push(Resource::entry(path.clone(), "")),
        other => out.push(Resource::entry(path.clone(), other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Record {
        #[serde(rename = "record_title")]
        title: String,
        plays: u64,
        #[serde(skip)]
        #[allow(dead_code)]
        internal: u32,
        tags: Vec<String>,
    }

    fn triples(resources: &[Resource]) -> Vec<(String, &'static str, String)> {
        resources
            .iter()
            .map(|r| (r.path.to_string(), r.kind.as_str(), r.value.clone()))
            .collect()
    }

    #[test]
    fn test_struct_flattens_in_field_order() {
        let record = Record {
            title: "Album".to_string(),
            plays: 3,
            internal: 9,
            tags: vec!["rock".to_string(), "live".to_string()],
        };
        let resources = to_resources(&ResourcePath::parse("/records/7"), &record).unwrap();
        assert_eq!(
            triples(&resources),
            vec![
                ("/records/7".to_string(), "directory", "3".to_string()),
                ("/records/7/record_title".to_string(), "entry", "Album".to_string()),
                ("/records/7/plays".to_string(), "entry", "3".to_string()),
                ("/records/7/tags".to_string(), "list", "2".to_string()),
                ("/records/7/tags/0".to_string(), "entry", "rock".to_string()),
                ("/records/7/tags/1".to_string(), "entry", "live".to_string()),
            ]
        );
    }

    #[test]
    fn test_scalars_and_null() {
        let resources = to_resources(&ResourcePath::parse("/x"), &Option::<u8>::None).unwrap();
        assert_eq!(triples(&resources), vec![("/x".to_string(), "entry", String::new())]);

        let resources = to_resources(&ResourcePath::parse("/y"), &true).unwrap();
        assert_eq!(triples(&resources), vec![("/y".to_string(), "entry", "true".to_string())]);
    }

    #[test]
    fn test_resource_message() {
        let res = Resource::entry(ResourcePath::parse("/tracks/42/title"), "Song");
        assert_eq!(res.to_message("T1").pack(), "RES T1 /tracks/42/title entry Song");
    }
}
