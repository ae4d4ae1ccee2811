//! trackd: track metadata over a line-based resource protocol
//!
//! trackd serves a small hierarchical resource tree to any number of TCP
//! clients. Clients send whitespace-separated command lines (`read`, `write`,
//! `delete`, `quit`) naming resource paths; the server answers each request
//! with zero or more `RES` lines and exactly one `ACK`, and announces changes
//! to every connected client.
//!
//! # Tree
//!
//! ```text
//! /control/state   Running | Quitting   (writing Quitting stops the server)
//! /info/name
//! /info/version
//! /tracks/<id>     track metadata from the catalogue database
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trackd::{build_tree, FormatResolver, MemoryTrackStore, Server, TrackLookup};
//!
//! let lookup = TrackLookup::new(
//!     Arc::new(MemoryTrackStore::new()),
//!     Arc::new(FormatResolver::default()),
//! );
//! let server = Server::bind("127.0.0.1:1350", build_tree(Arc::new(lookup))).await?;
//! server.run().await?;
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod protocol;
pub mod resource;
pub mod server;
pub mod tracks;

// Re-export commonly used types
pub use cli::Cli;
pub use config::Config;
pub use error::{Result, TrackdError};
pub use protocol::{AckStatus, LineCodec, Message};
pub use resource::{Resource, ResourceError, ResourceKind, ResourceNode, ResourcePath};
pub use server::{build_tree, Server, ShutdownHandle};
pub use tracks::{
    CommandResolver, FormatResolver, MemoryTrackStore, PathResolver, SqliteTrackStore, Track,
    TrackInfo, TrackLookup, TrackStore,
};
