//! trackd socket server
//!
//! A TCP daemon exposing the resource tree to any number of line-protocol
//! clients, with server-initiated broadcasts and cooperative shutdown.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            TRACKD SERVER                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  Server (accept loop) ──spawn──► Session per connection              │
//! │      │                             ├─ read path  ──Request──┐       │
//! │      │                             └─ write path ◄──RES/ACK─┤       │
//! │      │                                   ▲                  │       │
//! │      │                          broadcast│ disconnect       ▼       │
//! │      └─begin_shutdown─► ClientRegistry ──┘          Request loop    │
//! │                          (owns client set)         (owns the tree)  │
//! │                                 ▲                         │         │
//! │                                 └──────── broadcast ──────┘         │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tasks: one accept loop, one registry loop, one request loop, and two
//! per connected client. State is only ever touched by the task that owns
//! it; everything else goes through channels.

pub mod dispatch;
pub mod lifecycle;
pub mod registry;
pub mod session;

use std::sync::Arc;

use crate::resource::{Directory, Lookup, ResourceNode, StateNode};

pub use dispatch::{Dispatcher, Flow, Request};
pub use lifecycle::{Server, ShutdownHandle};
pub use registry::{ClientHandle, ClientId, ClientRegistry, RegistryHandle, RegistryPhase};
pub use session::handle_connection;

/// Server state value while serving
pub const STATE_RUNNING: &str = "Running";
/// Final server state; reaching it shuts the server down
pub const STATE_QUITTING: &str = "Quitting";

/// The tree served by trackd.
///
/// ```text
/// /control/state   Running | Quitting
/// /info/name       trackd
/// /info/version    crate version
/// /tracks/<id>     looked up through `tracks`
/// ```
pub fn build_tree(tracks: Arc<dyn Lookup>) -> ResourceNode {
    let control = Directory::new().with_child(
        "state",
        ResourceNode::State(StateNode::new(
            STATE_RUNNING,
            [STATE_RUNNING, STATE_QUITTING],
            STATE_QUITTING,
        )),
    );
    let info = Directory::new()
        .with_child("name", ResourceNode::entry(env!("CARGO_PKG_NAME")))
        .with_child("version", ResourceNode::entry(env!("CARGO_PKG_VERSION")));

    Directory::new()
        .with_child("control", control.into())
        .with_child("info", info.into())
        .with_child("tracks", ResourceNode::lookup(tracks))
        .into()
}
