//! Common test utilities for trackd integration tests
//!
//! This module provides:
//! - `TestServer` which runs a server on an ephemeral port over an in-memory
//!   track catalogue
//! - `LineClient` for talking the line protocol to it

#![allow(dead_code)]

pub mod line_client;
pub mod test_server;

pub use line_client::LineClient;
pub use test_server::TestServer;
