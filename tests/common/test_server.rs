//! A trackd server on 127.0.0.1:0 for integration tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use trackd::{
    build_tree, FormatResolver, MemoryTrackStore, Server, ShutdownHandle, TrackInfo, TrackLookup,
};

use super::LineClient;

/// Longest a test waits for the server to do something
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    task: JoinHandle<trackd::Result<()>>,
}

impl TestServer {
    /// Start a server whose catalogue holds track 42 on record 7
    pub async fn start() -> Self {
        let store = MemoryTrackStore::new().with_track(42, sample_track());
        let lookup = TrackLookup::new(Arc::new(store), Arc::new(FormatResolver::default()));

        let server = Server::bind("127.0.0.1:0", build_tree(Arc::new(lookup)))
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr().expect("Failed to read server address");
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        Self {
            addr,
            shutdown,
            task,
        }
    }

    pub async fn connect(&self) -> LineClient {
        LineClient::connect(self.addr).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Wait for the server's run to complete, failing the test if it hangs
    pub async fn finished(self) {
        tokio::time::timeout(TIMEOUT, self.task)
            .await
            .expect("Server did not stop")
            .expect("Server task panicked")
            .expect("Server returned an error");
    }
}

pub fn sample_track() -> TrackInfo {
    TrackInfo {
        title: "Song".to_string(),
        artist: "Band".to_string(),
        record_id: 7,
        record_title: "Album".to_string(),
        record_artist: "Band".to_string(),
        recent_plays: 2,
    }
}
