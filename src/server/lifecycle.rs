//! Listener and server lifecycle
//!
//! Accepts connections until shutdown is triggered, then stops accepting,
//! asks the registry to disconnect every client, and waits for the sessions,
//! the registry loop and the request loop to finish before releasing the
//! listener.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::Result;
use crate::resource::ResourceNode;
use crate::server::dispatch::Dispatcher;
use crate::server::registry::ClientRegistry;
use crate::server::session::handle_connection;

/// Requests queued for the request loop before read paths wait
const REQUEST_QUEUE_DEPTH: usize = 64;

/// Pause after a failed accept so a persistent error doesn't spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Triggers a server shutdown. Only the first trigger has any effect.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("shutdown requested");
            self.token.cancel();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct Server {
    listener: TcpListener,
    root: ResourceNode,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind the listener. `root` is the resource tree served to clients.
    pub async fn bind(addr: impl ToSocketAddrs, root: ResourceNode) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            root,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Serve until shutdown has been triggered and everything has drained
    pub async fn run(self) -> Result<()> {
        let Server {
            listener,
            root,
            shutdown,
        } = self;

        let (registry, registry_task) = ClientRegistry::spawn();
        let (requests, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let dispatcher = Dispatcher::new(root, registry.clone(), shutdown.clone());
        let request_task = tokio::spawn(dispatcher.run(request_rx));
        let sessions = TaskTracker::new();

        tracing::info!("trackd listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!("Accepted connection from {}", peer);
                        sessions.spawn(handle_connection(
                            stream,
                            peer,
                            registry.clone(),
                            requests.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        tracing::info!("server closing; waiting for clients to disconnect");
        registry.begin_shutdown();

        sessions.close();
        sessions.wait().await;
        if let Err(e) = registry_task.await {
            tracing::error!("client registry task failed: {}", e);
        }

        // Every session has gone, so this was the last request sender.
        drop(requests);
        if let Err(e) = request_task.await {
            tracing::error!("request loop task failed: {}", e);
        }

        drop(listener);
        tracing::info!("server stopped");
        Ok(())
    }
}
