//! Client registry
//!
//! A single task owns the set of connected clients. Sessions and the
//! dispatcher talk to it through a cloneable [`RegistryHandle`]; every
//! registration, removal, broadcast and shutdown request is a message to that
//! task, so the client set is never shared or locked.
//!
//! Lifecycle:
//!
//! ```text
//! Running ──begin_shutdown──► Draining ──last client gone──► Stopped
//!    └────────begin_shutdown with no clients─────────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::Message;

/// Broadcasts a client may fall behind by before it is disconnected
pub const BROADCAST_QUEUE_DEPTH: usize = 256;

/// Identity of one connected session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        write!(f, "cli_{}", &simple[..8])
    }
}

/// What the registry keeps for each client: where to push broadcasts and
/// how to ask the session to disconnect.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    broadcast: mpsc::Sender<Message>,
    disconnect: CancellationToken,
}

impl ClientHandle {
    pub fn new(broadcast: mpsc::Sender<Message>, disconnect: CancellationToken) -> Self {
        Self {
            id: ClientId::new(),
            broadcast,
            disconnect,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }
}

/// Registry lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryPhase {
    /// Accepting registrations
    Running,
    /// Shutting down; waiting for registered clients to leave
    Draining,
    /// Loop finished
    Stopped,
}

enum Command {
    Register {
        handle: ClientHandle,
        reply: oneshot::Sender<bool>,
    },
    Deregister {
        id: ClientId,
        reply: oneshot::Sender<bool>,
    },
    Broadcast(Message),
    BeginShutdown,
    ClientCount(oneshot::Sender<usize>),
}

/// Cloneable front end of the registry task
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl RegistryHandle {
    /// Add a client. Fails when shutting down or when the client is already
    /// registered.
    pub async fn register(&self, handle: ClientHandle) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.commands.send(Command::Register { handle, reply }).is_err() {
            tracing::warn!("register: client registry has stopped");
            return false;
        }
        answer.await.unwrap_or(false)
    }

    /// Remove a client. Fails when the client is not registered.
    pub async fn deregister(&self, id: ClientId) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.commands.send(Command::Deregister { id, reply }).is_err() {
            tracing::warn!(client = %id, "deregister: client registry has stopped");
            return false;
        }
        answer.await.unwrap_or(false)
    }

    /// Push a message to every registered client
    pub fn broadcast(&self, message: Message) {
        if self.commands.send(Command::Broadcast(message)).is_err() {
            tracing::debug!("broadcast dropped: client registry has stopped");
        }
    }

    /// Refuse new clients and ask every registered one to disconnect
    pub fn begin_shutdown(&self) {
        if self.commands.send(Command::BeginShutdown).is_err() {
            tracing::debug!("client registry already stopped");
        }
    }

    /// Number of registered clients, or zero once the registry has stopped
    pub async fn client_count(&self) -> usize {
        let (reply, answer) = oneshot::channel();
        if self.commands.send(Command::ClientCount(reply)).is_err() {
            return 0;
        }
        answer.await.unwrap_or(0)
    }
}

/// The registry task state
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientHandle>,
    phase: RegistryPhase,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ClientRegistry {
    pub fn new() -> (Self, RegistryHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            clients: HashMap::new(),
            phase: RegistryPhase::Running,
            commands: rx,
        };
        (registry, RegistryHandle { commands: tx })
    }

    /// Start the registry loop on its own task.
    ///
    /// The join handle completes once the registry has drained after
    /// [`RegistryHandle::begin_shutdown`], or once every handle is dropped.
    pub fn spawn() -> (RegistryHandle, JoinHandle<()>) {
        let (registry, handle) = Self::new();
        (handle, tokio::spawn(registry.run()))
    }

    pub fn phase(&self) -> RegistryPhase {
        self.phase
    }

    /// Run the registry loop
    pub async fn run(mut self) {
        tracing::info!("client registry running");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
            if self.phase == RegistryPhase::Stopped {
                break;
            }
        }
        self.phase = RegistryPhase::Stopped;
        tracing::info!("client registry stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { handle, reply } => {
                let id = handle.id();
                tracing::debug!(client = %id, "adding client");
                let result = self.add_client(handle);
                if let Err(reason) = &result {
                    tracing::warn!(client = %id, "register refused: {}", reason);
                }
                let _ = reply.send(result.is_ok());
            }
            Command::Deregister { id, reply } => {
                tracing::debug!(client = %id, "removing client");
                let result = self.remove_client(id);
                if let Err(reason) = &result {
                    tracing::warn!(client = %id, "deregister refused: {}", reason);
                }
                let _ = reply.send(result.is_ok());

                // While draining we only wait for the remaining clients.
                if self.phase == RegistryPhase::Draining && self.clients.is_empty() {
                    self.phase = RegistryPhase::Stopped;
                }
            }
            Command::Broadcast(message) => {
                tracing::debug!(clients = self.clients.len(), "broadcast: {}", message);
                for (id, client) in &self.clients {
                    match client.broadcast.try_send(message.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // The session deregisters once it has gone.
                            if !client.disconnect.is_cancelled() {
                                tracing::warn!(client = %id, "client not keeping up with broadcasts, disconnecting");
                                client.disconnect.cancel();
                            }
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            tracing::debug!(client = %id, "broadcast sink closed");
                        }
                    }
                }
            }
            Command::BeginShutdown => self.begin_shutdown(),
            Command::ClientCount(reply) => {
                let _ = reply.send(self.clients.len());
            }
        }
    }

    fn begin_shutdown(&mut self) {
        if self.phase != RegistryPhase::Running {
            return;
        }
        tracing::info!(clients = self.clients.len(), "client registry closing");
        self.phase = RegistryPhase::Draining;

        for client in self.clients.values() {
            client.disconnect.cancel();
        }

        if self.clients.is_empty() {
            self.phase = RegistryPhase::Stopped;
        }
    }

    fn add_client(&mut self, handle: ClientHandle) -> Result<(), &'static str> {
        if self.phase != RegistryPhase::Running {
            return Err("shutting down");
        }
        if self.clients.contains_key(&handle.id) {
            return Err("client already present");
        }
        self.clients.insert(handle.id, handle);
        Ok(())
    }

    fn remove_client(&mut self, id: ClientId) -> Result<(), &'static str> {
        match self.clients.remove(&id) {
            Some(_) => Ok(()),
            None => Err("client not present"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestClient {
        handle: ClientHandle,
        inbox: mpsc::Receiver<Message>,
        disconnect: CancellationToken,
    }

    fn client() -> TestClient {
        client_with_depth(BROADCAST_QUEUE_DEPTH)
    }

    fn client_with_depth(depth: usize) -> TestClient {
        let (tx, inbox) = mpsc::channel(depth);
        let disconnect = CancellationToken::new();
        TestClient {
            handle: ClientHandle::new(tx, disconnect.clone()),
            inbox,
            disconnect,
        }
    }

    #[test]
    fn test_client_id_display() {
        let id = ClientId::new();
        let shown = id.to_string();
        assert!(shown.starts_with("cli_"));
        assert_eq!(shown.len(), 12);
    }

    #[tokio::test]
    async fn test_register_deregister_counts() {
        let (registry, task) = ClientRegistry::spawn();
        let a = client();
        let b = client();

        assert!(registry.register(a.handle.clone()).await);
        assert!(registry.register(b.handle.clone()).await);
        assert!(!registry.register(a.handle.clone()).await, "duplicate must fail");
        assert_eq!(registry.client_count().await, 2);

        assert!(registry.deregister(a.handle.id()).await);
        assert!(!registry.deregister(a.handle.id()).await, "absent must fail");
        assert!(!registry.deregister(ClientId::new()).await);
        assert_eq!(registry.client_count().await, 1);

        assert!(registry.deregister(b.handle.id()).await);
        assert_eq!(registry.client_count().await, 0);

        drop(registry);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_refuses_registration() {
        let (registry, task) = ClientRegistry::spawn();
        registry.begin_shutdown();
        // Empty registry stops straight away.
        task.await.unwrap();
        assert!(!registry.register(client().handle).await);

        let (registry, _task) = ClientRegistry::spawn();
        let a = client();
        assert!(registry.register(a.handle.clone()).await);
        registry.begin_shutdown();
        assert!(!registry.register(client().handle).await);
        assert_eq!(registry.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_precedes_later_commands() {
        let (registry, _task) = ClientRegistry::spawn();
        let mut a = client();
        let mut b = client();
        let mut late = client();
        assert!(registry.register(a.handle.clone()).await);
        assert!(registry.register(b.handle.clone()).await);

        registry.broadcast(Message::new("RES").arg("!").arg("one"));
        assert!(registry.register(late.handle.clone()).await);

        // By the time the later registration was answered, the broadcast
        // was already in both sinks.
        assert_eq!(a.inbox.try_recv().unwrap().args()[1], "one");
        assert_eq!(b.inbox.try_recv().unwrap().args()[1], "one");
        assert!(late.inbox.try_recv().is_err());

        registry.broadcast(Message::new("RES").arg("!").arg("two"));
        assert!(registry.deregister(b.handle.id()).await);
        registry.broadcast(Message::new("RES").arg("!").arg("three"));
        assert_eq!(registry.client_count().await, 2);

        assert_eq!(a.inbox.try_recv().unwrap().args()[1], "two");
        assert_eq!(a.inbox.try_recv().unwrap().args()[1], "three");
        assert_eq!(b.inbox.try_recv().unwrap().args()[1], "two");
        assert!(b.inbox.try_recv().is_err(), "no broadcasts after removal");
        assert_eq!(late.inbox.try_recv().unwrap().args()[1], "two");
    }

    #[tokio::test]
    async fn test_lagging_client_is_disconnected() {
        let (registry, _task) = ClientRegistry::spawn();
        let mut slow = client_with_depth(1);
        let mut fast = client();
        assert!(registry.register(slow.handle.clone()).await);
        assert!(registry.register(fast.handle.clone()).await);

        registry.broadcast(Message::new("RES").arg("!").arg("one"));
        registry.broadcast(Message::new("RES").arg("!").arg("two"));
        assert_eq!(registry.client_count().await, 2);

        assert!(slow.disconnect.is_cancelled());
        assert!(!fast.disconnect.is_cancelled());
        assert_eq!(slow.inbox.try_recv().unwrap().args()[1], "one");
        assert!(slow.inbox.try_recv().is_err());
        assert_eq!(fast.inbox.try_recv().unwrap().args()[1], "one");
        assert_eq!(fast.inbox.try_recv().unwrap().args()[1], "two");

        // Removal is still the session's job.
        assert!(registry.deregister(slow.handle.id()).await);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_stops() {
        let (registry, task) = ClientRegistry::spawn();
        let a = client();
        let b = client();
        assert!(registry.register(a.handle.clone()).await);
        assert!(registry.register(b.handle.clone()).await);

        registry.begin_shutdown();
        registry.begin_shutdown();
        a.disconnect.cancelled().await;
        b.disconnect.cancelled().await;

        assert!(registry.deregister(a.handle.id()).await);
        assert!(!task.is_finished());
        assert!(registry.deregister(b.handle.id()).await);

        task.await.unwrap();
        assert_eq!(registry.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_phase_transitions() {
        let (mut registry, handle) = ClientRegistry::new();
        assert_eq!(registry.phase(), RegistryPhase::Running);

        let a = client();
        let (reply, _answer) = oneshot::channel();
        registry.handle(Command::Register { handle: a.handle.clone(), reply });
        registry.handle(Command::BeginShutdown);
        assert_eq!(registry.phase(), RegistryPhase::Draining);

        let (reply, _answer) = oneshot::channel();
        registry.handle(Command::Deregister { id: a.handle.id(), reply });
        assert_eq!(registry.phase(), RegistryPhase::Stopped);
        drop(handle);
    }
}
