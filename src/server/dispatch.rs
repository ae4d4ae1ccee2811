//! Request dispatch
//!
//! Every session's read path forwards parsed requests to one request loop
//! that owns the resource tree, so tree operations are never concurrent.
//! The loop looks the command word up in a handler table, runs the handler,
//! and answers with any `RES` messages followed by exactly one `ACK`.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::protocol::{AckStatus, Message, BROADCAST_TAG, DELETE, QUIT, READ, RES, WRITE};
use crate::resource::{ReadOutcome, ResourceError, ResourceKind, ResourceNode, ResourcePath, Written};
use crate::server::registry::RegistryHandle;

/// Reason sent with a successful `ACK`
pub const ACK_SUCCESS: &str = "Success";

/// One parsed client request on its way to the request loop
#[derive(Debug)]
pub struct Request {
    pub message: Message,
    /// Where `RES` and `ACK` replies go
    pub reply: mpsc::UnboundedSender<Message>,
    /// Completed after the `ACK` is queued, with `true` if the session
    /// should stop reading.
    pub done: oneshot::Sender<bool>,
}

/// Error reported to the requester in an `ACK FAIL`
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("unknown command")]
    UnknownCommand,

    #[error("bad arguments, expected: {0}")]
    BadArguments(&'static str),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// What happens after a handler succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading requests
    Continue,
    /// Stop this session's read loop
    EndSession,
    /// The server state reached its final value: stop this session and shut
    /// the server down
    Quitting,
}

impl Flow {
    pub fn terminates(self) -> bool {
        self != Flow::Continue
    }

    fn after_write(written: &Written) -> Self {
        if written.terminal {
            Flow::Quitting
        } else {
            Flow::Continue
        }
    }
}

/// Everything a handler may touch while serving one request
pub struct HandlerContext<'a> {
    pub root: &'a mut ResourceNode,
    pub args: &'a [String],
    pub reply: &'a mpsc::UnboundedSender<Message>,
    pub registry: &'a RegistryHandle,
}

pub type HandlerResult = Result<Flow, DispatchError>;
pub type Handler = for<'a> fn(HandlerContext<'a>) -> BoxFuture<'a, HandlerResult>;

pub struct Dispatcher {
    root: ResourceNode,
    handlers: HashMap<&'static str, Handler>,
    registry: RegistryHandle,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// `shutdown` is cancelled when a request moves the server state to its
    /// final value.
    pub fn new(root: ResourceNode, registry: RegistryHandle, shutdown: CancellationToken) -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert(READ, handle_read);
        handlers.insert(WRITE, handle_write);
        handlers.insert(DELETE, handle_delete);
        handlers.insert(QUIT, handle_quit);
        Self {
            root,
            handlers,
            registry,
            shutdown,
        }
    }

    /// Serve one request.
    ///
    /// Replies go to `reply`, ending with exactly one `ACK`. Returns whether
    /// the requesting session should stop reading.
    pub async fn dispatch(&mut self, request: &Message, reply: &mpsc::UnboundedSender<Message>) -> bool {
        let result = match self.handlers.get(request.word()).copied() {
            Some(handler) => {
                let ctx = HandlerContext {
                    root: &mut self.root,
                    args: request.args(),
                    reply,
                    registry: &self.registry,
                };
                handler(ctx).await
            }
            None => Err(DispatchError::UnknownCommand),
        };

        let (ack, flow) = match result {
            Ok(flow) => (Message::ack(AckStatus::Ok, ACK_SUCCESS, request), flow),
            Err(e) => {
                tracing::debug!("request failed: {}: {}", request, e);
                (Message::ack(AckStatus::Fail, e.to_string(), request), Flow::Continue)
            }
        };
        if reply.send(ack).is_err() {
            tracing::debug!("requester went away before its ACK: {}", request);
        }

        if flow == Flow::Quitting && !self.shutdown.is_cancelled() {
            tracing::info!("server state is final, shutting down");
            self.shutdown.cancel();
        }
        flow.terminates()
    }

    /// Serve requests until every sender is gone
    pub async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        tracing::info!("request loop running");
        while let Some(Request { message, reply, done }) = requests.recv().await {
            let terminate = self.dispatch(&message, &reply).await;
            let _ = done.send(terminate);
        }
        tracing::info!("request loop stopped");
    }
}

/// `read TAG PATH`
fn handle_read(ctx: HandlerContext<'_>) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let [tag, path] = ctx.args else {
            return Err(DispatchError::BadArguments("read TAG PATH"));
        };
        let path = ResourcePath::parse(path);
        tracing::debug!("read {}", path);

        let resources = match ctx.root.read(&ResourcePath::root(), path.segments())? {
            ReadOutcome::Resources(resources) => resources,
            ReadOutcome::Pending(lookup) => lookup.fetch().await?,
        };
        for resource in &resources {
            let _ = ctx.reply.send(resource.to_message(tag));
        }
        Ok(Flow::Continue)
    })
}

/// `write TAG PATH VALUE`
fn handle_write(ctx: HandlerContext<'_>) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let [_tag, path, value] = ctx.args else {
            return Err(DispatchError::BadArguments("write TAG PATH VALUE"));
        };
        let path = ResourcePath::parse(path);
        let written = ctx.root.write(&ResourcePath::root(), path.segments(), value)?;
        announce(ctx.registry, &path, &written);
        Ok(Flow::after_write(&written))
    })
}

/// `delete TAG PATH`
fn handle_delete(ctx: HandlerContext<'_>) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let [_tag, path] = ctx.args else {
            return Err(DispatchError::BadArguments("delete TAG PATH"));
        };
        let path = ResourcePath::parse(path);
        let written = ctx.root.delete(&ResourcePath::root(), path.segments())?;
        announce(ctx.registry, &path, &written);
        Ok(Flow::after_write(&written))
    })
}

/// `quit`
fn handle_quit(_ctx: HandlerContext<'_>) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async { Ok::<_, DispatchError>(Flow::EndSession) })
}

/// Tell every client about a changed resource
fn announce(registry: &RegistryHandle, path: &ResourcePath, written: &Written) {
    registry.broadcast(
        Message::new(RES)
            .arg(BROADCAST_TAG)
            .arg(path.to_string())
            .arg(ResourceKind::Entry.as_str())
            .arg(written.value.as_str()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Directory, StateNode};
    use crate::server::registry::{ClientHandle, ClientRegistry};

    fn tree() -> ResourceNode {
        Directory::new()
            .with_child(
                "control",
                Directory::new()
                    .with_child(
                        "state",
                        ResourceNode::State(StateNode::new("Running", ["Running"], "Quitting")),
                    )
                    .into(),
            )
            .with_child("version", ResourceNode::entry("0.1.0"))
            .into()
    }

    fn dispatcher() -> (Dispatcher, RegistryHandle, CancellationToken) {
        let (registry, _task) = ClientRegistry::spawn();
        let shutdown = CancellationToken::new();
        let dispatcher = Dispatcher::new(tree(), registry.clone(), shutdown.clone());
        (dispatcher, registry, shutdown)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            lines.push(msg.pack());
        }
        lines
    }

    fn drain_broadcasts(rx: &mut mpsc::Receiver<Message>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            lines.push(msg.pack());
        }
        lines
    }

    async fn watcher(registry: &RegistryHandle) -> mpsc::Receiver<Message> {
        let (watch_tx, watch_rx) = mpsc::channel(8);
        assert!(registry.register(ClientHandle::new(watch_tx, CancellationToken::new())).await);
        watch_rx
    }

    fn request(line: &str) -> Message {
        Message::parse(line).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (mut dispatcher, _registry, _shutdown) = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(!dispatcher.dispatch(&request("dance T0"), &tx).await);
        assert_eq!(drain(&mut rx), vec!["ACK FAIL 'unknown command' dance T0"]);
    }

    #[tokio::test]
    async fn test_read_emits_resources_then_ack() {
        let (mut dispatcher, _registry, _shutdown) = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(!dispatcher.dispatch(&request("read T1 /version/"), &tx).await);
        assert_eq!(
            drain(&mut rx),
            vec![
                "RES T1 /version entry 0.1.0",
                "ACK OK Success read T1 /version/",
            ]
        );
    }

    #[tokio::test]
    async fn test_read_missing_path_fails() {
        let (mut dispatcher, _registry, _shutdown) = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.dispatch(&request("read T1 /nope"), &tx).await;
        assert_eq!(drain(&mut rx), vec!["ACK FAIL 'not found: /nope' read T1 /nope"]);
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let (mut dispatcher, _registry, _shutdown) = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.dispatch(&request("read T1"), &tx).await;
        dispatcher.dispatch(&request("write T1 /control/state"), &tx).await;
        let lines = drain(&mut rx);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ACK FAIL 'bad arguments, expected: read TAG PATH'"));
        assert!(lines[1].starts_with("ACK FAIL 'bad arguments, expected: write TAG PATH VALUE'"));
    }

    #[tokio::test]
    async fn test_quit_terminates() {
        let (mut dispatcher, _registry, shutdown) = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(dispatcher.dispatch(&request("quit"), &tx).await);
        assert_eq!(drain(&mut rx), vec!["ACK OK Success quit"]);
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_write_final_state_terminates_and_broadcasts() {
        let (mut dispatcher, registry, shutdown) = dispatcher();
        let mut watch_rx = watcher(&registry).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(dispatcher.dispatch(&request("write T2 /control/state quitting"), &tx).await);
        assert_eq!(drain(&mut rx), vec!["ACK OK Success write T2 /control/state quitting"]);
        assert!(shutdown.is_cancelled());

        // Round trip through the registry so the broadcast has landed.
        registry.client_count().await;
        assert_eq!(drain_broadcasts(&mut watch_rx), vec!["RES ! /control/state entry Quitting"]);

        assert!(!dispatcher.dispatch(&request("write T3 /control/state Running"), &tx).await);
        assert_eq!(
            drain(&mut rx),
            vec!["ACK FAIL 'state is final: Quitting' write T3 /control/state Running"]
        );
    }

    #[tokio::test]
    async fn test_delete_state_terminates_and_broadcasts() {
        let (mut dispatcher, registry, shutdown) = dispatcher();
        let mut watch_rx = watcher(&registry).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(dispatcher.dispatch(&request("delete T5 /control/state"), &tx).await);
        assert_eq!(drain(&mut rx), vec!["ACK OK Success delete T5 /control/state"]);
        assert!(shutdown.is_cancelled());

        registry.client_count().await;
        assert_eq!(drain_broadcasts(&mut watch_rx), vec!["RES ! /control/state entry Quitting"]);

        assert!(!dispatcher.dispatch(&request("delete T6 /control/state"), &tx).await);
        assert_eq!(
            drain(&mut rx),
            vec!["ACK FAIL 'state is final: Quitting' delete T6 /control/state"]
        );
        assert!(drain_broadcasts(&mut watch_rx).is_empty());
    }

    #[tokio::test]
    async fn test_delete_read_only_fails() {
        let (mut dispatcher, _registry, shutdown) = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(!dispatcher.dispatch(&request("delete T4 /version"), &tx).await);
        assert_eq!(drain(&mut rx), vec!["ACK FAIL 'read-only: /version' delete T4 /version"]);
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_request_loop_reports_terminate() {
        let (dispatcher, _registry, _shutdown) = dispatcher();
        let (requests, request_rx) = mpsc::channel(4);
        let task = tokio::spawn(dispatcher.run(request_rx));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (done, finished) = oneshot::channel();
        requests
            .send(Request { message: request("quit"), reply: tx, done })
            .await
            .unwrap();
        assert!(finished.await.unwrap());
        assert_eq!(drain(&mut rx), vec!["ACK OK Success quit"]);

        drop(requests);
        task.await.unwrap();
    }
}
