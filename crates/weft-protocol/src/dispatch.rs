/// Inbound message dispatch.
///
/// The server boundary hands every inbound message to a [`Dispatcher`],
/// which routes it by [`MessageKind`] into the queue of the matching
/// listener task. Request kinds that expect a correlated reply carry a
/// single-use oneshot slot the handler fulfills exactly once; if the
/// handler fails before replying, the slot is dropped and the remote
/// round trip observes a closed channel.
use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::types::MessageKind;
use crate::ProtocolError;

/// Queue depth per inbound message category.
const QUEUE_DEPTH: usize = 64;

/// One inbound message as seen by a handler.
#[derive(Debug)]
pub struct Inbound {
    pub kind: MessageKind,
    pub body: Vec<u8>,
    /// Reply slot for synchronous request kinds (subscribe, join).
    pub reply: Option<oneshot::Sender<Vec<u8>>>,
}

impl Inbound {
    pub fn new(kind: MessageKind, body: Vec<u8>) -> Self {
        Self {
            kind,
            body,
            reply: None,
        }
    }

    /// An inbound request expecting a correlated reply. Returns the
    /// receiving half the server awaits.
    pub fn with_reply(kind: MessageKind, body: Vec<u8>) -> (Self, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                kind,
                body,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Routes inbound messages to per-kind listener queues.
#[derive(Default)]
pub struct Dispatcher {
    routes: HashMap<MessageKind, mpsc::Sender<Inbound>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a queue for a message kind. The returned receiver is consumed
    /// by the kind's listener task.
    pub fn register(&mut self, kind: MessageKind) -> mpsc::Receiver<Inbound> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        self.routes.insert(kind, tx);
        rx
    }

    /// Route one message into its queue.
    pub async fn route(&self, msg: Inbound) -> Result<(), ProtocolError> {
        let tx = self
            .routes
            .get(&msg.kind)
            .ok_or_else(|| ProtocolError::Deserialization(format!("no handler for {:?}", msg.kind)))?;
        tx.send(msg)
            .await
            .map_err(|_| ProtocolError::Deserialization("handler queue closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_kind() {
        let mut dispatcher = Dispatcher::new();
        let mut sub_rx = dispatcher.register(MessageKind::Subscribe);
        let mut join_rx = dispatcher.register(MessageKind::JoinRequest);

        dispatcher
            .route(Inbound::new(MessageKind::Subscribe, vec![1]))
            .await
            .unwrap();
        dispatcher
            .route(Inbound::new(MessageKind::JoinRequest, vec![2]))
            .await
            .unwrap();

        assert_eq!(sub_rx.recv().await.unwrap().body, vec![1]);
        assert_eq!(join_rx.recv().await.unwrap().body, vec![2]);
    }

    #[tokio::test]
    async fn unknown_kind_is_an_error() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .route(Inbound::new(MessageKind::Status, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[tokio::test]
    async fn reply_slot_fulfilled_once() {
        let (mut msg, rx) = Inbound::with_reply(MessageKind::JoinRequest, vec![]);
        msg.reply.take().unwrap().send(vec![9]).unwrap();
        assert_eq!(rx.await.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn dropped_reply_slot_closes_channel() {
        let (msg, rx) = Inbound::with_reply(MessageKind::Subscribe, vec![]);
        drop(msg);
        assert!(rx.await.is_err());
    }
}
