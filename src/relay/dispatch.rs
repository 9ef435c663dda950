//! Delivery Dispatcher: pushes a persisted message to every live connection
//! in the target identity's room. An empty room is a silent no-op; the
//! message is already durable and surfaces on the recipient's next history
//! fetch.

use super::event::ServerEvent;
use super::registry::{ConnId, RoomRegistry};

#[derive(Clone)]
pub struct Dispatcher {
    registry: RoomRegistry,
}

impl Dispatcher {
    pub fn new(registry: RoomRegistry) -> Self {
        Self { registry }
    }

    /// Delivers `event` to every connection of `identity`. Returns how many
    /// connections it was handed to.
    pub async fn dispatch(&self, event: ServerEvent, identity: &str) -> usize {
        self.dispatch_filtered(event, identity, None).await
    }

    /// Same, but skips one connection — used to echo a sent message to the
    /// sender's *other* devices without bouncing it back to the origin.
    pub async fn dispatch_except(
        &self,
        event: ServerEvent,
        identity: &str,
        skip: ConnId,
    ) -> usize {
        self.dispatch_filtered(event, identity, Some(skip)).await
    }

    async fn dispatch_filtered(
        &self,
        event: ServerEvent,
        identity: &str,
        skip: Option<ConnId>,
    ) -> usize {
        let mut delivered = 0;
        for (conn_id, outbound) in self.registry.members(identity).await {
            if Some(conn_id) == skip {
                continue;
            }
            // A closed receiver just means the connection is tearing down.
            if outbound.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        tracing::debug!(identity, delivered, "dispatched event");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::store::Message;

    fn text_message(sender: &str, receiver: &str, text: &str) -> Message {
        Message {
            id: Uuid::now_v7(),
            sender: sender.to_owned(),
            receiver: receiver.to_owned(),
            text: Some(text.to_owned()),
            voice: None,
            emoji: None,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn dispatch_to_an_empty_room_delivers_nothing() {
        let dispatcher = Dispatcher::new(RoomRegistry::new());
        let delivered = dispatcher
            .dispatch(
                ServerEvent::ReceiveMessage(text_message("u1", "u2", "hi")),
                "u2",
            )
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn dispatch_except_skips_the_origin_connection() {
        let registry = RoomRegistry::new();
        let (tx_origin, mut rx_origin) = mpsc::unbounded_channel();
        let (tx_other, mut rx_other) = mpsc::unbounded_channel();
        registry.join("u1", 1, tx_origin).await;
        registry.join("u1", 2, tx_other).await;

        let dispatcher = Dispatcher::new(registry);
        let delivered = dispatcher
            .dispatch_except(
                ServerEvent::ReceiveMessage(text_message("u1", "u2", "hi")),
                "u1",
                1,
            )
            .await;

        assert_eq!(delivered, 1);
        assert!(rx_origin.try_recv().is_err());
        assert!(rx_other.try_recv().is_ok());
    }
}
