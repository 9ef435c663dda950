//! Per-connection relay protocol.
//!
//! [`relay_ws`] owns the WebSocket plumbing: one forwarder task draining the
//! connection's outbound channel into the socket, one loop parsing incoming
//! frames. Everything protocol-level lives in [`RelaySession`], which is
//! transport-independent and driven directly by the integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::blob::{self, BlobStore};
use crate::store::{MessageDraft, MessageStore};
use crate::{AppState, RelayConfig};

use super::dispatch::Dispatcher;
use super::event::{ClientEvent, ServerEvent};
use super::registry::{ConnId, Outbound, RoomRegistry};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

#[axum::debug_handler]
pub async fn relay_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |stream| {
        let conn_id = next_conn_id();
        tracing::info!(conn_id, "client connected");

        let (outbound, mut events) = mpsc::unbounded_channel::<ServerEvent>();
        let (mut sink, mut source) = stream.split();

        let forward_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Ok(json) = serde_json::to_string(&event) else {
                    continue;
                };
                if sink.send(json.into()).await.is_err() {
                    break;
                }
            }
        });

        let mut session = RelaySession::new(&state, conn_id, outbound);
        while let Some(Ok(frame)) = source.next().await {
            let Ok(event) = serde_json::from_slice::<ClientEvent>(&frame.into_data()) else {
                tracing::debug!(conn_id, "skipping unparseable frame");
                continue;
            };
            session.handle(event).await;
        }

        session.close().await;
        forward_task.abort();
        tracing::info!(conn_id, "client disconnected");
    })
}

/// Protocol state for one connection: which identity it has joined as, and
/// where its outbound events go.
pub struct RelaySession {
    conn_id: ConnId,
    identity: Option<String>,
    outbound: Outbound,
    store: MessageStore,
    registry: RoomRegistry,
    dispatcher: Dispatcher,
    blobs: Arc<dyn BlobStore>,
    config: RelayConfig,
}

impl RelaySession {
    pub fn new(state: &AppState, conn_id: ConnId, outbound: Outbound) -> Self {
        Self {
            conn_id,
            identity: None,
            outbound,
            store: state.store.clone(),
            registry: state.registry.clone(),
            dispatcher: state.dispatcher.clone(),
            blobs: state.blobs.clone(),
            config: state.config.clone(),
        }
    }

    pub async fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Join(identity) => self.join(identity).await,
            ClientEvent::FetchHistory { sender, receiver } => {
                self.fetch_history(&sender, &receiver).await;
            }
            ClientEvent::SendMessage { sender, receiver, text, emoji } => {
                self.send_message(sender, receiver, text, emoji).await;
            }
            ClientEvent::SendAudioMessage { sender, receiver, audio } => {
                self.send_audio_message(sender, receiver, &audio).await;
            }
        }
    }

    /// Tears the connection out of its room. Called once by the transport
    /// on disconnect.
    pub async fn close(&mut self) {
        self.registry.leave(self.conn_id).await;
        self.identity = None;
    }

    async fn join(&mut self, identity: String) {
        if identity.is_empty() {
            tracing::warn!(conn_id = self.conn_id, "dropping join with empty identity");
            return;
        }
        self.registry
            .join(&identity, self.conn_id, self.outbound.clone())
            .await;
        tracing::info!(conn_id = self.conn_id, %identity, "joined chat room");
        self.identity = Some(identity);
    }

    async fn fetch_history(&self, sender: &str, receiver: &str) {
        let history = timeout(self.config.store_timeout, self.store.history(sender, receiver));
        match history.await {
            Ok(Ok(messages)) => {
                // Requester only; no other connection sees the replay.
                let _ = self.outbound.send(ServerEvent::PreviousMessages(messages));
            }
            Ok(Err(e)) => {
                tracing::error!(conn_id = self.conn_id, error = %e.0, "history query failed");
            }
            Err(_) => {
                tracing::error!(conn_id = self.conn_id, "history query timed out");
            }
        }
    }

    async fn send_message(
        &self,
        sender: String,
        receiver: String,
        text: Option<String>,
        emoji: Option<String>,
    ) {
        if sender.is_empty() || receiver.is_empty() {
            tracing::warn!(conn_id = self.conn_id, "dropping send with missing sender or receiver");
            return;
        }

        let draft = MessageDraft {
            sender,
            receiver: receiver.clone(),
            text,
            emoji,
            ..MessageDraft::default()
        };
        let Some(message) = self.persist(draft).await else {
            return;
        };

        // The sending client appends its own optimistic copy, so text is
        // dispatched to the receiver's room only.
        self.dispatcher
            .dispatch(ServerEvent::ReceiveMessage(message), &receiver)
            .await;
    }

    async fn send_audio_message(&self, sender: String, receiver: String, audio: &str) {
        if sender.is_empty() || receiver.is_empty() {
            tracing::warn!(conn_id = self.conn_id, "dropping audio send with missing sender or receiver");
            return;
        }

        let clip = match blob::decode_data_uri(audio) {
            Ok(clip) => clip,
            Err(e) => {
                tracing::warn!(conn_id = self.conn_id, error = %e, "dropping audio send");
                return;
            }
        };

        let upload = timeout(
            self.config.upload_timeout,
            self.blobs.upload(clip.bytes, &clip.content_type),
        );
        let voice_url = match upload.await {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                tracing::error!(conn_id = self.conn_id, error = %e, "voice upload failed");
                return;
            }
            Err(_) => {
                tracing::error!(conn_id = self.conn_id, "voice upload timed out");
                return;
            }
        };

        let draft = MessageDraft {
            sender: sender.clone(),
            receiver: receiver.clone(),
            voice: Some(voice_url),
            ..MessageDraft::default()
        };
        let Some(message) = self.persist(draft).await else {
            return;
        };

        // Unlike text, voice is echoed to the sender's other devices; the
        // recording client has no local copy to append.
        self.dispatcher
            .dispatch(ServerEvent::ReceiveMessage(message.clone()), &receiver)
            .await;
        self.dispatcher
            .dispatch_except(ServerEvent::ReceiveMessage(message), &sender, self.conn_id)
            .await;
    }

    /// Appends a draft to the store, logging instead of surfacing failure.
    /// Returns `None` when nothing was persisted, in which case nothing may
    /// be dispatched either.
    async fn persist(&self, draft: MessageDraft) -> Option<crate::store::Message> {
        match timeout(self.config.store_timeout, self.store.append(draft)).await {
            Ok(Ok(message)) => Some(message),
            Ok(Err(e)) => {
                tracing::error!(conn_id = self.conn_id, error = %e.0, "failed to persist message");
                None
            }
            Err(_) => {
                tracing::error!(conn_id = self.conn_id, "message store timed out");
                None
            }
        }
    }
}
