//! Wire events between clients and the relay.
//!
//! JSON text frames in a `{"event": ..., "data": ...}` envelope, keeping the
//! event names the mobile clients already speak.

use serde::{Deserialize, Serialize};

use crate::store::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Binds this connection to a user identity's room.
    #[serde(rename = "joinChat")]
    Join(String),

    /// Requests the full history between the two identities; answered with
    /// a single `previousMessages` batch to this connection only.
    #[serde(rename = "fetchMessages")]
    FetchHistory { sender: String, receiver: String },

    #[serde(rename = "sendMessage")]
    SendMessage {
        sender: String,
        receiver: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        emoji: Option<String>,
    },

    /// Like `sendMessage`, but `audio` carries the clip inline as a base64
    /// `data:` URI; it is uploaded to the blob store before persistence.
    #[serde(rename = "sendAudioMessage")]
    SendAudioMessage {
        sender: String,
        receiver: String,
        audio: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "previousMessages")]
    PreviousMessages(Vec<Message>),

    #[serde(rename = "receiveMessage")]
    ReceiveMessage(Message),
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn parses_join_event() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"joinChat","data":"u1"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Join(id) if id == "u1"));
    }

    #[test]
    fn parses_send_message_without_optional_fields() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"sendMessage","data":{"sender":"u1","receiver":"u2","text":"hi"}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::SendMessage { sender, receiver, text, emoji } => {
                assert_eq!(sender, "u1");
                assert_eq!(receiver, "u2");
                assert_eq!(text.as_deref(), Some("hi"));
                assert_eq!(emoji, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parses_fetch_messages_event() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"fetchMessages","data":{"sender":"u1","receiver":"u2"}}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::FetchHistory { .. }));
    }

    #[test]
    fn serializes_receive_message_envelope() {
        let message = Message {
            id: Uuid::now_v7(),
            sender: "u1".to_owned(),
            receiver: "u2".to_owned(),
            text: Some("hi".to_owned()),
            voice: None,
            emoji: None,
            timestamp: 1700000000000,
        };
        let json = serde_json::to_value(ServerEvent::ReceiveMessage(message)).unwrap();

        assert_eq!(json["event"], "receiveMessage");
        assert_eq!(json["data"]["text"], "hi");
        // absent optionals are omitted, not null
        assert!(json["data"].get("voice").is_none());
    }
}
