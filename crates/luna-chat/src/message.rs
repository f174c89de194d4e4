//! Chat wire message.

use serde::{Deserialize, Serialize};

/// A chat message as sent over the WebSocket, e.g.
/// `{"text": "hi", "from": "alice@example.com"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message body.
    pub text: String,
    /// Sender as claimed by the client.
    pub from: String,
    /// Recipient identity key. Without it the message is only logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// What a client asks of the `/ws/connect` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Announce interest in a user path. Carries no data.
    Subscribe,
    /// Deliver `data` to the user named by the path.
    Message,
}

/// Request envelope spoken on `/ws/connect`, e.g.
/// `{"action": "message", "path": "/user/bob@example.com", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Requested action.
    pub action: Action,
    /// Target path, in the form `/user/{id}`.
    pub path: String,
    /// Message body for [`Action::Message`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ChatMessage>,
}

impl Envelope {
    /// Subscription to `path`.
    #[must_use]
    pub fn subscribe(path: impl Into<String>) -> Self {
        Self {
            action: Action::Subscribe,
            path: path.into(),
            data: None,
        }
    }

    /// Message for the user at `path`.
    #[must_use]
    pub fn message(path: impl Into<String>, data: ChatMessage) -> Self {
        Self {
            action: Action::Message,
            path: path.into(),
            data: Some(data),
        }
    }
}

impl ChatMessage {
    /// Message with no recipient.
    #[must_use]
    pub fn new(text: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            from: from.into(),
            to: None,
        }
    }

    /// Address the message to `to`.
    #[must_use]
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal_message() {
        let msg: ChatMessage = serde_json::from_str(r#"{"text":"hi","from":"alice"}"#).unwrap();
        assert_eq!(msg, ChatMessage::new("hi", "alice"));
        assert!(msg.to.is_none());
    }

    #[test]
    fn test_decode_addressed_message() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"text":"hi","from":"alice","to":"bob"}"#).unwrap();
        assert_eq!(msg.to.as_deref(), Some("bob"));
    }

    #[test]
    fn test_encode_omits_missing_recipient() {
        let json = serde_json::to_string(&ChatMessage::new("hi", "alice")).unwrap();
        assert_eq!(json, r#"{"text":"hi","from":"alice"}"#);
    }

    #[test]
    fn test_decode_browser_envelopes() {
        let subscribe: Envelope =
            serde_json::from_str(r#"{"action":"subscribe","path":"/user/alice@x.io"}"#).unwrap();
        assert_eq!(subscribe, Envelope::subscribe("/user/alice@x.io"));

        let json = concat!(
            r#"{"action":"message","#,
            r#""data":{"text":"hi","from":"alice@x.io"},"#,
            r#""path":"/user/bob@x.io"}"#,
        );
        let message: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(message.action, Action::Message);
        assert_eq!(message.data, Some(ChatMessage::new("hi", "alice@x.io")));
    }

    #[test]
    fn test_unknown_action_is_an_error() {
        let json = r#"{"action":"shout","path":"/user/a"}"#;
        assert!(serde_json::from_str::<Envelope>(json).is_err());
    }

    #[test]
    fn test_missing_text_is_an_error() {
        assert!(serde_json::from_str::<ChatMessage>(r#"{"from":"alice"}"#).is_err());
    }
}
