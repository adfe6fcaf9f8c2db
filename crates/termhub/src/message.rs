//! Message types for session output delivery.
//!
//! Every session produces a stream of [`Message`] values from its reader
//! threads. The registry wraps each one in a [`TaggedMessage`] carrying the
//! session identifier before forwarding it to the aggregated sink.

use serde::{Deserialize, Serialize};

/// Unique identifier for a session.
pub type SessionId = String;

/// A single event produced by a session.
///
/// `Output`, `Error`, and `Exit` are delivered to consumers. `Input` exists
/// only for the write path: queued input travels through the session's input
/// queue as `Input` entries and is never delivered to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Message {
    /// Bytes read from the child's output stream, passed through verbatim.
    Output {
        /// The output text, exactly as read.
        payload: String,
    },
    /// Bytes read from the child's error stream (pipe channels only; a
    /// pseudo-terminal merges both streams into `Output`).
    Error {
        /// The error text, exactly as read.
        payload: String,
    },
    /// Terminal event for a session. Emitted exactly once, after which no
    /// further messages are delivered for that session.
    #[serde(rename_all = "camelCase")]
    Exit {
        /// The child's exit code.
        exit_code: i32,
    },
    /// Pending input queued for the child's stdin. Internal to the write
    /// path.
    Input {
        /// The input text, written verbatim.
        payload: String,
    },
}

impl Message {
    /// Output message from raw bytes read off the child.
    pub fn output(payload: impl Into<String>) -> Self {
        Message::Output {
            payload: payload.into(),
        }
    }

    /// Error-stream message.
    pub fn error(payload: impl Into<String>) -> Self {
        Message::Error {
            payload: payload.into(),
        }
    }

    /// Terminal exit message.
    pub fn exit(exit_code: i32) -> Self {
        Message::Exit { exit_code }
    }

    /// Queued input entry for the write path.
    pub fn input(payload: impl Into<String>) -> Self {
        Message::Input {
            payload: payload.into(),
        }
    }

    /// Returns true for the terminal `Exit` message.
    pub fn is_exit(&self) -> bool {
        matches!(self, Message::Exit { .. })
    }

    /// Returns the textual payload, if this variant carries one.
    pub fn payload(&self) -> Option<&str> {
        match self {
            Message::Output { payload }
            | Message::Error { payload }
            | Message::Input { payload } => Some(payload),
            Message::Exit { .. } => None,
        }
    }
}

/// A session message tagged with the identifier of the session that produced
/// it. This is the delivery unit of the registry's aggregated sink.
///
/// Serializes to `{"sessionId": ..., "kind": ..., "payload" | "exitCode": ...}`,
/// the shape the embedding layer consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedMessage {
    /// The session that produced this message.
    pub session_id: SessionId,
    /// The message itself.
    #[serde(flatten)]
    pub message: Message,
}

impl TaggedMessage {
    /// Pairs a message with its originating session.
    pub fn new(session_id: impl Into<SessionId>, message: Message) -> Self {
        Self {
            session_id: session_id.into(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_serialization() {
        let msg = Message::output("hello\n");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"kind":"Output","payload":"hello\n"}"#);

        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, msg);
    }

    #[test]
    fn test_exit_serialization_uses_camel_case() {
        let msg = Message::exit(0);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"kind":"Exit","exitCode":0}"#);

        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, msg);
    }

    #[test]
    fn test_tagged_message_shape() {
        let tagged = TaggedMessage::new("term-00c0ffee", Message::output("hi"));
        let json = serde_json::to_string(&tagged).unwrap();
        assert_eq!(
            json,
            r#"{"sessionId":"term-00c0ffee","kind":"Output","payload":"hi"}"#
        );

        let deserialized: TaggedMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, tagged);
    }

    #[test]
    fn test_is_exit() {
        assert!(Message::exit(1).is_exit());
        assert!(!Message::output("x").is_exit());
        assert!(!Message::error("x").is_exit());
        assert!(!Message::input("x").is_exit());
    }

    #[test]
    fn test_payload_accessor() {
        assert_eq!(Message::output("a").payload(), Some("a"));
        assert_eq!(Message::error("b").payload(), Some("b"));
        assert_eq!(Message::input("c").payload(), Some("c"));
        assert_eq!(Message::exit(0).payload(), None);
    }
}
