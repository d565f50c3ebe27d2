//! Conversation turns supplied by the caller.
//!
//! The history is owned by the presentation layer: it is append-only from the
//! caller's side and the core only ever reads a suffix of it.

use serde::{Deserialize, Serialize};

/// Who authored a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// The person filling in the form
    User,
    /// A previous answer produced by the engine
    Assistant,
}

impl MessageType {
    /// Label used when rendering the turn into a prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "AI",
        }
    }
}

/// A single turn of the conversation, oldest first in a history slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,

    pub content: String,
}

impl ChatMessage {
    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            kind: MessageType::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_format() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"type":"assistant","content":"Use the OM figure."}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Assistant);
        assert_eq!(msg.content, "Use the OM figure.");
    }

    #[test]
    fn rejects_unknown_role() {
        let result = serde_json::from_str::<ChatMessage>(r#"{"type":"system","content":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn role_labels() {
        assert_eq!(ChatMessage::user("hi").kind.label(), "User");
        assert_eq!(ChatMessage::assistant("hello").kind.label(), "AI");
    }
}
