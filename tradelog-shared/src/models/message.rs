use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

use super::Timestamp;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl TryFrom<&str> for MessageRole {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            _ => Err("invalid message role"),
        }
    }
}

impl Display for MessageRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// What a message carries, as rendered by the journal assistant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain conversational text.
    #[default]
    Text,
    /// A generated trade report.
    Report,
    /// Analytics commentary attached to a dashboard query.
    Analysis,
    /// An assistant-side failure shown inline.
    Error,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Report => "report",
            Self::Analysis => "analysis",
            Self::Error => "error",
        }
    }
}

impl TryFrom<&str> for MessageKind {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, <Self as TryFrom<&str>>::Error> {
        match value {
            "text" => Ok(Self::Text),
            "report" => Ok(Self::Report),
            "analysis" => Ok(Self::Analysis),
            "error" => Ok(Self::Error),
            _ => Err("invalid message kind"),
        }
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// A chat message as the remote store knows it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server-issued identifier, or the local id while unconfirmed.
    pub id: String,

    /// Session this message belongs to.
    #[serde(alias = "sessionId")]
    pub session_id: String,

    /// The message content.
    pub content: String,

    /// The kind of message.
    #[serde(alias = "messageType")]
    pub message_type: MessageKind,

    /// Who wrote the message.
    pub role: MessageRole,

    /// Semantic creation time.
    #[serde(alias = "createdAt")]
    pub created_at: Timestamp,

    /// Last edit time, if the message was ever edited.
    #[serde(default, alias = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

/// A message payload that has not been assigned an identity yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    pub role: MessageRole,
    /// Falls back to the local capture time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl NewMessage {
    /// Creates a text message payload for the given session.
    pub fn text(session_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            content: content.into(),
            message_type: MessageKind::Text,
            role,
            created_at: None,
            updated_at: None,
        }
    }

    /// Overrides the message kind.
    #[must_use]
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.message_type = kind;
        self
    }

    /// Assigns an identity, filling `created_at` from `captured_at` when missing.
    #[must_use]
    pub fn into_message(self, id: impl Into<String>, captured_at: Timestamp) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            session_id: self.session_id,
            content: self.content,
            message_type: self.message_type,
            role: self.role,
            created_at: self.created_at.unwrap_or(captured_at),
            updated_at: self.updated_at,
        }
    }
}

impl From<&ChatMessage> for NewMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            session_id: message.session_id.clone(),
            content: message.content.clone(),
            message_type: message.message_type,
            role: message.role,
            created_at: Some(message.created_at),
            updated_at: message.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_role_string_round_trip() {
        for role in [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::System,
            MessageRole::Tool,
        ] {
            assert_eq!(MessageRole::try_from(role.as_str()), Ok(role));
        }
        assert!(MessageRole::try_from("robot").is_err());
    }

    #[test]
    fn test_kind_defaults_to_text() {
        let json = r#"{"session_id":"s1","content":"hi","role":"user"}"#;
        let payload: NewMessage = serde_json::from_str(json).unwrap();

        assert_eq!(payload.message_type, MessageKind::Text);
        assert_eq!(payload.created_at, None);
    }

    #[test]
    fn test_into_message_uses_capture_time_when_missing() {
        let captured = Timestamp::from_millis(1_700_000_000_000);
        let message = NewMessage::text("s1", MessageRole::User, "Bought 10 AAPL")
            .into_message("local_1", captured);

        assert_eq!(message.id, "local_1");
        assert_eq!(message.created_at, captured);
        assert_eq!(message.session_id, "s1");
    }

    #[test]
    fn test_into_message_keeps_explicit_created_at() {
        let explicit = Timestamp(Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap());
        let mut payload = NewMessage::text("s1", MessageRole::Assistant, "Report ready");
        payload.created_at = Some(explicit);

        let message = payload.into_message("x", Timestamp::now());
        assert_eq!(message.created_at, explicit);
    }

    #[test]
    fn test_message_serialization_omits_missing_update() {
        let message = NewMessage::text("s1", MessageRole::User, "hello")
            .with_kind(MessageKind::Report)
            .into_message("m1", Timestamp::from_millis(0));
        let json = serde_json::to_string(&message).unwrap();

        assert!(json.contains("\"message_type\":\"report\""));
        assert!(json.contains("\"role\":\"user\""));
        assert!(!json.contains("updated_at"));
    }
}
