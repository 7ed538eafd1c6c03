use serde::{Deserialize, Serialize};

use super::Timestamp;

/// A chat session as the remote store knows it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSession {
    /// Server-issued identifier, or the local id while unconfirmed.
    pub id: String,

    /// Title shown in the session picker.
    pub title: String,

    /// Semantic creation time.
    #[serde(alias = "createdAt")]
    pub created_at: Timestamp,

    #[serde(default, alias = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

/// A session payload that has not been assigned an identity yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewSession {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl NewSession {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Assigns an identity, filling `created_at` from `captured_at` when missing.
    #[must_use]
    pub fn into_session(self, id: impl Into<String>, captured_at: Timestamp) -> ChatSession {
        ChatSession {
            id: id.into(),
            title: self.title,
            created_at: self.created_at.unwrap_or(captured_at),
            updated_at: self.updated_at,
        }
    }
}

impl From<&ChatSession> for NewSession {
    fn from(session: &ChatSession) -> Self {
        Self {
            title: session.title.clone(),
            created_at: Some(session.created_at),
            updated_at: session.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_session_fills_created_at() {
        let captured = Timestamp::from_millis(42_000);
        let session = NewSession::titled("Weekly review").into_session("local_9", captured);

        assert_eq!(session.id, "local_9");
        assert_eq!(session.title, "Weekly review");
        assert_eq!(session.created_at, captured);
        assert!(session.updated_at.is_none());
    }

    #[test]
    fn test_new_session_from_existing_keeps_times() {
        let session = ChatSession {
            id: "srv-1".into(),
            title: "TSLA options".into(),
            created_at: Timestamp::from_millis(1_000),
            updated_at: Some(Timestamp::from_millis(2_000)),
        };

        let payload = NewSession::from(&session);
        assert_eq!(payload.created_at, Some(session.created_at));
        assert_eq!(payload.updated_at, session.updated_at);
    }
}
