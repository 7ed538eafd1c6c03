//! Locally buffered entities that may not have reached the remote store yet.

use serde::{Deserialize, Serialize};
use shared::models::{ChatMessage, ChatSession, NewMessage, NewSession, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

static LOCAL_ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generates a provisional identifier: capture time, a process-wide sequence
/// number and a random suffix. Never repeats within one process.
#[must_use]
pub fn generate_local_id(captured_at_millis: i64) -> String {
    let sequence = LOCAL_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let random = Uuid::new_v4().simple().to_string();
    format!("local_{captured_at_millis}_{sequence}_{}", &random[..9])
}

/// A chat message together with its local provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalMessage {
    #[serde(flatten)]
    pub message: ChatMessage,

    /// Provisional identity assigned at write time. Kept after confirmation.
    #[serde(alias = "localId")]
    pub local_id: String,

    /// True until the remote store confirms the write.
    #[serde(alias = "isLocal")]
    pub is_local: bool,

    /// Capture time in milliseconds since the epoch. Orders local entries.
    pub timestamp: i64,

    /// Set once a durable outbox entry exists for this message.
    #[serde(default, alias = "scheduledForPersist", skip_serializing_if = "Option::is_none")]
    pub scheduled_for_persist: Option<bool>,
}

impl LocalMessage {
    /// Builds an unconfirmed entry whose `id` is the local id.
    #[must_use]
    pub fn capture(payload: NewMessage, local_id: String, captured_at: Timestamp) -> Self {
        Self {
            message: payload.into_message(local_id.clone(), captured_at),
            local_id,
            is_local: true,
            timestamp: captured_at.as_millis(),
            scheduled_for_persist: None,
        }
    }

    /// Records the server identity. Everything else stays untouched.
    pub fn confirm(&mut self, server_id: &str) {
        self.message.id = server_id.to_string();
        self.is_local = false;
    }

    /// The payload to send to the remote store.
    #[must_use]
    pub fn to_new_message(&self) -> NewMessage {
        NewMessage::from(&self.message)
    }

    #[must_use]
    pub fn into_message(self) -> ChatMessage {
        self.message
    }
}

/// A chat session together with its local provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalSession {
    #[serde(flatten)]
    pub session: ChatSession,
    #[serde(alias = "localId")]
    pub local_id: String,
    #[serde(alias = "isLocal")]
    pub is_local: bool,
    pub timestamp: i64,
    #[serde(default, alias = "scheduledForPersist", skip_serializing_if = "Option::is_none")]
    pub scheduled_for_persist: Option<bool>,
}

impl LocalSession {
    #[must_use]
    pub fn capture(payload: NewSession, local_id: String, captured_at: Timestamp) -> Self {
        Self {
            session: payload.into_session(local_id.clone(), captured_at),
            local_id,
            is_local: true,
            timestamp: captured_at.as_millis(),
            scheduled_for_persist: None,
        }
    }

    pub fn confirm(&mut self, server_id: &str) {
        self.session.id = server_id.to_string();
        self.is_local = false;
    }

    #[must_use]
    pub fn to_new_session(&self) -> NewSession {
        NewSession::from(&self.session)
    }
}
