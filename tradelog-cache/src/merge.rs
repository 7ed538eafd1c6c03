//! Read-time reconciliation of remote and local-only messages.
//!
//! Two checks keep optimistic local writes from showing up twice once the
//! remote store echoes them back:
//!
//! * a coarse key of role, content prefix and kind, shared by every entry in
//!   the feed, and
//! * an exact match on role and trimmed content against remote messages whose
//!   `created_at` lies within a time window of the local capture time.

use std::collections::{HashMap, HashSet};

use shared::{
    config::CacheConfig,
    models::{ChatMessage, MessageKind, MessageRole},
};

use crate::local::LocalMessage;

/// Tunables of the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    /// Maximum `|remote.created_at - local.timestamp|` for an echo, in ms.
    pub window_ms: u64,
    /// Characters of content that participate in the coarse key.
    pub prefix_chars: usize,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for DedupPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            window_ms: config.dedup_window_ms,
            prefix_chars: config.dedup_prefix_chars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MessageKey {
    role: MessageRole,
    content: String,
    kind: MessageKind,
}

impl MessageKey {
    fn prefixed(message: &ChatMessage, prefix_chars: usize) -> Self {
        Self {
            role: message.role,
            content: message.content.chars().take(prefix_chars).collect(),
            kind: message.message_type,
        }
    }

    fn exact(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.trim().to_string(),
            kind: message.message_type,
        }
    }
}

/// Why a local-only message was left out of the merged feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// A remote message with the same role and content landed within the window.
    EchoedByRemote,
    /// Another entry already occupies the same coarse key.
    KeyCollision,
}

impl DiscardReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EchoedByRemote => "echoed_by_remote",
            Self::KeyCollision => "key_collision",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discarded {
    pub local_id: String,
    pub reason: DiscardReason,
}

/// Result of [`combine`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The feed, ascending by `created_at`.
    pub messages: Vec<ChatMessage>,
    pub discarded: Vec<Discarded>,
}

impl MergeOutcome {
    #[must_use]
    pub fn was_discarded(&self, local_id: &str) -> bool {
        self.discarded.iter().any(|entry| entry.local_id == local_id)
    }
}

/// Merges `remote` with the local-only entries of `local`.
///
/// Remote messages seed the feed and win every key tie; remote messages that
/// share a coarse key collapse onto the last one seen. Entries of `local`
/// that are already confirmed are ignored.
#[must_use]
pub fn combine<I>(remote: &[ChatMessage], local: I, policy: DedupPolicy) -> MergeOutcome
where
    I: IntoIterator<Item = LocalMessage>,
{
    let mut feed: Vec<ChatMessage> = Vec::with_capacity(remote.len());
    let mut slots: HashMap<MessageKey, usize> = HashMap::new();

    for message in remote {
        let key = MessageKey::prefixed(message, policy.prefix_chars);
        match slots.get(&key) {
            Some(&slot) => feed[slot] = message.clone(),
            None => {
                slots.insert(key, feed.len());
                feed.push(message.clone());
            }
        }
    }

    let mut discarded = Vec::new();
    for entry in local.into_iter().filter(|entry| entry.is_local) {
        let reason = if is_echo(remote, &entry, policy.window_ms) {
            Some(DiscardReason::EchoedByRemote)
        } else if slots.contains_key(&MessageKey::prefixed(&entry.message, policy.prefix_chars)) {
            Some(DiscardReason::KeyCollision)
        } else {
            None
        };

        match reason {
            Some(reason) => discarded.push(Discarded {
                local_id: entry.local_id,
                reason,
            }),
            None => {
                let key = MessageKey::prefixed(&entry.message, policy.prefix_chars);
                slots.insert(key, feed.len());
                feed.push(entry.into_message());
            }
        }
    }

    feed.sort_by_key(|message| message.created_at);
    MergeOutcome {
        messages: feed,
        discarded,
    }
}

fn is_echo(remote: &[ChatMessage], entry: &LocalMessage, window_ms: u64) -> bool {
    let content = entry.message.content.trim();
    remote.iter().any(|candidate| {
        candidate.role == entry.message.role
            && candidate.content.trim() == content
            && candidate.created_at.as_millis().abs_diff(entry.timestamp) <= window_ms
    })
}

/// Keeps the first stored occurrence of every role / trimmed content / kind
/// triple. Returns the survivors in stored order and how many were dropped.
#[must_use]
pub fn dedupe_stored(messages: Vec<LocalMessage>) -> (Vec<LocalMessage>, usize) {
    let before = messages.len();
    let mut seen = HashSet::new();
    let kept: Vec<LocalMessage> = messages
        .into_iter()
        .filter(|entry| seen.insert(MessageKey::exact(&entry.message)))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}
