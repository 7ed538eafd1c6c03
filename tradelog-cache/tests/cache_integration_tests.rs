//! End-to-end behaviour of the cache over a file-backed store.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chat_cache::{
    ChatRemote, FileStore, KeyValueStore, LocalChatCache, ManualClock, OutboxStatus, RemoteError,
};
use shared::{
    config::{CacheConfig, OutboxConfig},
    models::{ChatMessage, ChatSession, MessageRole, NewMessage, NewSession, Timestamp},
};
use tempfile::TempDir;

const START: i64 = 1_700_000_000_000;

/// Journal backend double that records what it receives.
#[derive(Debug, Default)]
struct RecordingRemote {
    created: Mutex<Vec<NewMessage>>,
    next_id: AtomicUsize,
    offline: AtomicBool,
}

impl RecordingRemote {
    fn offline() -> Self {
        let remote = Self::default();
        remote.offline.store(true, Ordering::SeqCst);
        remote
    }

    fn go_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    fn created(&self) -> Vec<NewMessage> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatRemote for RecordingRemote {
    async fn create_message(&self, message: &NewMessage) -> Result<ChatMessage, RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected("offline".to_string()));
        }
        self.created.lock().unwrap().push(message.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(message
            .clone()
            .into_message(format!("srv-{id}"), Timestamp::from_millis(START)))
    }

    async fn create_session(&self, session: &NewSession) -> Result<ChatSession, RemoteError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(session
            .clone()
            .into_session(format!("srv-session-{id}"), Timestamp::from_millis(START)))
    }

    async fn list_messages(&self, _session_id: &str) -> Result<Vec<ChatMessage>, RemoteError> {
        Ok(Vec::new())
    }

    async fn list_sessions(&self) -> Result<Vec<ChatSession>, RemoteError> {
        Ok(Vec::new())
    }

    async fn delete_session(&self, _session_id: &str) -> Result<(), RemoteError> {
        Ok(())
    }
}

fn open_cache(dir: &TempDir, remote: Arc<RecordingRemote>) -> LocalChatCache {
    let store = FileStore::open(dir.path()).expect("file store opens");
    LocalChatCache::builder(Arc::new(store), remote)
        .clock(Arc::new(ManualClock::starting_at(START)))
        .cache_config(CacheConfig {
            quiescence_delay_ms: 30_000,
            ..CacheConfig::default()
        })
        .outbox_config(OutboxConfig {
            max_attempts: 2,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
        })
        .build()
}

#[test]
fn entries_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(RecordingRemote::default());

    let saved = {
        let cache = open_cache(&dir, remote.clone());
        cache.save_session_locally(NewSession::titled("Swing trades"));
        cache.save_message_locally(
            "s1",
            NewMessage::text("s1", MessageRole::User, "Entered MSFT at 410"),
        )
    };

    let reopened = open_cache(&dir, remote);
    let messages = reopened.get_session_messages("s1");

    assert_eq!(messages, vec![saved]);
    assert_eq!(reopened.get_all_sessions().len(), 1);
    assert_eq!(reopened.outbox_entries().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn outbox_is_delivered_by_the_next_process() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(RecordingRemote::default());

    // First process: writes locally, exits before the quiescence delay.
    let saved = {
        let cache = open_cache(&dir, remote.clone());
        let saved = cache.save_message_locally(
            "s1",
            NewMessage::text("s1", MessageRole::User, "Trimmed QQQ position"),
        );
        assert!(cache.is_scheduled("s1", &saved.local_id));
        saved
    };
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(remote.created().is_empty());

    let cache = open_cache(&dir, remote.clone());
    assert_eq!(cache.resume_outbox(), 1);
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert_eq!(remote.created().len(), 1);
    assert_eq!(remote.created()[0].content, "Trimmed QQQ position");
    let stored = &cache.get_session_messages("s1")[0];
    assert_eq!(stored.local_id, saved.local_id);
    assert!(!stored.is_local);
    assert!(cache.outbox_entries().is_empty());
}

#[tokio::test]
async fn flush_parks_entries_and_retry_recovers() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(RecordingRemote::offline());
    let cache = open_cache(&dir, remote.clone());
    cache.save_message_locally(
        "s1",
        NewMessage::text("s1", MessageRole::User, "Stopped out of AMD"),
    );

    let first = cache.flush_outbox().await;
    assert_eq!(first.retrying, 1);
    let second = cache.flush_outbox().await;
    assert_eq!(second.parked, 1);

    let errors = cache.sync_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].status, OutboxStatus::Failed);
    assert_eq!(errors[0].last_error.as_deref(), Some("remote rejected the request: offline"));

    // parked entries are left alone by a plain flush
    assert_eq!(cache.flush_outbox().await.delivered, 0);

    remote.go_online();
    assert_eq!(cache.retry_failed(), 1);
    assert_eq!(cache.flush_outbox().await.delivered, 1);

    assert!(cache.sync_errors().is_empty());
    assert!(cache.outbox_entries().is_empty());
    assert_eq!(remote.created().len(), 1);
}

#[test]
fn legacy_unversioned_lists_are_readable_and_upgraded() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    let legacy = format!(
        r#"[{{"id":"local_1","session_id":"s1","content":"Old note","message_type":"text","role":"user","created_at":"2023-11-14T22:13:20Z","local_id":"local_1","is_local":true,"timestamp":{START}}}]"#
    );
    store.set("tradelog_chat_messages_s1", &legacy).unwrap();

    let cache = open_cache(&dir, Arc::new(RecordingRemote::default()));
    let messages = cache.get_session_messages("s1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.content, "Old note");

    cache.mark_message_persisted("s1", "local_1", "srv-old");

    let raw = store.get("tradelog_chat_messages_s1").unwrap().unwrap();
    assert!(raw.starts_with(r#"{"version":1,"data":["#));
    assert_eq!(cache.get_session_messages("s1")[0].message.id, "srv-old");
}

#[test]
fn camel_case_lists_from_the_browser_client_are_readable() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    let messages = format!(
        r#"[{{"id":"local_7","sessionId":"s1","content":"Scaled out of MSFT","messageType":"text","role":"user","createdAt":"2023-11-14T22:13:20Z","localId":"local_7","isLocal":true,"timestamp":{START},"scheduledForPersist":true}}]"#
    );
    let sessions = format!(
        r#"[{{"id":"local_s","title":"Swing trades","createdAt":"2023-11-14T22:13:20Z","localId":"local_s","isLocal":true,"timestamp":{START}}}]"#
    );
    store.set("tradelog_chat_messages_s1", &messages).unwrap();
    store.set("tradelog_chat_sessions", &sessions).unwrap();

    let cache = open_cache(&dir, Arc::new(RecordingRemote::default()));

    let stored = cache.get_session_messages("s1");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].local_id, "local_7");
    assert_eq!(stored[0].message.session_id, "s1");
    assert!(stored[0].is_local);
    assert_eq!(stored[0].scheduled_for_persist, Some(true));

    let sessions = cache.get_all_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session.title, "Swing trades");

    cache.mark_message_persisted("s1", "local_7", "srv-7");
    assert_eq!(cache.get_session_messages("s1")[0].message.id, "srv-7");
}

#[test]
fn merged_feed_over_file_store() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir, Arc::new(RecordingRemote::default()));
    cache.save_message_locally(
        "s1",
        NewMessage::text("s1", MessageRole::Assistant, "Your P&L this week is +$420"),
    );
    cache.save_message_locally(
        "s1",
        NewMessage::text("s1", MessageRole::User, "Break it down by ticker"),
    );
    let remote = vec![
        NewMessage::text("s1", MessageRole::Assistant, "Your P&L this week is +$420")
            .into_message("srv-9", Timestamp::from_millis(START + 2_000)),
    ];

    let feed = cache.get_combined_messages("s1", &remote);

    let ids: Vec<&str> = feed.iter().map(|message| message.id.as_str()).collect();
    assert_eq!(feed.len(), 2);
    assert!(ids.contains(&"srv-9"));
    assert!(feed.iter().any(|message| message.content == "Break it down by ticker"));
}
