//! The local-first chat cache.
//!
//! Writes land in durable local storage synchronously and are visible to
//! readers at once. Each new entry also gets a durable outbox record; a
//! background task flushes it to the remote store after a quiescence delay
//! and retries with exponential backoff until it succeeds or runs out of
//! attempts.

use std::{
    collections::HashSet,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use shared::{
    config::{CacheConfig, Config, OutboxConfig},
    models::{ChatMessage, NewMessage, NewSession},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    clock::{Clock, SystemClock},
    error::{CacheError, CacheResult},
    local::{LocalMessage, LocalSession, generate_local_id},
    merge::{self, DedupPolicy, MergeOutcome},
    outbox::{Delivery, OutboxEntry, PersistKey},
    remote::ChatRemote,
    runtime,
    storage::{
        KeyValueStore,
        envelope::{self, STORAGE_FORMAT_VERSION},
    },
};

/// What [`LocalChatCache::cleanup_old_entries`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions_removed: usize,
    pub message_lists_removed: usize,
    pub messages_removed: usize,
    pub outbox_entries_removed: usize,
}

/// Outcome of [`LocalChatCache::flush_outbox`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    /// Failed this time, still pending with backoff.
    pub retrying: usize,
    /// Failed for the last allowed time.
    pub parked: usize,
    /// Another delivery of the same entry was already running.
    pub skipped: usize,
}

/// Local mirror of chat sessions and messages with deferred remote writes.
///
/// Cloning is cheap; all clones share storage, the pending-set and the
/// write lock. Build one at startup and hand it to whatever needs it.
#[derive(Debug, Clone)]
pub struct LocalChatCache {
    inner: Arc<CacheInner>,
}

#[derive(Debug)]
struct CacheInner {
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn ChatRemote>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    outbox: OutboxConfig,
    dedup: DedupPolicy,
    /// Composite keys with an armed delivery timer.
    pending: Mutex<HashSet<String>>,
    /// Composite keys whose remote write is running right now.
    in_flight: Mutex<HashSet<String>>,
    /// Serializes every read-modify-write on the store. Never held across an await.
    write_lock: Mutex<()>,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn claim(set: &Mutex<HashSet<String>>, key: &str) -> bool {
    set.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key.to_string())
}

fn release(set: &Mutex<HashSet<String>>, key: &str) {
    set.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
}

fn contains(set: &Mutex<HashSet<String>>, key: &str) -> bool {
    set.lock().unwrap_or_else(PoisonError::into_inner).contains(key)
}

/// Builder for [`LocalChatCache`].
#[derive(Debug)]
pub struct CacheBuilder {
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn ChatRemote>,
    clock: Arc<dyn Clock>,
    cache: CacheConfig,
    outbox: OutboxConfig,
}

impl CacheBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Takes the `cache` and `outbox` sections of a loaded configuration.
    #[must_use]
    pub fn config(self, config: &Config) -> Self {
        self.cache_config(config.cache.clone())
            .outbox_config(config.outbox.clone())
    }

    #[must_use]
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    #[must_use]
    pub fn outbox_config(mut self, config: OutboxConfig) -> Self {
        self.outbox = config;
        self
    }

    #[must_use]
    pub fn build(self) -> LocalChatCache {
        LocalChatCache {
            inner: Arc::new(CacheInner {
                store: self.store,
                remote: self.remote,
                clock: self.clock,
                dedup: DedupPolicy::from(&self.cache),
                config: self.cache,
                outbox: self.outbox,
                pending: Mutex::new(HashSet::new()),
                in_flight: Mutex::new(HashSet::new()),
                write_lock: Mutex::new(()),
            }),
        }
    }
}

enum Job {
    Message(NewMessage),
    Session(NewSession),
    /// Nothing left to send.
    Settled(&'static str),
    /// Cannot be sent yet.
    Blocked(String),
}

impl LocalChatCache {
    pub fn builder(store: Arc<dyn KeyValueStore>, remote: Arc<dyn ChatRemote>) -> CacheBuilder {
        CacheBuilder {
            store,
            remote,
            clock: Arc::new(SystemClock),
            cache: CacheConfig::default(),
            outbox: OutboxConfig::default(),
        }
    }

    /// Builds a cache with the system clock and the given configuration.
    pub fn new(store: Arc<dyn KeyValueStore>, remote: Arc<dyn ChatRemote>, config: &Config) -> Self {
        Self::builder(store, remote).config(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_storage_available(&self) -> bool {
        self.inner.store.is_available()
    }

    // ----- storage keys -----

    fn messages_key(&self, session_id: &str) -> String {
        format!("{}messages_{session_id}", self.inner.config.key_prefix)
    }

    fn sessions_key(&self) -> String {
        format!("{}sessions", self.inner.config.key_prefix)
    }

    fn outbox_key(&self) -> String {
        format!("{}outbox", self.inner.config.key_prefix)
    }

    fn is_session_scope(&self, key: &PersistKey) -> bool {
        key.scope == self.inner.config.session_scope
    }

    // ----- list helpers -----

    /// Reads a stored list. Missing keys and corrupt values read as empty;
    /// values from a newer format are an error so callers never overwrite them.
    fn read_list<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Vec<T>> {
        let Some(raw) = self.inner.store.get(key)? else {
            return Ok(Vec::new());
        };
        match envelope::decode::<Vec<T>>(key, &raw) {
            Ok(decoded) => {
                if decoded.version < STORAGE_FORMAT_VERSION {
                    debug!(key, version = decoded.version, "reading legacy stored list");
                }
                Ok(decoded.data)
            }
            Err(CacheError::Corrupt { key, reason }) => {
                warn!(%key, %reason, "stored list is corrupt, treating it as empty");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    fn load_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        self.read_list(key).unwrap_or_else(|err| {
            warn!(key, error = %err, "failed to read stored list");
            Vec::new()
        })
    }

    fn write_list<T: Serialize>(&self, key: &str, list: &[T]) -> CacheResult<()> {
        if list.is_empty() {
            self.inner.store.remove(key)?;
            return Ok(());
        }
        let encoded = envelope::encode(key, &list)?;
        self.inner.store.set(key, &encoded)?;
        Ok(())
    }

    /// Read-modify-write of one list. `apply` returns `None` when it changed
    /// nothing, in which case nothing is written. Caller holds the write lock.
    fn modify_list<T, R>(&self, key: &str, apply: impl FnOnce(&mut Vec<T>) -> Option<R>) -> CacheResult<Option<R>>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut list = self.read_list(key)?;
        let outcome = apply(&mut list);
        if outcome.is_some() {
            self.write_list(key, &list)?;
        }
        Ok(outcome)
    }

    /// Adds a durable outbox record for `key`. Caller holds the write lock.
    fn enqueue(&self, key: &PersistKey, now: i64) -> bool {
        let delay = i64::try_from(self.inner.config.quiescence_delay_ms).unwrap_or(i64::MAX);
        let result = self.modify_list(&self.outbox_key(), |entries: &mut Vec<OutboxEntry>| {
            if entries.iter().any(|entry| entry.key == *key) {
                return None;
            }
            entries.push(OutboxEntry::new(key.clone(), now, now.saturating_add(delay)));
            Some(())
        });
        match result {
            Ok(_) => true,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to record outbox entry");
                false
            }
        }
    }

    fn remove_outbox_entry(&self, key: &PersistKey) {
        let result = self.modify_list(&self.outbox_key(), |entries: &mut Vec<OutboxEntry>| {
            let before = entries.len();
            entries.retain(|entry| entry.key != *key);
            (entries.len() != before).then_some(())
        });
        if let Err(err) = result {
            warn!(key = %key, error = %err, "failed to remove outbox entry");
        }
    }

    // ----- writes -----

    /// Stores a new message for `session_id` and schedules its remote write.
    ///
    /// The returned entry is well-formed even when storage is unavailable or
    /// the write fails; it is then simply not durable.
    #[instrument(skip(self, payload))]
    pub fn save_message_locally(&self, session_id: &str, mut payload: NewMessage) -> LocalMessage {
        let captured_at = self.inner.clock.now();
        payload.session_id = session_id.to_string();
        let mut entry = LocalMessage::capture(payload, generate_local_id(captured_at.as_millis()), captured_at);

        if !self.inner.store.is_available() {
            debug!(local_id = %entry.local_id, "storage unavailable, message not persisted");
            return entry;
        }

        let key = PersistKey::new(session_id, entry.local_id.clone());
        let stored = {
            let _guard = self.inner.lock();
            entry.scheduled_for_persist = self.enqueue(&key, captured_at.as_millis()).then_some(true);
            let result = self.modify_list(&self.messages_key(session_id), |messages: &mut Vec<LocalMessage>| {
                messages.push(entry.clone());
                Some(())
            });
            if result.is_err() && entry.scheduled_for_persist.take().is_some() {
                self.remove_outbox_entry(&key);
            }
            result
        };

        match stored {
            Ok(_) => {
                debug!(local_id = %entry.local_id, "message saved locally");
                self.schedule_for_persistence(key);
            }
            Err(err) => warn!(local_id = %entry.local_id, error = %err, "failed to save message locally"),
        }
        entry
    }

    /// Stores a new session in the global list and schedules its remote write.
    #[instrument(skip(self, payload))]
    pub fn save_session_locally(&self, payload: NewSession) -> LocalSession {
        let captured_at = self.inner.clock.now();
        let mut entry = LocalSession::capture(payload, generate_local_id(captured_at.as_millis()), captured_at);

        if !self.inner.store.is_available() {
            debug!(local_id = %entry.local_id, "storage unavailable, session not persisted");
            return entry;
        }

        let key = PersistKey::new(self.inner.config.session_scope.clone(), entry.local_id.clone());
        let stored = {
            let _guard = self.inner.lock();
            entry.scheduled_for_persist = self.enqueue(&key, captured_at.as_millis()).then_some(true);
            let result = self.modify_list(&self.sessions_key(), |sessions: &mut Vec<LocalSession>| {
                sessions.push(entry.clone());
                Some(())
            });
            if result.is_err() && entry.scheduled_for_persist.take().is_some() {
                self.remove_outbox_entry(&key);
            }
            result
        };

        match stored {
            Ok(_) => {
                debug!(local_id = %entry.local_id, "session saved locally");
                self.schedule_for_persistence(key);
            }
            Err(err) => warn!(local_id = %entry.local_id, error = %err, "failed to save session locally"),
        }
        entry
    }

    /// Records the server id of a message. Unknown local ids are ignored.
    pub fn mark_message_persisted(&self, session_id: &str, local_id: &str, server_id: &str) {
        if !self.inner.store.is_available() {
            return;
        }
        let _guard = self.inner.lock();
        let result = self.modify_list(&self.messages_key(session_id), |messages: &mut Vec<LocalMessage>| {
            let entry = messages.iter_mut().find(|entry| entry.local_id == local_id)?;
            entry.confirm(server_id);
            Some(())
        });
        match result {
            Ok(Some(())) => debug!(session_id, local_id, server_id, "message marked persisted"),
            Ok(None) => debug!(session_id, local_id, "no local message to mark persisted"),
            Err(err) => warn!(session_id, local_id, error = %err, "failed to mark message persisted"),
        }
        self.remove_outbox_entry(&PersistKey::new(session_id, local_id));
    }

    /// Records the server id of a session. Unknown local ids are ignored.
    pub fn mark_session_persisted(&self, local_id: &str, server_id: &str) {
        if !self.inner.store.is_available() {
            return;
        }
        let _guard = self.inner.lock();
        let result = self.modify_list(&self.sessions_key(), |sessions: &mut Vec<LocalSession>| {
            let entry = sessions.iter_mut().find(|entry| entry.local_id == local_id)?;
            entry.confirm(server_id);
            Some(())
        });
        match result {
            Ok(Some(())) => debug!(local_id, server_id, "session marked persisted"),
            Ok(None) => debug!(local_id, "no local session to mark persisted"),
            Err(err) => warn!(local_id, error = %err, "failed to mark session persisted"),
        }
        self.remove_outbox_entry(&PersistKey::new(self.inner.config.session_scope.clone(), local_id));
    }

    // ----- reads -----

    /// Cached messages of a session, oldest capture first.
    #[must_use]
    pub fn get_session_messages(&self, session_id: &str) -> Vec<LocalMessage> {
        if !self.inner.store.is_available() {
            return Vec::new();
        }
        let mut messages: Vec<LocalMessage> = self.load_list(&self.messages_key(session_id));
        messages.sort_by_key(|entry| entry.timestamp);
        messages
    }

    /// Cached sessions, newest capture first.
    #[must_use]
    pub fn get_all_sessions(&self) -> Vec<LocalSession> {
        if !self.inner.store.is_available() {
            return Vec::new();
        }
        let mut sessions: Vec<LocalSession> = self.load_list(&self.sessions_key());
        sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sessions
    }

    /// The merged, duplicate-free feed for a session.
    #[must_use]
    pub fn get_combined_messages(&self, session_id: &str, remote: &[ChatMessage]) -> Vec<ChatMessage> {
        self.combine_messages(session_id, remote).messages
    }

    /// Like [`get_combined_messages`](Self::get_combined_messages) but also
    /// reports which local entries were dropped and why.
    #[must_use]
    pub fn combine_messages(&self, session_id: &str, remote: &[ChatMessage]) -> MergeOutcome {
        let outcome = merge::combine(remote, self.get_session_messages(session_id), self.inner.dedup);
        for discarded in &outcome.discarded {
            counter!("tradelog_merge_discards_total", "reason" => discarded.reason.as_str()).increment(1);
        }
        debug!(
            session_id,
            remote = remote.len(),
            merged = outcome.messages.len(),
            discarded = outcome.discarded.len(),
            "combined messages"
        );
        outcome
    }

    // ----- maintenance -----

    /// Keeps the first stored occurrence of each role, trimmed content and
    /// kind. Returns how many entries were removed.
    #[instrument(skip(self))]
    pub fn remove_duplicate_messages(&self, session_id: &str) -> usize {
        if !self.inner.store.is_available() {
            return 0;
        }
        let _guard = self.inner.lock();
        let result = self.modify_list(&self.messages_key(session_id), |messages: &mut Vec<LocalMessage>| {
            let (kept, removed) = merge::dedupe_stored(mem::take(messages));
            *messages = kept;
            (removed > 0).then_some(removed)
        });
        match result {
            Ok(removed) => {
                let removed = removed.unwrap_or(0);
                info!(removed, "removed duplicate messages");
                removed
            }
            Err(err) => {
                warn!(error = %err, "failed to remove duplicate messages");
                0
            }
        }
    }

    /// Drops local-only sessions captured more than `max_age` ago together
    /// with their message lists and outbox records. Confirmed messages older
    /// than the cutoff are pruned from every list as well; lists left empty
    /// are deleted.
    #[instrument(skip(self))]
    pub fn cleanup_old_entries(&self, max_age: Duration) -> CleanupReport {
        let mut report = CleanupReport::default();
        if !self.inner.store.is_available() {
            return report;
        }
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.inner.clock.now_millis().saturating_sub(max_age_ms);

        let _guard = self.inner.lock();
        let pruned = self.modify_list(&self.sessions_key(), |sessions: &mut Vec<LocalSession>| {
            let (stale, kept): (Vec<_>, Vec<_>) = mem::take(sessions)
                .into_iter()
                .partition(|session| session.is_local && session.timestamp < cutoff);
            *sessions = kept;
            (!stale.is_empty()).then(|| stale.into_iter().map(|session| session.local_id).collect::<Vec<_>>())
        });
        let pruned = match pruned {
            Ok(pruned) => pruned.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "failed to prune sessions");
                Vec::new()
            }
        };
        report.sessions_removed = pruned.len();

        let keys = match self.inner.store.keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "failed to enumerate stored keys");
                return report;
            }
        };
        let list_prefix = self.messages_key("");
        for key in keys {
            let Some(session_id) = key.strip_prefix(list_prefix.as_str()) else {
                continue;
            };

            if pruned.iter().any(|id| id == session_id) {
                let count = self.load_list::<LocalMessage>(&key).len();
                match self.inner.store.remove(&key) {
                    Ok(()) => {
                        report.message_lists_removed += 1;
                        report.messages_removed += count;
                    }
                    Err(err) => warn!(%key, error = %err, "failed to remove message list"),
                }
                continue;
            }

            let result = self.modify_list(&key, |messages: &mut Vec<LocalMessage>| {
                let before = messages.len();
                messages.retain(|entry| entry.is_local || entry.timestamp >= cutoff);
                let removed = before - messages.len();
                (removed > 0).then_some((removed, messages.is_empty()))
            });
            match result {
                Ok(Some((removed, emptied))) => {
                    report.messages_removed += removed;
                    if emptied {
                        report.message_lists_removed += 1;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%key, error = %err, "failed to prune message list"),
            }
        }

        if !pruned.is_empty() {
            let session_scope = self.inner.config.session_scope.as_str();
            let result = self.modify_list(&self.outbox_key(), |entries: &mut Vec<OutboxEntry>| {
                let before = entries.len();
                entries.retain(|entry| {
                    let owner = if entry.key.scope == session_scope {
                        &entry.key.local_id
                    } else {
                        &entry.key.scope
                    };
                    !pruned.contains(owner)
                });
                let removed = before - entries.len();
                (removed > 0).then_some(removed)
            });
            match result {
                Ok(removed) => report.outbox_entries_removed = removed.unwrap_or(0),
                Err(err) => warn!(error = %err, "failed to prune outbox"),
            }
        }

        info!(?report, "cleaned up old entries");
        report
    }

    /// Deletes the cached messages of a session and their outbox records.
    #[instrument(skip(self))]
    pub fn clear_session_data(&self, session_id: &str) {
        if !self.inner.store.is_available() {
            return;
        }
        let _guard = self.inner.lock();
        if let Err(err) = self.inner.store.remove(&self.messages_key(session_id)) {
            warn!(error = %err, "failed to clear session messages");
            return;
        }
        let result = self.modify_list(&self.outbox_key(), |entries: &mut Vec<OutboxEntry>| {
            let before = entries.len();
            entries.retain(|entry| entry.key.scope != session_id);
            (entries.len() != before).then_some(())
        });
        if let Err(err) = result {
            warn!(error = %err, "failed to clear outbox entries of session");
        }
        info!("cleared session data");
    }

    // ----- outbox -----

    /// Arms a delivery after the quiescence delay. Returns `false` when the
    /// key already has an armed delivery or no executor is available.
    pub(crate) fn schedule_for_persistence(&self, key: PersistKey) -> bool {
        self.schedule_with_delay(key, self.inner.config.quiescence_delay())
    }

    fn schedule_with_delay(&self, key: PersistKey, delay: Duration) -> bool {
        let composite = key.composite();
        if !claim(&self.inner.pending, &composite) {
            debug!(key = %composite, "delivery already scheduled");
            return false;
        }

        let weak = Arc::downgrade(&self.inner);
        if runtime::spawn_detached(deliver_after(weak, key, delay)) {
            debug!(key = %composite, ?delay, "delivery scheduled");
            true
        } else {
            release(&self.inner.pending, &composite);
            debug!(key = %composite, "no async runtime, entry stays in the outbox");
            false
        }
    }

    /// Whether a delivery timer is armed for this entry.
    #[must_use]
    pub fn is_scheduled(&self, scope: &str, local_id: &str) -> bool {
        contains(&self.inner.pending, &PersistKey::new(scope, local_id).composite())
    }

    /// One remote write attempt for `key`.
    #[instrument(skip(self, key), fields(key = %key))]
    pub(crate) async fn persist_to_database(&self, key: &PersistKey) -> Delivery {
        let composite = key.composite();
        if !claim(&self.inner.in_flight, &composite) {
            debug!("delivery already in flight");
            return Delivery::Retry(self.inner.outbox.backoff_after(1));
        }
        let delivery = self.attempt_delivery(key).await;
        release(&self.inner.in_flight, &composite);
        delivery
    }

    async fn attempt_delivery(&self, key: &PersistKey) -> Delivery {
        let job = {
            let _guard = self.inner.lock();
            self.resolve_job(key)
        };

        let result = match job {
            Ok(Job::Settled(reason)) => {
                debug!(reason, "nothing to deliver");
                let _guard = self.inner.lock();
                self.remove_outbox_entry(key);
                return Delivery::Done;
            }
            Ok(Job::Blocked(reason)) => Err(reason),
            Ok(Job::Message(payload)) => self
                .inner
                .remote
                .create_message(&payload)
                .await
                .map(|created| created.id)
                .map_err(|err| err.to_string()),
            Ok(Job::Session(payload)) => self
                .inner
                .remote
                .create_session(&payload)
                .await
                .map(|created| created.id)
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };

        match result {
            Ok(server_id) => {
                if self.is_session_scope(key) {
                    self.mark_session_persisted(&key.local_id, &server_id);
                } else {
                    self.mark_message_persisted(&key.scope, &key.local_id, &server_id);
                }
                counter!("tradelog_outbox_delivered_total").increment(1);
                info!(%server_id, "delivered local entry");
                Delivery::Done
            }
            Err(error) => {
                counter!("tradelog_outbox_failures_total").increment(1);
                let delivery = self.record_failure(key, &error);
                match delivery {
                    Delivery::Retry(backoff) => {
                        warn!(%error, retry_in = ?backoff, "delivery failed, backing off");
                    }
                    Delivery::GaveUp => {
                        counter!("tradelog_outbox_parked_total").increment(1);
                        warn!(%error, "delivery failed, giving up");
                    }
                    Delivery::Done => {}
                }
                delivery
            }
        }
    }

    /// Works out what to send for `key`. Caller holds the write lock.
    fn resolve_job(&self, key: &PersistKey) -> CacheResult<Job> {
        let sessions: Vec<LocalSession> = self.read_list(&self.sessions_key())?;

        if self.is_session_scope(key) {
            return Ok(match sessions.iter().find(|entry| entry.local_id == key.local_id) {
                None => Job::Settled("entry no longer stored"),
                Some(entry) if !entry.is_local => Job::Settled("already confirmed"),
                Some(entry) => Job::Session(entry.to_new_session()),
            });
        }

        let messages: Vec<LocalMessage> = self.read_list(&self.messages_key(&key.scope))?;
        let Some(entry) = messages.iter().find(|entry| entry.local_id == key.local_id) else {
            return Ok(Job::Settled("entry no longer stored"));
        };
        if !entry.is_local {
            return Ok(Job::Settled("already confirmed"));
        }

        let mut payload = entry.to_new_message();
        // Messages of a locally created session go out under its server id.
        if let Some(session) = sessions.iter().find(|session| session.local_id == key.scope) {
            if session.is_local {
                return Ok(Job::Blocked(format!("session {} is not persisted yet", key.scope)));
            }
            payload.session_id = session.session.id.clone();
        }
        Ok(Job::Message(payload))
    }

    fn record_failure(&self, key: &PersistKey, error: &str) -> Delivery {
        let now = self.inner.clock.now_millis();
        let policy = &self.inner.outbox;
        let _guard = self.inner.lock();
        let result = self.modify_list(&self.outbox_key(), |entries: &mut Vec<OutboxEntry>| {
            let index = match entries.iter().position(|entry| entry.key == *key) {
                Some(index) => index,
                None => {
                    entries.push(OutboxEntry::new(key.clone(), now, now));
                    entries.len() - 1
                }
            };
            Some(entries[index].record_failure(error, now, policy))
        });
        match result {
            Ok(delivery) => delivery.unwrap_or(Delivery::GaveUp),
            Err(err) => {
                warn!(key = %key, error = %err, "failed to record delivery failure");
                Delivery::GaveUp
            }
        }
    }

    /// Re-arms delivery timers for every pending outbox record, honouring
    /// each record's next attempt time. Call once after startup.
    pub fn resume_outbox(&self) -> usize {
        if !self.inner.store.is_available() {
            return 0;
        }
        let now = self.inner.clock.now_millis();
        let resumed = self
            .outbox_entries()
            .into_iter()
            .filter(|entry| !entry.is_failed())
            .filter(|entry| self.schedule_with_delay(entry.key.clone(), entry.due_in(now)))
            .count();
        info!(resumed, "resumed outbox");
        resumed
    }

    /// Attempts every pending outbox record once, right now.
    pub async fn flush_outbox(&self) -> FlushReport {
        let mut report = FlushReport::default();
        if !self.inner.store.is_available() {
            return report;
        }
        for entry in self.outbox_entries().into_iter().filter(|entry| !entry.is_failed()) {
            if contains(&self.inner.in_flight, &entry.key.composite()) {
                report.skipped += 1;
                continue;
            }
            match self.persist_to_database(&entry.key).await {
                Delivery::Done => report.delivered += 1,
                Delivery::Retry(_) => report.retrying += 1,
                Delivery::GaveUp => report.parked += 1,
            }
        }
        info!(?report, "flushed outbox");
        report
    }

    /// Every outbox record, in enqueue order.
    #[must_use]
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        if !self.inner.store.is_available() {
            return Vec::new();
        }
        self.load_list(&self.outbox_key())
    }

    /// Records that ran out of attempts.
    #[must_use]
    pub fn sync_errors(&self) -> Vec<OutboxEntry> {
        self.outbox_entries()
            .into_iter()
            .filter(OutboxEntry::is_failed)
            .collect()
    }

    /// Gives every failed record a fresh attempt budget and delivers it
    /// immediately. Returns how many were re-armed.
    pub fn retry_failed(&self) -> usize {
        if !self.inner.store.is_available() {
            return 0;
        }
        let now = self.inner.clock.now_millis();
        let rearmed = {
            let _guard = self.inner.lock();
            self.modify_list(&self.outbox_key(), |entries: &mut Vec<OutboxEntry>| {
                let keys: Vec<PersistKey> = entries
                    .iter_mut()
                    .filter(|entry| entry.is_failed())
                    .map(|entry| {
                        entry.rearm(now);
                        entry.key.clone()
                    })
                    .collect();
                (!keys.is_empty()).then_some(keys)
            })
        };
        let keys = match rearmed {
            Ok(keys) => keys.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "failed to re-arm failed deliveries");
                return 0;
            }
        };
        for key in &keys {
            self.schedule_with_delay(key.clone(), Duration::ZERO);
        }
        info!(rearmed = keys.len(), "re-armed failed deliveries");
        keys.len()
    }
}

/// Timer task behind [`LocalChatCache::schedule_for_persistence`]. Holds only
/// a weak handle while sleeping and stops once the cache is gone.
async fn deliver_after(weak: Weak<CacheInner>, key: PersistKey, mut delay: Duration) {
    loop {
        runtime::sleep(delay).await;
        let Some(inner) = weak.upgrade() else {
            debug!(key = %key, "cache dropped before delivery");
            return;
        };
        let cache = LocalChatCache { inner };
        match cache.persist_to_database(&key).await {
            Delivery::Retry(next) => delay = next,
            Delivery::Done | Delivery::GaveUp => {
                release(&cache.inner.pending, &key.composite());
                return;
            }
        }
    }
}
