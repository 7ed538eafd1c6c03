//! Subcommands that operate on the local chat cache.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chat_cache::{
    ChatRemote, FileStore, HttpChatRemote, KeyValueStore, LocalChatCache, LocalMessage, MemoryStore,
    OutboxEntry, OutboxStatus,
};
use clap::Args;
use shared::{
    config::{Config, StorageBackend},
    models::{ChatMessage, MessageKind, MessageRole, NewMessage, NewSession},
};
use tracing::{debug, info};

/// The cache together with the remote it flushes to.
#[derive(Debug)]
pub struct Journal {
    pub cache: LocalChatCache,
    pub remote: Arc<dyn ChatRemote>,
}

impl Journal {
    /// Opens the configured store and HTTP remote.
    ///
    /// # Errors
    /// Returns an error if the data directory or the HTTP client cannot be set up.
    pub fn open(config: &Config) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match config.storage.backend {
            StorageBackend::File => {
                let dir = config.storage.resolved_data_dir();
                let store = FileStore::open(dir.clone())
                    .with_context(|| format!("failed to open cache directory {}", dir.display()))?;
                Arc::new(store)
            }
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };
        let remote: Arc<dyn ChatRemote> =
            Arc::new(HttpChatRemote::new(&config.remote).context("failed to build HTTP client")?);
        debug!(backend = ?config.storage.backend, base_url = %config.remote.base_url, "journal opened");

        Ok(Self {
            cache: LocalChatCache::new(store, Arc::clone(&remote), config),
            remote,
        })
    }
}

fn parse_role(value: &str) -> Result<MessageRole, String> {
    MessageRole::try_from(value).map_err(str::to_string)
}

fn parse_kind(value: &str) -> Result<MessageKind, String> {
    MessageKind::try_from(value).map_err(str::to_string)
}

#[derive(Args, Debug)]
pub struct MessagesArgs {
    /// Session whose messages to list
    pub session_id: String,

    /// Fetch the remote feed and print the merged, de-duplicated timeline
    #[arg(long)]
    pub merged: bool,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Session to append the message to
    pub session_id: String,

    /// Message text
    pub content: String,

    #[arg(long, default_value = "user", value_parser = parse_role)]
    pub role: MessageRole,

    #[arg(long, default_value = "text", value_parser = parse_kind)]
    pub kind: MessageKind,

    /// Deliver the outbox right away instead of waiting for the quiescence delay
    #[arg(long)]
    pub sync: bool,
}

fn status(is_local: bool) -> &'static str {
    if is_local { "local" } else { "synced" }
}

fn print_message_row(message: &ChatMessage, state: &str) {
    println!(
        "{}  {:<9}  {:<6}  {}",
        message.created_at,
        message.role.as_str(),
        state,
        message.content
    );
}

/// Maps a session id given on the command line to the key its local messages
/// are filed under and the id the server knows it by, if any.
///
/// Either the local or the server id of a cached session is accepted. Ids of
/// sessions that were never cached are assumed to be server ids.
fn resolve_session(journal: &Journal, session_id: &str) -> (String, Option<String>) {
    let cached = journal
        .cache
        .get_all_sessions()
        .into_iter()
        .find(|entry| entry.local_id == session_id || entry.session.id == session_id);
    match cached {
        Some(entry) if entry.is_local => (entry.local_id, None),
        Some(entry) => (entry.local_id, Some(entry.session.id)),
        None => (session_id.to_string(), Some(session_id.to_string())),
    }
}

/// Lists cached messages, or the merged feed with `--merged`.
///
/// # Errors
/// Returns an error if the remote feed cannot be fetched or output cannot be encoded.
pub async fn list_messages(journal: &Journal, args: MessagesArgs) -> Result<()> {
    let (local_key, remote_id) = resolve_session(journal, &args.session_id);
    if args.merged {
        let remote = match remote_id {
            Some(remote_id) => journal
                .remote
                .list_messages(&remote_id)
                .await
                .with_context(|| format!("failed to fetch messages of session {remote_id}"))?,
            None => {
                debug!(session_id = %args.session_id, "session not yet on the server, showing local messages only");
                Vec::new()
            }
        };
        let outcome = journal.cache.combine_messages(&local_key, &remote);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&outcome.messages)?);
        } else {
            let remote_ids: Vec<&str> = remote.iter().map(|message| message.id.as_str()).collect();
            for message in &outcome.messages {
                let state = status(!remote_ids.contains(&message.id.as_str()));
                print_message_row(message, state);
            }
            if !outcome.discarded.is_empty() {
                println!("({} local duplicates hidden)", outcome.discarded.len());
            }
        }
        return Ok(());
    }

    let messages: Vec<LocalMessage> = journal.cache.get_session_messages(&local_key);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
    } else if messages.is_empty() {
        println!("No cached messages for session {}.", args.session_id);
    } else {
        for entry in &messages {
            print_message_row(&entry.message, status(entry.is_local));
        }
    }
    Ok(())
}

/// Lists cached sessions, newest first.
///
/// # Errors
/// Returns an error if JSON output cannot be encoded.
pub fn list_sessions(journal: &Journal, json: bool) -> Result<()> {
    let sessions = journal.cache.get_all_sessions();
    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No cached sessions.");
    }
    for entry in &sessions {
        println!(
            "{}  {:<6}  {}  {}",
            entry.session.created_at,
            status(entry.is_local),
            entry.session.id,
            entry.session.title
        );
    }
    Ok(())
}

pub fn new_session(journal: &Journal, title: String) {
    let entry = journal.cache.save_session_locally(NewSession::titled(title));
    println!("{}", entry.local_id);
}

/// Saves a message locally and optionally flushes the outbox.
pub async fn send(journal: &Journal, args: SendArgs) {
    let payload =
        NewMessage::text(args.session_id.clone(), args.role, args.content).with_kind(args.kind);
    let entry = journal.cache.save_message_locally(&args.session_id, payload);
    println!("{}", entry.local_id);

    if args.sync {
        sync(journal, false).await;
    }
}

pub fn dedupe(journal: &Journal, session_id: &str) {
    let removed = journal.cache.remove_duplicate_messages(session_id);
    println!("Removed {removed} duplicate message(s) from session {session_id}.");
}

pub fn clear(journal: &Journal, session_id: &str) {
    journal.cache.clear_session_data(session_id);
    println!("Cleared cached data of session {session_id}.");
}

pub fn cleanup(journal: &Journal, max_age_hours: u64) {
    let report = journal
        .cache
        .cleanup_old_entries(Duration::from_secs(max_age_hours.saturating_mul(3_600)));
    println!(
        "Removed {} session(s), {} message list(s), {} message(s), {} outbox record(s).",
        report.sessions_removed,
        report.message_lists_removed,
        report.messages_removed,
        report.outbox_entries_removed
    );
}

fn print_outbox_row(entry: &OutboxEntry) {
    println!(
        "{:<7}  attempts={}  {}  {}",
        match entry.status {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Failed => "failed",
        },
        entry.attempts,
        entry.key,
        entry.last_error.as_deref().unwrap_or("-")
    );
}

/// Prints outbox records, or only the failed ones.
///
/// # Errors
/// Returns an error if JSON output cannot be encoded.
pub fn outbox(journal: &Journal, failed_only: bool, json: bool) -> Result<()> {
    let entries = if failed_only {
        journal.cache.sync_errors()
    } else {
        journal.cache.outbox_entries()
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("Outbox is empty.");
    }
    entries.iter().for_each(print_outbox_row);
    Ok(())
}

/// Delivers every pending outbox record now.
pub async fn sync(journal: &Journal, retry_failed: bool) {
    if retry_failed {
        let rearmed = journal.cache.retry_failed();
        info!(rearmed, "re-armed failed deliveries");
    }
    let report = journal.cache.flush_outbox().await;
    println!(
        "Delivered {}, retrying {}, failed {}, skipped {}.",
        report.delivered, report.retrying, report.parked, report.skipped
    );
}
