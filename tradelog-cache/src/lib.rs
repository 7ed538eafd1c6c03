#![cfg_attr(not(test), forbid(unsafe_code))]

//! # Chat Cache
//!
//! Local-first storage for journal chat sessions and messages.
//!
//! New entries are written to durable local storage before any network call
//! and show up in reads immediately. A durable outbox delivers them to the
//! remote journal API after a quiescence delay, retrying with exponential
//! backoff. At read time [`LocalChatCache::get_combined_messages`] folds
//! unconfirmed local messages into the server feed without duplicating the
//! ones the server already echoed back.
//!
//! ```no_run
//! use std::sync::Arc;
//! use chat_cache::{HttpChatRemote, LocalChatCache, MemoryStore};
//! use shared::{config::Config, models::{MessageRole, NewMessage}};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::with_defaults();
//! let remote = Arc::new(HttpChatRemote::new(&config.remote)?);
//! let cache = LocalChatCache::new(Arc::new(MemoryStore::new()), remote, &config);
//!
//! let sent = cache.save_message_locally(
//!     "session-1",
//!     NewMessage::text("session-1", MessageRole::User, "Closed my NVDA calls"),
//! );
//! assert!(sent.is_local);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod error;
pub mod local;
pub mod merge;
pub mod outbox;
pub mod remote;
mod runtime;
pub mod storage;

#[cfg(target_arch = "wasm32")]
pub mod browser;

pub use cache::{CacheBuilder, CleanupReport, FlushReport, LocalChatCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, CacheResult, RemoteError, StorageError};
pub use local::{LocalMessage, LocalSession};
pub use merge::{DedupPolicy, DiscardReason, Discarded, MergeOutcome};
pub use outbox::{OutboxEntry, OutboxStatus, PersistKey};
pub use remote::ChatRemote;
#[cfg(not(target_arch = "wasm32"))]
pub use remote::HttpChatRemote;
pub use storage::{FileStore, KeyValueStore, MemoryStore, UnavailableStore};

#[cfg(target_arch = "wasm32")]
pub use browser::{BrowserStore, install_debug_bindings};
