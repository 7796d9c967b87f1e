//! Persistent local state: key-value storage, conversations, preferences.

pub mod kv_store;
pub mod preferences;
pub mod transcript_store;

pub use kv_store::{KeyValueStore, SqliteKeyValueStore, StoreFuture};
pub use preferences::{Preferences, THEME_KEY, Theme};
pub use transcript_store::{CHATS_KEY, TranscriptStore};
