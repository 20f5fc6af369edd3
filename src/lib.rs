//! Event-driven local mailbox synchronization cache.
//!
//! Ingests paginated and event-based server responses and reconciles them
//! against a SQLite-backed store of messages, conversations, contacts and
//! labels, while keeping per-label unread/total counters consistent for both
//! the single-message and conversation views.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fetch;
pub mod last_updated;
pub mod models;
pub mod writer;

#[cfg(test)]
mod testutil;

pub use api::MailApi;
pub use cache::{CacheService, PageOutcome};
pub use config::SyncConfig;
pub use db::Store;
pub use error::CacheError;
pub use events::{EventsOutcome, EventsService};
pub use fetch::{FetchLatestEventId, FetchMessagesWithReset, PurgeOldMessages, ResetOutcome};
pub use last_updated::LastUpdatedStore;
pub use models::ViewMode;
pub use writer::{spawn_writer, WriterHandle};
