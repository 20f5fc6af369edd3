use serde::{Deserialize, Serialize};

/// Well-known system folder label ids. User-created labels get opaque ids
/// from the server and never collide with these.
pub mod location {
    pub const INBOX: &str = "0";
    pub const DRAFT: &str = "1";
    pub const SENT: &str = "2";
    pub const TRASH: &str = "3";
    pub const SPAM: &str = "4";
    pub const ALL_MAIL: &str = "5";
    pub const ARCHIVE: &str = "6";
    pub const STARRED: &str = "10";
}

/// Metadata for this message has been fetched from the server.
pub const MESSAGE_STATUS_SYNCED: i64 = 1;

/// Local-only review placeholder, never shown in lists and purged by
/// `CacheService::clean_review_items`.
pub const MESSAGE_TYPE_REVIEW: i64 = 1;

/// Counters and sync windows are kept separately for the flat message list
/// and the conversation-grouped list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewMode {
    SingleMessage,
    Conversation,
}

impl ViewMode {
    pub const ALL: [ViewMode; 2] = [ViewMode::SingleMessage, ViewMode::Conversation];

    pub fn as_i64(self) -> i64 {
        match self {
            ViewMode::SingleMessage => 0,
            ViewMode::Conversation => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub to_list: Option<String>,
    pub body: Option<String>,
    pub time: i64,
    pub unread: bool,
    pub is_draft: bool,
    pub is_sending: bool,
    pub message_status: i64,
    pub message_type: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Label {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub color: Option<String>,
    pub label_type: i64, // 1 system, 2 label, 3 folder
    pub sort_order: i64,
    pub parent_id: Option<String>,
    pub is_soft_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contact {
    pub id: String,
    pub user_id: String,
    pub name: Option<String>,
    /// Opaque signed/encrypted card payload, stored verbatim.
    pub cards: Option<String>,
    pub is_soft_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContactEmail {
    pub id: String,
    pub contact_id: String,
    pub user_id: String,
    pub address: String,
    pub is_default: bool,
    pub sort_order: i64,
}

/// Sync bookkeeping for one (label, user, view-mode) triple.
///
/// `start_time`/`end_time` bound the range of message timestamps already
/// fetched for the label; `end_time` moves backward as older pages come in.
/// The unread fields track a parallel window for unread-only fetches.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LabelUpdate {
    pub label_id: String,
    pub user_id: String,
    pub view_mode: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub is_new: bool,
    pub unread_start: i64,
    pub unread_end: i64,
    pub is_unread_new: bool,
    pub unread_count: i64,
    pub total_count: i64,
    pub updated_at: i64,
}

impl LabelUpdate {
    pub fn new(label_id: &str, user_id: &str, view_mode: ViewMode) -> Self {
        Self {
            label_id: label_id.to_string(),
            user_id: user_id.to_string(),
            view_mode: view_mode.as_i64(),
            start_time: 0,
            end_time: 0,
            is_new: true,
            unread_start: 0,
            unread_end: 0,
            is_unread_new: true,
            unread_count: 0,
            total_count: 0,
            updated_at: 0,
        }
    }
}

/// Action codes carried by event stream entries.
pub mod event_action {
    pub const DELETE: i64 = 0;
    pub const CREATE: i64 = 1;
    pub const UPDATE: i64 = 2;
    pub const UPDATE_FLAGS: i64 = 3;
}
