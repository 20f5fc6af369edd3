use crate::error::CacheError;
use crate::models::{Contact, ContactEmail, Label, Message, MESSAGE_STATUS_SYNCED};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Narrow seam to the mail API. The concrete HTTP transport, session
/// credentials, API-version headers and the bounded auth-refresh retry all
/// live on the other side of this trait.
#[async_trait]
pub trait MailApi: Send + Sync {
    async fn fetch_messages(
        &self,
        user_id: &str,
        label_id: &str,
        end_time: i64,
        unread_only: bool,
    ) -> Result<MessagesResponse, CacheError>;

    async fn fetch_latest_event_id(&self, user_id: &str) -> Result<String, CacheError>;

    async fn fetch_events(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<EventsResponse, CacheError>;

    async fn fetch_labels(&self, user_id: &str) -> Result<LabelsResponse, CacheError>;

    async fn fetch_contacts(&self, user_id: &str) -> Result<ContactsResponse, CacheError>;
}

/// One page of the message list. Entries stay raw JSON so a malformed one
/// can be rejected without poisoning its siblings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagesResponse {
    #[serde(rename = "Total", default)]
    pub total: i64,
    #[serde(rename = "Messages", default)]
    pub messages: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelsResponse {
    #[serde(rename = "Labels", default)]
    pub labels: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactsResponse {
    #[serde(rename = "Contacts", default)]
    pub contacts: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsResponse {
    #[serde(rename = "EventID", default)]
    pub event_id: String,
    /// Non-zero when the cursor is too old and a full resync is required.
    #[serde(rename = "Refresh", default)]
    pub refresh: i64,
    /// Non-zero when more batches are pending behind this one.
    #[serde(rename = "More", default)]
    pub more: i64,
    #[serde(rename = "Messages", default)]
    pub messages: Vec<serde_json::Value>,
    #[serde(rename = "Labels", default)]
    pub labels: Vec<serde_json::Value>,
    #[serde(rename = "Contacts", default)]
    pub contacts: Vec<serde_json::Value>,
    #[serde(rename = "MessageCounts", default)]
    pub message_counts: Vec<CountSnapshot>,
    #[serde(rename = "ConversationCounts", default)]
    pub conversation_counts: Vec<CountSnapshot>,
}

/// Authoritative per-label counter snapshot pushed through the event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountSnapshot {
    #[serde(rename = "LabelID")]
    pub label_id: String,
    #[serde(rename = "Unread", default)]
    pub unread: i64,
    #[serde(rename = "Total", default)]
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMessage {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ConversationID", default)]
    pub conversation_id: String,
    #[serde(rename = "Subject", default)]
    pub subject: Option<String>,
    #[serde(rename = "Sender", default)]
    pub sender: Option<String>,
    #[serde(rename = "ToList", default)]
    pub to_list: Option<String>,
    #[serde(rename = "Body", default)]
    pub body: Option<String>,
    #[serde(rename = "Time", default)]
    pub time: i64,
    #[serde(rename = "Unread", default)]
    pub unread: i64,
    #[serde(rename = "IsDraft", default)]
    pub is_draft: i64,
    #[serde(rename = "LabelIDs", default)]
    pub label_ids: Vec<String>,
}

impl RemoteMessage {
    pub fn into_message(self, user_id: &str) -> Message {
        Message {
            id: self.id,
            user_id: user_id.to_string(),
            conversation_id: self.conversation_id,
            subject: self.subject,
            sender: self.sender,
            to_list: self.to_list,
            body: self.body,
            time: self.time,
            unread: self.unread != 0,
            is_draft: self.is_draft != 0,
            is_sending: false,
            message_status: MESSAGE_STATUS_SYNCED,
            message_type: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLabel {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Color", default)]
    pub color: Option<String>,
    #[serde(rename = "Type", default = "default_label_type")]
    pub label_type: i64,
    #[serde(rename = "Order", default)]
    pub sort_order: i64,
    #[serde(rename = "ParentID", default)]
    pub parent_id: Option<String>,
}

fn default_label_type() -> i64 {
    1
}

impl RemoteLabel {
    pub fn into_label(self, user_id: &str) -> Label {
        Label {
            id: self.id,
            user_id: user_id.to_string(),
            name: self.name,
            color: self.color,
            label_type: self.label_type,
            sort_order: self.sort_order,
            parent_id: self.parent_id,
            is_soft_deleted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteContact {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    /// Signed/encrypted card payloads, kept opaque.
    #[serde(rename = "Cards", default)]
    pub cards: Option<serde_json::Value>,
    #[serde(rename = "ContactEmails", default)]
    pub contact_emails: Vec<RemoteContactEmail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteContactEmail {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Email")]
    pub address: String,
    #[serde(rename = "Defaults", default)]
    pub is_default: i64,
    #[serde(rename = "Order", default)]
    pub sort_order: i64,
}

impl RemoteContact {
    pub fn into_entities(self, user_id: &str) -> (Contact, Vec<ContactEmail>) {
        let contact = Contact {
            id: self.id.clone(),
            user_id: user_id.to_string(),
            name: self.name,
            cards: self.cards.map(|c| c.to_string()),
            is_soft_deleted: false,
        };
        let emails = self
            .contact_emails
            .into_iter()
            .map(|e| ContactEmail {
                id: e.id,
                contact_id: self.id.clone(),
                user_id: user_id.to_string(),
                address: e.address,
                is_default: e.is_default != 0,
                sort_order: e.sort_order,
            })
            .collect();
        (contact, emails)
    }
}
