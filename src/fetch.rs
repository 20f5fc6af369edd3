use crate::api::MailApi;
use crate::cache::{CacheService, PageOutcome};
use crate::db;
use crate::error::CacheError;
use crate::events::EventsService;
use crate::models::ViewMode;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One-shot bootstrap of the event cursor, invoked when no cursor exists yet
/// (first launch, or after the cursor was invalidated).
pub struct FetchLatestEventId {
    events: EventsService,
}

impl FetchLatestEventId {
    pub fn new(events: EventsService) -> Self {
        Self { events }
    }

    pub async fn execute(&self, user_id: &str) -> Result<String, CacheError> {
        self.events.fetch_latest_event_id(user_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The event cursor was empty or unchanged; nothing was touched.
    Skipped,
    Completed(PageOutcome),
}

/// Full resync driven by application lifecycle hooks (foreground, background
/// fetch). Windows are rebuilt, unread counters are preserved.
pub struct FetchMessagesWithReset {
    api: Arc<dyn MailApi>,
    cache: CacheService,
}

impl FetchMessagesWithReset {
    pub fn new(api: Arc<dyn MailApi>, cache: CacheService) -> Self {
        Self { api, cache }
    }

    /// A network failure in step 2 aborts before contacts, labels or sync
    /// windows are touched, so a flaky fetch cannot corrupt bookkeeping.
    pub async fn execute(
        &self,
        user_id: &str,
        label_id: &str,
        end_time: i64,
        is_unread: bool,
        clean_contact: bool,
        remove_all_draft: bool,
    ) -> Result<ResetOutcome, CacheError> {
        let latest = self.api.fetch_latest_event_id(user_id).await?;
        let stored = self.cache.last_updated().last_event_id(user_id).await?;
        if latest.is_empty() || stored.as_deref() == Some(latest.as_str()) {
            debug!(user_id, "event cursor unchanged, skipping reset");
            return Ok(ResetOutcome::Skipped);
        }

        let page = self
            .api
            .fetch_messages(user_id, label_id, end_time, is_unread)
            .await?;

        if remove_all_draft {
            let purged = self.cache.purge_drafts(user_id).await?;
            debug!(user_id, purged, "purged local drafts");
        }
        if clean_contact {
            self.cache.purge_contacts(user_id).await?;
            let contacts = self.api.fetch_contacts(user_id).await?;
            self.cache.add_new_contacts(user_id, &contacts).await?;
        }

        let labels = self.api.fetch_labels(user_id).await?;
        for raw in &labels.labels {
            match self.cache.add_new_label(user_id, raw).await {
                Ok(_) => {}
                Err(CacheError::Parse(err)) => {
                    warn!(error = %err, "skipping malformed label in reset")
                }
                Err(err) => return Err(err),
            }
        }

        for view_mode in ViewMode::ALL {
            self.cache
                .last_updated()
                .remove_update_time_except_unread(user_id, view_mode)
                .await?;
        }
        self.cache
            .last_updated()
            .update_event_id(user_id, &latest)
            .await?;

        let outcome = self
            .cache
            .parse_messages_response(user_id, label_id, is_unread, &page)
            .await?;
        info!(
            user_id,
            label_id,
            persisted = outcome.persisted,
            "completed fetch with reset"
        );
        Ok(ResetOutcome::Completed(outcome))
    }
}

/// Drops cached messages that have fallen out of a label's synced window.
/// The window frontier (`end_time`) is the cutoff; anything older would be
/// re-fetched on demand anyway.
pub struct PurgeOldMessages {
    cache: CacheService,
}

impl PurgeOldMessages {
    pub fn new(cache: CacheService) -> Self {
        Self { cache }
    }

    pub async fn execute(&self, user_id: &str, label_id: &str) -> Result<u64, CacheError> {
        let Some(record) = self
            .cache
            .last_updated()
            .last_update(label_id, user_id, ViewMode::SingleMessage)
            .await?
        else {
            return Ok(0);
        };
        if record.is_new || record.end_time == 0 {
            return Ok(0);
        }

        let mut tx = self.cache.store().begin().await?;
        let purged =
            db::delete_messages_older_than(&mut tx, user_id, label_id, record.end_time).await?;
        tx.commit().await?;

        if purged > 0 {
            let total = self
                .cache
                .store()
                .message_count_by_label(user_id, label_id)
                .await?;
            self.cache
                .last_updated()
                .update_unread_count(
                    label_id,
                    user_id,
                    record.unread_count,
                    Some(total),
                    ViewMode::SingleMessage,
                )
                .await?;
            info!(user_id, label_id, purged, "purged messages outside sync window");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ContactsResponse, EventsResponse, LabelsResponse, MessagesResponse};
    use crate::last_updated::LastUpdatedStore;
    use crate::models::{location, Message, MESSAGE_STATUS_SYNCED};
    use crate::testutil::memory_store;
    use async_trait::async_trait;
    use serde_json::json;

    const USER: &str = "user-1";

    struct FetchMock {
        latest_event_id: String,
        page: Option<MessagesResponse>,
        labels: LabelsResponse,
        contacts: ContactsResponse,
    }

    impl FetchMock {
        fn new(latest_event_id: &str) -> Self {
            Self {
                latest_event_id: latest_event_id.to_string(),
                page: Some(MessagesResponse::default()),
                labels: LabelsResponse::default(),
                contacts: ContactsResponse::default(),
            }
        }
    }

    #[async_trait]
    impl MailApi for FetchMock {
        async fn fetch_messages(
            &self,
            _user_id: &str,
            _label_id: &str,
            _end_time: i64,
            _unread_only: bool,
        ) -> Result<MessagesResponse, CacheError> {
            self.page
                .clone()
                .ok_or_else(|| CacheError::Api("fetch failed".to_string()))
        }

        async fn fetch_latest_event_id(&self, _user_id: &str) -> Result<String, CacheError> {
            Ok(self.latest_event_id.clone())
        }

        async fn fetch_events(
            &self,
            _user_id: &str,
            _event_id: &str,
        ) -> Result<EventsResponse, CacheError> {
            Ok(EventsResponse::default())
        }

        async fn fetch_labels(&self, _user_id: &str) -> Result<LabelsResponse, CacheError> {
            Ok(self.labels.clone())
        }

        async fn fetch_contacts(&self, _user_id: &str) -> Result<ContactsResponse, CacheError> {
            Ok(self.contacts.clone())
        }
    }

    async fn cache() -> CacheService {
        let store = memory_store().await;
        CacheService::new(store.clone(), LastUpdatedStore::new(store))
    }

    fn draft(id: &str) -> Message {
        Message {
            id: id.to_string(),
            user_id: USER.to_string(),
            conversation_id: String::new(),
            subject: Some("draft".to_string()),
            sender: None,
            to_list: None,
            body: None,
            time: 100,
            unread: false,
            is_draft: true,
            is_sending: false,
            message_status: 0,
            message_type: 0,
        }
    }

    async fn seed_message(cache: &CacheService, message: &Message, label: &str) {
        let mut tx = cache.store().begin().await.unwrap();
        db::upsert_message(&mut tx, message).await.unwrap();
        db::attach_label(&mut tx, &message.id, label).await.unwrap();
        tx.commit().await.unwrap();
    }

    fn page_entry(id: &str, time: i64) -> serde_json::Value {
        json!({"ID": id, "ConversationID": format!("conv-{id}"), "Time": time, "Unread": 0})
    }

    #[tokio::test]
    async fn skips_when_event_id_unchanged() {
        let cache = cache().await;
        cache
            .last_updated()
            .update_event_id(USER, "evt-1")
            .await
            .unwrap();
        let reset = FetchMessagesWithReset::new(Arc::new(FetchMock::new("evt-1")), cache.clone());

        let outcome = reset
            .execute(USER, location::INBOX, 0, false, true, true)
            .await
            .unwrap();
        assert_eq!(outcome, ResetOutcome::Skipped);
    }

    #[tokio::test]
    async fn skips_when_event_id_empty() {
        let cache = cache().await;
        let reset = FetchMessagesWithReset::new(Arc::new(FetchMock::new("")), cache.clone());
        let outcome = reset
            .execute(USER, location::INBOX, 0, false, false, false)
            .await
            .unwrap();
        assert_eq!(outcome, ResetOutcome::Skipped);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_bookkeeping_untouched() {
        let cache = cache().await;
        cache
            .last_updated()
            .update_event_id(USER, "evt-1")
            .await
            .unwrap();
        cache
            .last_updated()
            .update_last_updated_time(
                location::INBOX,
                USER,
                false,
                1000,
                800,
                5,
                ViewMode::SingleMessage,
            )
            .await
            .unwrap();
        seed_message(&cache, &draft("d1"), location::DRAFT).await;

        let mut mock = FetchMock::new("evt-2");
        mock.page = None;
        let reset = FetchMessagesWithReset::new(Arc::new(mock), cache.clone());

        let err = reset
            .execute(USER, location::INBOX, 0, false, true, true)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Api(_)));

        // Cursor, window and drafts all survive the failed attempt.
        assert_eq!(
            cache.last_updated().last_event_id(USER).await.unwrap().as_deref(),
            Some("evt-1")
        );
        let record = cache
            .last_updated()
            .last_update(location::INBOX, USER, ViewMode::SingleMessage)
            .await
            .unwrap()
            .unwrap();
        assert!(!record.is_new);
        assert_eq!(record.end_time, 800);
        assert!(cache.store().message(USER, "d1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn full_reset_rebuilds_windows_and_preserves_unread() {
        let cache = cache().await;
        cache
            .last_updated()
            .update_event_id(USER, "evt-1")
            .await
            .unwrap();
        cache
            .last_updated()
            .update_unread_count(location::INBOX, USER, 3, Some(9), ViewMode::SingleMessage)
            .await
            .unwrap();
        cache
            .last_updated()
            .update_last_updated_time(
                location::ARCHIVE,
                USER,
                false,
                1000,
                800,
                5,
                ViewMode::SingleMessage,
            )
            .await
            .unwrap();
        seed_message(&cache, &draft("d1"), location::DRAFT).await;

        let mut mock = FetchMock::new("evt-2");
        mock.page = Some(MessagesResponse {
            total: 2,
            messages: vec![page_entry("m1", 500), page_entry("m2", 400)],
        });
        mock.labels = LabelsResponse {
            labels: vec![json!({"ID": "custom-1", "Name": "Work", "Type": 2})],
        };
        mock.contacts = ContactsResponse {
            contacts: vec![json!({
                "ID": "c1",
                "Name": "Alice",
                "ContactEmails": [{"ID": "e1", "Email": "alice@example.com"}],
            })],
        };
        let reset = FetchMessagesWithReset::new(Arc::new(mock), cache.clone());

        let outcome = reset
            .execute(USER, location::INBOX, 0, false, true, true)
            .await
            .unwrap();
        let ResetOutcome::Completed(page) = outcome else {
            panic!("expected completed reset");
        };
        assert_eq!(page.persisted, 2);

        // Draft purged, contacts and labels resynced, cursor advanced.
        assert!(cache.store().message(USER, "d1").await.unwrap().is_none());
        assert!(cache.store().contact(USER, "c1").await.unwrap().is_some());
        assert!(cache.store().label(USER, "custom-1").await.unwrap().is_some());
        assert_eq!(
            cache.last_updated().last_event_id(USER).await.unwrap().as_deref(),
            Some("evt-2")
        );

        // The untouched label's window was dropped, unread counter kept.
        let archive = cache
            .last_updated()
            .last_update(location::ARCHIVE, USER, ViewMode::SingleMessage)
            .await
            .unwrap()
            .unwrap();
        assert!(archive.is_new);
        assert_eq!(archive.end_time, 0);
        let inbox = cache
            .last_updated()
            .last_update(location::INBOX, USER, ViewMode::SingleMessage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbox.unread_count, 3);
        // Rebuilt from the fetched page.
        assert!(!inbox.is_new);
        assert_eq!(inbox.start_time, 500);
        assert_eq!(inbox.end_time, 400);

        // Fetched messages are in place.
        let msg = cache.store().message(USER, "m1").await.unwrap().unwrap();
        assert_eq!(msg.message_status, MESSAGE_STATUS_SYNCED);
    }

    #[tokio::test]
    async fn purge_old_messages_respects_window_frontier() {
        let cache = cache().await;
        let mut stale = draft("old");
        stale.is_draft = false;
        stale.time = 100;
        seed_message(&cache, &stale, location::INBOX).await;
        let mut fresh = draft("new");
        fresh.is_draft = false;
        fresh.time = 900;
        seed_message(&cache, &fresh, location::INBOX).await;

        // No window yet: purge is a no-op.
        let purge = PurgeOldMessages::new(cache.clone());
        assert_eq!(purge.execute(USER, location::INBOX).await.unwrap(), 0);

        cache
            .last_updated()
            .update_last_updated_time(
                location::INBOX,
                USER,
                false,
                1000,
                500,
                2,
                ViewMode::SingleMessage,
            )
            .await
            .unwrap();

        assert_eq!(purge.execute(USER, location::INBOX).await.unwrap(), 1);
        assert!(cache.store().message(USER, "old").await.unwrap().is_none());
        assert!(cache.store().message(USER, "new").await.unwrap().is_some());

        let record = cache
            .last_updated()
            .last_update(location::INBOX, USER, ViewMode::SingleMessage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.total_count, 1);
    }
}
