use crate::api::{EventsResponse, MailApi, RemoteMessage};
use crate::cache::CacheService;
use crate::error::CacheError;
use crate::models::{event_action, ViewMode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one polling pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventsOutcome {
    /// All pending batches applied; the cursor now points here.
    Applied { event_id: String },
    /// The cursor is too old for the server to replay; the caller must run a
    /// full reset (see `FetchMessagesWithReset`). Local state is untouched.
    RefreshRequired,
}

#[derive(Debug, Deserialize)]
struct MessageEvent {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Action")]
    action: i64,
    #[serde(rename = "Message", default)]
    message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LabelEvent {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Action")]
    action: i64,
    #[serde(rename = "Label", default)]
    label: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ContactEvent {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Action")]
    action: i64,
    #[serde(rename = "Contact", default)]
    contact: Option<serde_json::Value>,
}

/// Polls the event cursor endpoint and turns incremental payloads into
/// CacheService mutations. Entries are applied in the order received; the
/// cursor advances only after a batch has committed, so a crash mid-batch
/// replays it. That is safe: every apply is an idempotent primary-key upsert.
#[derive(Clone)]
pub struct EventsService {
    api: Arc<dyn MailApi>,
    cache: CacheService,
}

impl EventsService {
    pub fn new(api: Arc<dyn MailApi>, cache: CacheService) -> Self {
        Self { api, cache }
    }

    /// One-shot bootstrap when no cursor exists yet.
    pub async fn fetch_latest_event_id(&self, user_id: &str) -> Result<String, CacheError> {
        let event_id = self.api.fetch_latest_event_id(user_id).await?;
        self.cache
            .last_updated()
            .update_event_id(user_id, &event_id)
            .await?;
        info!(user_id, event_id, "bootstrapped event cursor");
        Ok(event_id)
    }

    pub async fn process_events(&self, user_id: &str) -> Result<EventsOutcome, CacheError> {
        let mut cursor = self
            .cache
            .last_updated()
            .last_event_id(user_id)
            .await?
            .filter(|id| !id.is_empty())
            .ok_or(CacheError::EventIdRequired)?;

        loop {
            let response = self.api.fetch_events(user_id, &cursor).await?;
            if response.refresh != 0 {
                info!(user_id, "event stream requires full refresh");
                return Ok(EventsOutcome::RefreshRequired);
            }

            self.apply_batch(user_id, &response).await?;

            let advanced = !response.event_id.is_empty() && response.event_id != cursor;
            if advanced {
                self.cache
                    .last_updated()
                    .update_event_id(user_id, &response.event_id)
                    .await?;
                cursor = response.event_id.clone();
            }
            if response.more == 0 {
                break;
            }
            if !advanced {
                // Refetching the same cursor would loop forever.
                warn!(user_id, "event batch signals more without advancing the cursor");
                break;
            }
            debug!(user_id, "more event batches pending");
        }
        Ok(EventsOutcome::Applied { event_id: cursor })
    }

    async fn apply_batch(
        &self,
        user_id: &str,
        response: &EventsResponse,
    ) -> Result<(), CacheError> {
        for raw in &response.messages {
            self.apply_message_event(user_id, raw).await?;
        }
        for raw in &response.labels {
            self.apply_label_event(user_id, raw).await?;
        }
        for raw in &response.contacts {
            self.apply_contact_event(user_id, raw).await?;
        }
        for snapshot in &response.message_counts {
            self.cache
                .last_updated()
                .update_unread_count(
                    &snapshot.label_id,
                    user_id,
                    snapshot.unread,
                    Some(snapshot.total),
                    ViewMode::SingleMessage,
                )
                .await?;
        }
        for snapshot in &response.conversation_counts {
            self.cache
                .last_updated()
                .update_unread_count(
                    &snapshot.label_id,
                    user_id,
                    snapshot.unread,
                    Some(snapshot.total),
                    ViewMode::Conversation,
                )
                .await?;
        }
        Ok(())
    }

    async fn apply_message_event(
        &self,
        user_id: &str,
        raw: &serde_json::Value,
    ) -> Result<(), CacheError> {
        let event: MessageEvent = match serde_json::from_value(raw.clone()) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "skipping malformed message event");
                return Ok(());
            }
        };
        match event.action {
            event_action::DELETE => {
                self.cache.remove_message(user_id, &event.id).await?;
            }
            event_action::CREATE | event_action::UPDATE | event_action::UPDATE_FLAGS => {
                let Some(mut body) = event.message else {
                    warn!(event_id = %event.id, "message event without payload");
                    return Ok(());
                };
                // Older streams omit the ID inside the payload.
                if let Some(obj) = body.as_object_mut() {
                    obj.entry("ID".to_string())
                        .or_insert_with(|| serde_json::Value::String(event.id.clone()));
                }
                match serde_json::from_value::<RemoteMessage>(body) {
                    Ok(remote) => self.cache.apply_message_event(user_id, remote).await?,
                    Err(err) => warn!(error = %err, "skipping malformed message payload"),
                }
            }
            other => debug!(action = other, "ignoring unknown message event action"),
        }
        Ok(())
    }

    async fn apply_label_event(
        &self,
        user_id: &str,
        raw: &serde_json::Value,
    ) -> Result<(), CacheError> {
        let mut raw = raw.clone();
        strip_conflicting_label_fields(&mut raw);
        let event: LabelEvent = match serde_json::from_value(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "skipping malformed label event");
                return Ok(());
            }
        };
        match event.action {
            event_action::DELETE => {
                self.cache.delete_label(user_id, &event.id).await?;
            }
            event_action::CREATE | event_action::UPDATE => {
                let Some(body) = event.label else {
                    warn!(event_id = %event.id, "label event without payload");
                    return Ok(());
                };
                match self.cache.add_new_label(user_id, &body).await {
                    Ok(_) => {}
                    Err(CacheError::Parse(err)) => {
                        warn!(error = %err, "skipping malformed label payload")
                    }
                    Err(err) => return Err(err),
                }
            }
            other => debug!(action = other, "ignoring unknown label event action"),
        }
        Ok(())
    }

    async fn apply_contact_event(
        &self,
        user_id: &str,
        raw: &serde_json::Value,
    ) -> Result<(), CacheError> {
        let event: ContactEvent = match serde_json::from_value(raw.clone()) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "skipping malformed contact event");
                return Ok(());
            }
        };
        match event.action {
            event_action::DELETE => {
                self.cache.delete_contact(user_id, &event.id).await?;
            }
            event_action::CREATE | event_action::UPDATE => {
                let Some(body) = event.contact else {
                    warn!(event_id = %event.id, "contact event without payload");
                    return Ok(());
                };
                match self.cache.update_contact(user_id, &body).await {
                    Ok(_) => {}
                    Err(CacheError::Parse(err)) => {
                        warn!(error = %err, "skipping malformed contact payload")
                    }
                    Err(err) => return Err(err),
                }
            }
            other => debug!(action = other, "ignoring unknown contact event action"),
        }
        Ok(())
    }
}

/// Legacy event batches carry `Type`/`Order` at the entry's top level, left
/// over from the pre-v3 shape. They collide with the nested label object,
/// which owns the authoritative values, so the stale keys are dropped before
/// decoding. Both shapes must be accepted without corrupting local state.
fn strip_conflicting_label_fields(entry: &mut serde_json::Value) {
    if let Some(obj) = entry.as_object_mut() {
        obj.remove("Type");
        obj.remove("Order");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ContactsResponse, LabelsResponse, MessagesResponse};
    use crate::db::Store;
    use crate::last_updated::LastUpdatedStore;
    use crate::models::location;
    use crate::testutil::memory_store;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const USER: &str = "user-1";

    struct MockApi {
        latest_event_id: String,
        events: Mutex<VecDeque<EventsResponse>>,
    }

    impl MockApi {
        fn new(latest_event_id: &str, batches: Vec<EventsResponse>) -> Self {
            Self {
                latest_event_id: latest_event_id.to_string(),
                events: Mutex::new(batches.into()),
            }
        }
    }

    #[async_trait]
    impl MailApi for MockApi {
        async fn fetch_messages(
            &self,
            _user_id: &str,
            _label_id: &str,
            _end_time: i64,
            _unread_only: bool,
        ) -> Result<MessagesResponse, CacheError> {
            Err(CacheError::Api("not wired".to_string()))
        }

        async fn fetch_latest_event_id(&self, _user_id: &str) -> Result<String, CacheError> {
            Ok(self.latest_event_id.clone())
        }

        async fn fetch_events(
            &self,
            _user_id: &str,
            _event_id: &str,
        ) -> Result<EventsResponse, CacheError> {
            self.events
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| CacheError::Api("no batch queued".to_string()))
        }

        async fn fetch_labels(&self, _user_id: &str) -> Result<LabelsResponse, CacheError> {
            Ok(LabelsResponse::default())
        }

        async fn fetch_contacts(&self, _user_id: &str) -> Result<ContactsResponse, CacheError> {
            Ok(ContactsResponse::default())
        }
    }

    async fn service_with(api: MockApi) -> (EventsService, CacheService) {
        let store: Store = memory_store().await;
        let cache = CacheService::new(store.clone(), LastUpdatedStore::new(store));
        let events = EventsService::new(Arc::new(api), cache.clone());
        (events, cache)
    }

    fn batch(event_id: &str) -> EventsResponse {
        EventsResponse {
            event_id: event_id.to_string(),
            ..Default::default()
        }
    }

    fn message_create(id: &str, time: i64, unread: i64, labels: &[&str]) -> serde_json::Value {
        json!({
            "ID": id,
            "Action": event_action::CREATE,
            "Message": {
                "ConversationID": format!("conv-{id}"),
                "Subject": "evt",
                "Time": time,
                "Unread": unread,
                "LabelIDs": labels,
            },
        })
    }

    #[tokio::test]
    async fn bootstrap_persists_cursor() {
        let (events, cache) = service_with(MockApi::new("evt-100", vec![])).await;
        let id = events.fetch_latest_event_id(USER).await.unwrap();
        assert_eq!(id, "evt-100");
        assert_eq!(
            cache.last_updated().last_event_id(USER).await.unwrap().as_deref(),
            Some("evt-100")
        );
    }

    #[tokio::test]
    async fn process_without_cursor_is_an_error() {
        let (events, _cache) = service_with(MockApi::new("evt-100", vec![])).await;
        let err = events.process_events(USER).await.unwrap_err();
        assert!(matches!(err, CacheError::EventIdRequired));
    }

    #[tokio::test]
    async fn applies_entries_in_order_and_advances_cursor() {
        let mut first = batch("evt-2");
        first.messages = vec![
            message_create("m1", 500, 1, &[location::INBOX]),
            // Created then deleted within one batch: the delete must win.
            message_create("m2", 600, 0, &[location::INBOX]),
            json!({"ID": "m2", "Action": event_action::DELETE}),
        ];
        first.message_counts = vec![crate::api::CountSnapshot {
            label_id: location::INBOX.to_string(),
            unread: 1,
            total: 1,
        }];

        let (events, cache) = service_with(MockApi::new("evt-1", vec![first])).await;
        cache
            .last_updated()
            .update_event_id(USER, "evt-1")
            .await
            .unwrap();

        let outcome = events.process_events(USER).await.unwrap();
        assert_eq!(
            outcome,
            EventsOutcome::Applied {
                event_id: "evt-2".to_string()
            }
        );

        assert!(cache.store().message(USER, "m1").await.unwrap().is_some());
        assert!(cache.store().message(USER, "m2").await.unwrap().is_none());
        assert_eq!(
            cache
                .last_updated()
                .unread_count(location::INBOX, USER, ViewMode::SingleMessage)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            cache.last_updated().last_event_id(USER).await.unwrap().as_deref(),
            Some("evt-2")
        );
    }

    #[tokio::test]
    async fn more_flag_drains_pending_batches() {
        let mut first = batch("evt-2");
        first.more = 1;
        first.messages = vec![message_create("m1", 500, 0, &[location::INBOX])];
        let mut second = batch("evt-3");
        second.messages = vec![message_create("m2", 600, 0, &[location::INBOX])];

        let (events, cache) = service_with(MockApi::new("evt-1", vec![first, second])).await;
        cache
            .last_updated()
            .update_event_id(USER, "evt-1")
            .await
            .unwrap();

        let outcome = events.process_events(USER).await.unwrap();
        assert_eq!(
            outcome,
            EventsOutcome::Applied {
                event_id: "evt-3".to_string()
            }
        );
        assert!(cache.store().message(USER, "m1").await.unwrap().is_some());
        assert!(cache.store().message(USER, "m2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn more_without_cursor_advance_terminates() {
        // One stalled batch queued; a second fetch would hit the empty mock
        // and fail, so completing proves the loop bailed out.
        let mut stalled = batch("");
        stalled.more = 1;
        stalled.messages = vec![message_create("m1", 500, 0, &[location::INBOX])];

        let (events, cache) = service_with(MockApi::new("evt-1", vec![stalled])).await;
        cache
            .last_updated()
            .update_event_id(USER, "evt-1")
            .await
            .unwrap();

        let outcome = events.process_events(USER).await.unwrap();
        assert_eq!(
            outcome,
            EventsOutcome::Applied {
                event_id: "evt-1".to_string()
            }
        );
        // The batch itself was still applied.
        assert!(cache.store().message(USER, "m1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn refresh_leaves_cursor_and_state_untouched() {
        let mut refresh = batch("evt-9");
        refresh.refresh = 1;
        refresh.messages = vec![message_create("m1", 500, 0, &[location::INBOX])];

        let (events, cache) = service_with(MockApi::new("evt-1", vec![refresh])).await;
        cache
            .last_updated()
            .update_event_id(USER, "evt-1")
            .await
            .unwrap();

        let outcome = events.process_events(USER).await.unwrap();
        assert_eq!(outcome, EventsOutcome::RefreshRequired);
        assert!(cache.store().message(USER, "m1").await.unwrap().is_none());
        assert_eq!(
            cache.last_updated().last_event_id(USER).await.unwrap().as_deref(),
            Some("evt-1")
        );
    }

    #[tokio::test]
    async fn legacy_label_event_fields_are_stripped() {
        let mut first = batch("evt-2");
        first.labels = vec![json!({
            "ID": "custom-1",
            "Action": event_action::CREATE,
            // Legacy top-level keys from the pre-v3 shape.
            "Type": "stale",
            "Order": "stale",
            "Label": {"ID": "custom-1", "Name": "Work", "Type": 2, "Order": 7},
        })];

        let (events, cache) = service_with(MockApi::new("evt-1", vec![first])).await;
        cache
            .last_updated()
            .update_event_id(USER, "evt-1")
            .await
            .unwrap();

        events.process_events(USER).await.unwrap();
        let label = cache.store().label(USER, "custom-1").await.unwrap().unwrap();
        assert_eq!(label.label_type, 2);
        assert_eq!(label.sort_order, 7);
    }

    #[tokio::test]
    async fn contact_events_round_trip() {
        let mut first = batch("evt-2");
        first.contacts = vec![json!({
            "ID": "c1",
            "Action": event_action::CREATE,
            "Contact": {
                "ID": "c1",
                "Name": "Alice",
                "ContactEmails": [{"ID": "e1", "Email": "alice@example.com"}],
            },
        })];
        let mut second = batch("evt-3");
        second.contacts = vec![json!({"ID": "c1", "Action": event_action::DELETE})];

        let (events, cache) = service_with(MockApi::new("evt-1", vec![first, second])).await;
        cache
            .last_updated()
            .update_event_id(USER, "evt-1")
            .await
            .unwrap();

        events.process_events(USER).await.unwrap();
        assert!(cache.store().contact(USER, "c1").await.unwrap().is_some());

        events.process_events(USER).await.unwrap();
        assert!(cache.store().contact(USER, "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reapplying_a_batch_is_idempotent() {
        let make_batch = || {
            let mut b = batch("evt-2");
            b.messages = vec![message_create("m1", 500, 1, &[location::INBOX])];
            b.message_counts = vec![crate::api::CountSnapshot {
                label_id: location::INBOX.to_string(),
                unread: 1,
                total: 1,
            }];
            b
        };
        let (events, cache) =
            service_with(MockApi::new("evt-1", vec![make_batch(), make_batch()])).await;
        cache
            .last_updated()
            .update_event_id(USER, "evt-1")
            .await
            .unwrap();

        events.process_events(USER).await.unwrap();
        events.process_events(USER).await.unwrap();

        assert!(cache.store().message(USER, "m1").await.unwrap().is_some());
        assert_eq!(
            cache
                .last_updated()
                .unread_count(location::INBOX, USER, ViewMode::SingleMessage)
                .await
                .unwrap(),
            1
        );
    }
}
