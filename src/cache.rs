use crate::api::{ContactsResponse, MessagesResponse, RemoteContact, RemoteLabel, RemoteMessage};
use crate::db::{self, Store};
use crate::error::CacheError;
use crate::last_updated::{self, LastUpdatedStore};
use crate::models::{location, Contact, Label, ViewMode};
use tracing::{debug, warn};

/// Result of ingesting one page of server messages. Malformed entries are
/// rejected individually; their well-formed siblings still land.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageOutcome {
    pub persisted: usize,
    pub rejected: usize,
}

/// Applies a single mutation atomically against the persisted store and the
/// counter bookkeeping. Every operation runs in one transaction so the entity
/// change and its counter adjustment commit together or not at all.
#[derive(Clone)]
pub struct CacheService {
    store: Store,
    last_updated: LastUpdatedStore,
}

impl CacheService {
    pub fn new(store: Store, last_updated: LastUpdatedStore) -> Self {
        Self {
            store,
            last_updated,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn last_updated(&self) -> &LastUpdatedStore {
        &self.last_updated
    }

    /// Move a message between labels. Returns false when the message cannot
    /// be resolved. Moving to trash or spam forces the message read; the
    /// unread contribution is then removed from every label the message still
    /// carries, not just the source.
    pub async fn move_message(
        &self,
        user_id: &str,
        message_id: &str,
        from_label: &str,
        to_label: &str,
    ) -> Result<bool, CacheError> {
        let mut tx = self.store.begin().await?;
        let Some(message) = db::message_for_update(&mut tx, user_id, message_id).await? else {
            return Ok(false);
        };

        let removed = db::detach_label(&mut tx, message_id, from_label).await?;
        let force_read = to_label == location::TRASH || to_label == location::SPAM;
        if message.unread {
            if removed {
                last_updated::apply_unread_delta(&mut tx, from_label, user_id, -1).await?;
            }
            if force_read {
                db::set_unread(&mut tx, message_id, false).await?;
                for label_id in db::labels_on_message(&mut tx, message_id).await? {
                    last_updated::apply_unread_delta(&mut tx, &label_id, user_id, -1).await?;
                }
            }
        }

        let attached = db::attach_label(&mut tx, message_id, to_label).await?;
        if message.unread && !force_read && attached {
            last_updated::apply_unread_delta(&mut tx, to_label, user_id, 1).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Toggle the read flag. Idempotent: a no-op flip still reports success
    /// and leaves every counter untouched. A real flip adjusts the counter of
    /// every label the message carries.
    pub async fn mark(
        &self,
        user_id: &str,
        message_id: &str,
        unread: bool,
    ) -> Result<bool, CacheError> {
        let mut tx = self.store.begin().await?;
        let Some(message) = db::message_for_update(&mut tx, user_id, message_id).await? else {
            return Ok(false);
        };
        if message.unread == unread {
            return Ok(true);
        }

        db::set_unread(&mut tx, message_id, unread).await?;
        let delta = if unread { 1 } else { -1 };
        for label_id in db::labels_on_message(&mut tx, message_id).await? {
            last_updated::apply_unread_delta(&mut tx, &label_id, user_id, delta).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Remove a message from the store, decrementing the source label's
    /// unread counter when it was unread.
    pub async fn delete_message(
        &self,
        user_id: &str,
        message_id: &str,
        label_id: &str,
    ) -> Result<bool, CacheError> {
        let mut tx = self.store.begin().await?;
        let Some(message) = db::message_for_update(&mut tx, user_id, message_id).await? else {
            return Ok(false);
        };
        if message.unread {
            last_updated::apply_unread_delta(&mut tx, label_id, user_id, -1).await?;
        }
        db::delete_message(&mut tx, message_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Event-stream delete: the entry names no label, so the unread
    /// contribution is removed from every label the message carries before
    /// the row goes away.
    pub async fn remove_message(&self, user_id: &str, message_id: &str) -> Result<bool, CacheError> {
        let mut tx = self.store.begin().await?;
        let Some(message) = db::message_for_update(&mut tx, user_id, message_id).await? else {
            return Ok(false);
        };
        if message.unread {
            for label_id in db::labels_on_message(&mut tx, message_id).await? {
                last_updated::apply_unread_delta(&mut tx, &label_id, user_id, -1).await?;
            }
        }
        db::delete_message(&mut tx, message_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Event-stream create/update: primary-key upsert plus wholesale label
    /// replacement. Counters are NOT adjusted here; the event payload carries
    /// authoritative count snapshots that land separately. The mid-send guard
    /// applies the same as on the page path.
    pub async fn apply_message_event(
        &self,
        user_id: &str,
        remote: RemoteMessage,
    ) -> Result<(), CacheError> {
        let mut tx = self.store.begin().await?;
        if let Some(existing) = db::message_for_update(&mut tx, user_id, &remote.id).await? {
            if existing.is_sending {
                debug!(message_id = %remote.id, "skipping event update of mid-send message");
                return Ok(());
            }
        }
        let label_ids = remote.label_ids.clone();
        let message = remote.into_message(user_id);
        db::upsert_message(&mut tx, &message).await?;
        if !label_ids.is_empty() {
            db::detach_all_labels(&mut tx, &message.id).await?;
            for label_id in &label_ids {
                db::attach_label(&mut tx, &message.id, label_id).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Add or remove one label across a batch of messages in one
    /// transaction. Returns false when any message could not be resolved;
    /// the rest of the batch is still applied.
    pub async fn label_messages(
        &self,
        user_id: &str,
        message_ids: &[String],
        label_id: &str,
        apply: bool,
    ) -> Result<bool, CacheError> {
        let mut all_resolved = true;
        let mut tx = self.store.begin().await?;
        for message_id in message_ids {
            let Some(message) = db::message_for_update(&mut tx, user_id, message_id).await? else {
                all_resolved = false;
                continue;
            };
            let changed = if apply {
                db::attach_label(&mut tx, message_id, label_id).await?
            } else {
                db::detach_label(&mut tx, message_id, label_id).await?
            };
            if changed && message.unread {
                let delta = if apply { 1 } else { -1 };
                last_updated::apply_unread_delta(&mut tx, label_id, user_id, delta).await?;
            }
        }
        tx.commit().await?;
        Ok(all_resolved)
    }

    /// Detach specific labels from a message; with `clean_unread` the unread
    /// contribution is removed from each detached label's counter as well.
    pub async fn remove_label(
        &self,
        user_id: &str,
        message_id: &str,
        labels: &[String],
        clean_unread: bool,
    ) -> Result<(), CacheError> {
        let mut tx = self.store.begin().await?;
        let Some(message) = db::message_for_update(&mut tx, user_id, message_id).await? else {
            return Ok(());
        };
        for label_id in labels {
            let removed = db::detach_label(&mut tx, message_id, label_id).await?;
            if removed && clean_unread && message.unread {
                last_updated::apply_unread_delta(&mut tx, label_id, user_id, -1).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// ±1 on a label's unread counter for both view modes, clamped at zero.
    pub async fn update_counter_sync(
        &self,
        user_id: &str,
        label_id: &str,
        plus: bool,
    ) -> Result<(), CacheError> {
        let delta = if plus { 1 } else { -1 };
        let mut tx = self.store.begin().await?;
        last_updated::apply_unread_delta(&mut tx, label_id, user_id, delta).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Ingest one page of server messages for a label. A message currently
    /// mid-send is never overwritten by this path; the send pipeline owns it
    /// until the send settles. On success the label's sync window is advanced
    /// with the page's declared bounds.
    pub async fn parse_messages_response(
        &self,
        user_id: &str,
        label_id: &str,
        is_unread: bool,
        response: &MessagesResponse,
    ) -> Result<PageOutcome, CacheError> {
        let mut outcome = PageOutcome::default();
        let mut newest = i64::MIN;
        let mut oldest = i64::MAX;

        let mut tx = self.store.begin().await?;
        for raw in &response.messages {
            let remote: RemoteMessage = match serde_json::from_value(raw.clone()) {
                Ok(remote) => remote,
                Err(err) => {
                    warn!(error = %err, "rejecting malformed message entry");
                    outcome.rejected += 1;
                    continue;
                }
            };
            newest = newest.max(remote.time);
            oldest = oldest.min(remote.time);

            if let Some(existing) = db::message_for_update(&mut tx, user_id, &remote.id).await? {
                if existing.is_sending {
                    debug!(message_id = %remote.id, "skipping refresh of mid-send message");
                    continue;
                }
            }

            let label_ids = remote.label_ids.clone();
            let message = remote.into_message(user_id);
            db::upsert_message(&mut tx, &message).await?;
            db::attach_label(&mut tx, &message.id, label_id).await?;
            for attached in &label_ids {
                db::attach_label(&mut tx, &message.id, attached).await?;
            }
            outcome.persisted += 1;
        }
        tx.commit().await?;

        if newest != i64::MIN {
            let total = if response.total > 0 {
                response.total
            } else {
                outcome.persisted as i64
            };
            self.last_updated
                .update_last_updated_time(
                    label_id,
                    user_id,
                    is_unread,
                    newest,
                    oldest,
                    total,
                    ViewMode::SingleMessage,
                )
                .await?;
        }
        debug!(
            label_id,
            persisted = outcome.persisted,
            rejected = outcome.rejected,
            "parsed message page"
        );
        Ok(outcome)
    }

    /// Ingest a contacts API response. Malformed entries are skipped;
    /// well-formed siblings are still written.
    pub async fn add_new_contacts(
        &self,
        user_id: &str,
        response: &ContactsResponse,
    ) -> Result<Vec<Contact>, CacheError> {
        let mut written = Vec::new();
        let mut tx = self.store.begin().await?;
        for raw in &response.contacts {
            let remote: RemoteContact = match serde_json::from_value(raw.clone()) {
                Ok(remote) => remote,
                Err(err) => {
                    warn!(error = %err, "rejecting malformed contact entry");
                    continue;
                }
            };
            let (contact, emails) = remote.into_entities(user_id);
            db::upsert_contact(&mut tx, &contact).await?;
            db::replace_contact_emails(&mut tx, &contact.id, &emails).await?;
            written.push(contact);
        }
        tx.commit().await?;
        Ok(written)
    }

    pub async fn update_contact(
        &self,
        user_id: &str,
        raw: &serde_json::Value,
    ) -> Result<Contact, CacheError> {
        let remote: RemoteContact = serde_json::from_value(raw.clone())?;
        let (contact, emails) = remote.into_entities(user_id);
        let mut tx = self.store.begin().await?;
        db::upsert_contact(&mut tx, &contact).await?;
        db::replace_contact_emails(&mut tx, &contact.id, &emails).await?;
        tx.commit().await?;
        Ok(contact)
    }

    /// Same shape as `update_contact`, used for the detail fetch whose
    /// response carries the full card payloads.
    pub async fn update_contact_detail(
        &self,
        user_id: &str,
        raw: &serde_json::Value,
    ) -> Result<Contact, CacheError> {
        self.update_contact(user_id, raw).await
    }

    /// Drop every cached contact for the user ahead of a clean resync.
    pub async fn purge_contacts(&self, user_id: &str) -> Result<(), CacheError> {
        let mut tx = self.store.begin().await?;
        db::delete_all_contacts(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_contact(&self, user_id: &str, contact_id: &str) -> Result<(), CacheError> {
        let mut tx = self.store.begin().await?;
        db::delete_contact(&mut tx, user_id, contact_id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn add_new_label(
        &self,
        user_id: &str,
        raw: &serde_json::Value,
    ) -> Result<Label, CacheError> {
        let remote: RemoteLabel = serde_json::from_value(raw.clone())?;
        let label = remote.into_label(user_id);
        let mut tx = self.store.begin().await?;
        db::upsert_label(&mut tx, &label).await?;
        tx.commit().await?;
        Ok(label)
    }

    pub async fn update_label(
        &self,
        user_id: &str,
        raw: &serde_json::Value,
    ) -> Result<Label, CacheError> {
        self.add_new_label(user_id, raw).await
    }

    /// Drops the label, its join rows, and its sync bookkeeping.
    pub async fn delete_label(&self, user_id: &str, label_id: &str) -> Result<(), CacheError> {
        let mut tx = self.store.begin().await?;
        db::delete_label(&mut tx, user_id, label_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Purge transient review placeholders so they never leak into lists.
    pub async fn clean_review_items(&self, user_id: &str) -> Result<u64, CacheError> {
        let mut tx = self.store.begin().await?;
        let purged = db::delete_review_messages(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(purged)
    }

    pub async fn purge_drafts(&self, user_id: &str) -> Result<u64, CacheError> {
        let mut tx = self.store.begin().await?;
        let purged = db::delete_drafts(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(purged)
    }
}
