use crate::cache::CacheService;
use crate::error::CacheError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

enum Mutation {
    Move {
        user_id: String,
        message_id: String,
        from_label: String,
        to_label: String,
        reply: oneshot::Sender<Result<bool, CacheError>>,
    },
    Mark {
        user_id: String,
        message_id: String,
        unread: bool,
        reply: oneshot::Sender<Result<bool, CacheError>>,
    },
    Delete {
        user_id: String,
        message_id: String,
        label_id: String,
        reply: oneshot::Sender<Result<bool, CacheError>>,
    },
    Label {
        user_id: String,
        message_ids: Vec<String>,
        label_id: String,
        apply: bool,
        reply: oneshot::Sender<Result<bool, CacheError>>,
    },
    CounterSync {
        user_id: String,
        label_id: String,
        plus: bool,
        reply: oneshot::Sender<Result<(), CacheError>>,
    },
}

/// Cloneable handle to the single writer task. Mutations are enqueued and
/// applied strictly serially in arrival order; reads go straight to the
/// store's pool. The task exits when the last handle is dropped.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Mutation>,
}

/// Spawn the writer task that owns all cache mutations.
pub fn spawn_writer(cache: CacheService) -> WriterHandle {
    let (tx, mut rx) = mpsc::channel::<Mutation>(64);
    tokio::spawn(async move {
        while let Some(mutation) = rx.recv().await {
            match mutation {
                Mutation::Move {
                    user_id,
                    message_id,
                    from_label,
                    to_label,
                    reply,
                } => {
                    let result = cache
                        .move_message(&user_id, &message_id, &from_label, &to_label)
                        .await;
                    let _ = reply.send(result);
                }
                Mutation::Mark {
                    user_id,
                    message_id,
                    unread,
                    reply,
                } => {
                    let result = cache.mark(&user_id, &message_id, unread).await;
                    let _ = reply.send(result);
                }
                Mutation::Delete {
                    user_id,
                    message_id,
                    label_id,
                    reply,
                } => {
                    let result = cache.delete_message(&user_id, &message_id, &label_id).await;
                    let _ = reply.send(result);
                }
                Mutation::Label {
                    user_id,
                    message_ids,
                    label_id,
                    apply,
                    reply,
                } => {
                    let result = cache
                        .label_messages(&user_id, &message_ids, &label_id, apply)
                        .await;
                    let _ = reply.send(result);
                }
                Mutation::CounterSync {
                    user_id,
                    label_id,
                    plus,
                    reply,
                } => {
                    let result = cache.update_counter_sync(&user_id, &label_id, plus).await;
                    let _ = reply.send(result);
                }
            }
        }
        debug!("cache writer shut down");
    });
    WriterHandle { tx }
}

impl WriterHandle {
    pub async fn move_message(
        &self,
        user_id: &str,
        message_id: &str,
        from_label: &str,
        to_label: &str,
    ) -> Result<bool, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Mutation::Move {
                user_id: user_id.to_string(),
                message_id: message_id.to_string(),
                from_label: from_label.to_string(),
                to_label: to_label.to_string(),
                reply,
            })
            .await
            .map_err(|_| CacheError::WriterStopped)?;
        rx.await.map_err(|_| CacheError::WriterStopped)?
    }

    pub async fn mark(
        &self,
        user_id: &str,
        message_id: &str,
        unread: bool,
    ) -> Result<bool, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Mutation::Mark {
                user_id: user_id.to_string(),
                message_id: message_id.to_string(),
                unread,
                reply,
            })
            .await
            .map_err(|_| CacheError::WriterStopped)?;
        rx.await.map_err(|_| CacheError::WriterStopped)?
    }

    pub async fn delete_message(
        &self,
        user_id: &str,
        message_id: &str,
        label_id: &str,
    ) -> Result<bool, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Mutation::Delete {
                user_id: user_id.to_string(),
                message_id: message_id.to_string(),
                label_id: label_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| CacheError::WriterStopped)?;
        rx.await.map_err(|_| CacheError::WriterStopped)?
    }

    pub async fn label_messages(
        &self,
        user_id: &str,
        message_ids: Vec<String>,
        label_id: &str,
        apply: bool,
    ) -> Result<bool, CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Mutation::Label {
                user_id: user_id.to_string(),
                message_ids,
                label_id: label_id.to_string(),
                apply,
                reply,
            })
            .await
            .map_err(|_| CacheError::WriterStopped)?;
        rx.await.map_err(|_| CacheError::WriterStopped)?
    }

    pub async fn update_counter_sync(
        &self,
        user_id: &str,
        label_id: &str,
        plus: bool,
    ) -> Result<(), CacheError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Mutation::CounterSync {
                user_id: user_id.to_string(),
                label_id: label_id.to_string(),
                plus,
                reply,
            })
            .await
            .map_err(|_| CacheError::WriterStopped)?;
        rx.await.map_err(|_| CacheError::WriterStopped)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::last_updated::LastUpdatedStore;
    use crate::models::{location, Message, ViewMode};
    use crate::testutil::memory_store;

    const USER: &str = "user-1";

    async fn writer() -> (WriterHandle, CacheService) {
        let store = memory_store().await;
        let cache = CacheService::new(store.clone(), LastUpdatedStore::new(store));
        (spawn_writer(cache.clone()), cache)
    }

    async fn seed_unread(cache: &CacheService, id: &str, label: &str) {
        let message = Message {
            id: id.to_string(),
            user_id: USER.to_string(),
            conversation_id: String::new(),
            subject: None,
            sender: None,
            to_list: None,
            body: None,
            time: 1000,
            unread: true,
            is_draft: false,
            is_sending: false,
            message_status: 1,
            message_type: 0,
        };
        let mut tx = cache.store().begin().await.unwrap();
        db::upsert_message(&mut tx, &message).await.unwrap();
        db::attach_label(&mut tx, id, label).await.unwrap();
        crate::last_updated::apply_unread_delta(&mut tx, label, USER, 1)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn mutations_flow_through_the_writer() {
        let (handle, cache) = writer().await;
        seed_unread(&cache, "m1", location::INBOX).await;

        assert!(handle.mark(USER, "m1", false).await.unwrap());
        assert!(
            handle
                .move_message(USER, "m1", location::INBOX, location::ARCHIVE)
                .await
                .unwrap()
        );
        assert!(
            handle
                .delete_message(USER, "m1", location::ARCHIVE)
                .await
                .unwrap()
        );
        assert!(cache.store().message(USER, "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_counter_mutations_apply_serially() {
        let (handle, cache) = writer().await;

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .update_counter_sync(USER, location::INBOX, true)
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(
            cache
                .last_updated()
                .unread_count(location::INBOX, USER, ViewMode::SingleMessage)
                .await
                .unwrap(),
            10
        );
    }
}
