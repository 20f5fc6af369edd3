use crate::db::Store;
use crate::error::CacheError;
use crate::models::{LabelUpdate, ViewMode};
use sqlx::{Row, SqliteConnection};

/// Single source of truth for how much of each label has been synced and
/// what its unread/total counters currently are, plus the per-user event
/// cursor for incremental polling.
#[derive(Clone)]
pub struct LastUpdatedStore {
    store: Store,
}

impl LastUpdatedStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn last_update(
        &self,
        label_id: &str,
        user_id: &str,
        view_mode: ViewMode,
    ) -> Result<Option<LabelUpdate>, CacheError> {
        let record = sqlx::query_as::<_, LabelUpdate>(
            "SELECT label_id, user_id, view_mode, start_time, end_time, is_new,
                    unread_start, unread_end, is_unread_new, unread_count, total_count, updated_at
             FROM label_updates WHERE label_id = ? AND user_id = ? AND view_mode = ?",
        )
        .bind(label_id)
        .bind(user_id)
        .bind(view_mode.as_i64())
        .fetch_optional(self.store.pool())
        .await?;
        Ok(record)
    }

    /// Get-or-create: returns the stored record, persisting a zeroed one on
    /// first access. Idempotent.
    pub async fn last_update_default(
        &self,
        label_id: &str,
        user_id: &str,
        view_mode: ViewMode,
    ) -> Result<LabelUpdate, CacheError> {
        let mut conn = self.store.pool().acquire().await?;
        ensure_row(&mut conn, label_id, user_id, view_mode).await?;
        drop(conn);
        self.last_update(label_id, user_id, view_mode)
            .await
            .map(|r| r.unwrap_or_else(|| LabelUpdate::new(label_id, user_id, view_mode)))
    }

    pub async fn unread_count(
        &self,
        label_id: &str,
        user_id: &str,
        view_mode: ViewMode,
    ) -> Result<i64, CacheError> {
        Ok(self
            .last_update(label_id, user_id, view_mode)
            .await?
            .map(|r| r.unread_count)
            .unwrap_or(0))
    }

    /// Overwrite the unread counter (and total, when given). Negative input
    /// is clamped to zero, never stored.
    pub async fn update_unread_count(
        &self,
        label_id: &str,
        user_id: &str,
        unread: i64,
        total: Option<i64>,
        view_mode: ViewMode,
    ) -> Result<(), CacheError> {
        let unread = unread.max(0);
        let mut conn = self.store.pool().acquire().await?;
        ensure_row(&mut conn, label_id, user_id, view_mode).await?;
        match total {
            Some(total) => {
                sqlx::query(
                    "UPDATE label_updates SET unread_count = ?, total_count = ?
                     WHERE label_id = ? AND user_id = ? AND view_mode = ?",
                )
                .bind(unread)
                .bind(total)
                .bind(label_id)
                .bind(user_id)
                .bind(view_mode.as_i64())
                .execute(&mut *conn)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE label_updates SET unread_count = ?
                     WHERE label_id = ? AND user_id = ? AND view_mode = ?",
                )
                .bind(unread)
                .bind(label_id)
                .bind(user_id)
                .bind(view_mode.as_i64())
                .execute(&mut *conn)
                .await?;
            }
        }
        Ok(())
    }

    /// Record a fetched page's time window.
    ///
    /// Pagination walks backward in time, so `end_time` is the frontier: it
    /// only ever moves to an OLDER boundary. `start_time` is pinned on the
    /// first fetch (while the record is still new) and left alone afterwards,
    /// so a catch-up fetch cannot widen the window over already-synced newer
    /// data. Re-applying the same (start, end) pair is a no-op.
    pub async fn update_last_updated_time(
        &self,
        label_id: &str,
        user_id: &str,
        is_unread: bool,
        start_time: i64,
        end_time: i64,
        msg_count: i64,
        view_mode: ViewMode,
    ) -> Result<(), CacheError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.store.begin().await?;
        ensure_row(&mut tx, label_id, user_id, view_mode).await?;
        let record = fetch_row(&mut tx, label_id, user_id, view_mode).await?;

        if is_unread {
            let start = if record.is_unread_new {
                start_time
            } else {
                record.unread_start
            };
            let end = if record.is_unread_new
                || record.unread_end == 0
                || end_time < record.unread_end
            {
                end_time
            } else {
                record.unread_end
            };
            sqlx::query(
                "UPDATE label_updates
                 SET unread_start = ?, unread_end = ?, is_unread_new = 0, updated_at = ?
                 WHERE label_id = ? AND user_id = ? AND view_mode = ?",
            )
            .bind(start)
            .bind(end)
            .bind(now)
            .bind(label_id)
            .bind(user_id)
            .bind(view_mode.as_i64())
            .execute(&mut *tx)
            .await?;
        } else {
            let start = if record.is_new {
                start_time
            } else {
                record.start_time
            };
            let end = if record.is_new || record.end_time == 0 || end_time < record.end_time {
                end_time
            } else {
                record.end_time
            };
            sqlx::query(
                "UPDATE label_updates
                 SET start_time = ?, end_time = ?, is_new = 0, total_count = ?, updated_at = ?
                 WHERE label_id = ? AND user_id = ? AND view_mode = ?",
            )
            .bind(start)
            .bind(end)
            .bind(msg_count)
            .bind(now)
            .bind(label_id)
            .bind(user_id)
            .bind(view_mode.as_i64())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Teardown hook: zero every unread counter.
    pub async fn reset_unread_counts(&self) -> Result<(), CacheError> {
        sqlx::query("UPDATE label_updates SET unread_count = 0")
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    /// Full-reset support: sync windows and totals are dropped and must be
    /// rebuilt by the next fetch; unread counters are cheap to keep
    /// authoritative and survive the reset.
    pub async fn remove_update_time_except_unread(
        &self,
        user_id: &str,
        view_mode: ViewMode,
    ) -> Result<(), CacheError> {
        sqlx::query(
            "UPDATE label_updates
             SET start_time = 0, end_time = 0, is_new = 1,
                 unread_start = 0, unread_end = 0, is_unread_new = 1,
                 total_count = 0, updated_at = 0
             WHERE user_id = ? AND view_mode = ?",
        )
        .bind(user_id)
        .bind(view_mode.as_i64())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    pub async fn last_event_id(&self, user_id: &str) -> Result<Option<String>, CacheError> {
        let row = sqlx::query("SELECT event_id FROM user_events WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.store.pool())
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn update_event_id(&self, user_id: &str, event_id: &str) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO user_events (user_id, event_id) VALUES (?, ?)
             ON CONFLICT(user_id) DO UPDATE SET event_id = excluded.event_id",
        )
        .bind(user_id)
        .bind(event_id)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }
}

pub(crate) async fn ensure_row(
    conn: &mut SqliteConnection,
    label_id: &str,
    user_id: &str,
    view_mode: ViewMode,
) -> Result<(), CacheError> {
    sqlx::query(
        "INSERT OR IGNORE INTO label_updates (label_id, user_id, view_mode) VALUES (?, ?, ?)",
    )
    .bind(label_id)
    .bind(user_id)
    .bind(view_mode.as_i64())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn fetch_row(
    conn: &mut SqliteConnection,
    label_id: &str,
    user_id: &str,
    view_mode: ViewMode,
) -> Result<LabelUpdate, CacheError> {
    let record = sqlx::query_as::<_, LabelUpdate>(
        "SELECT label_id, user_id, view_mode, start_time, end_time, is_new,
                unread_start, unread_end, is_unread_new, unread_count, total_count, updated_at
         FROM label_updates WHERE label_id = ? AND user_id = ? AND view_mode = ?",
    )
    .bind(label_id)
    .bind(user_id)
    .bind(view_mode.as_i64())
    .fetch_one(&mut *conn)
    .await?;
    Ok(record)
}

/// Adjust a label's unread counter by `delta` for BOTH view modes inside the
/// caller's transaction, clamped at zero in SQL.
pub(crate) async fn apply_unread_delta(
    conn: &mut SqliteConnection,
    label_id: &str,
    user_id: &str,
    delta: i64,
) -> Result<(), CacheError> {
    for view_mode in ViewMode::ALL {
        ensure_row(conn, label_id, user_id, view_mode).await?;
        sqlx::query(
            "UPDATE label_updates SET unread_count = MAX(0, unread_count + ?)
             WHERE label_id = ? AND user_id = ? AND view_mode = ?",
        )
        .bind(delta)
        .bind(label_id)
        .bind(user_id)
        .bind(view_mode.as_i64())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
