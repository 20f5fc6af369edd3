use crate::error::CacheError;
use crate::models::{self, Contact, ContactEmail, Label, Message};
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};

/// Thin adapter over the SQLite pool. Reads run on the pool directly;
/// multi-statement mutations go through `begin()` and the module-level
/// helpers so entity and counter writes commit together.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn new(database_url: &str) -> Result<Self, CacheError> {
        use sqlx::sqlite::SqliteConnectOptions;
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(CacheError::Database)?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), CacheError> {
        let schema = include_str!("../schema.sql");
        for statement in schema.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, CacheError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn message(&self, user_id: &str, id: &str) -> Result<Option<Message>, CacheError> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT id, user_id, conversation_id, subject, sender, to_list, body, time, unread,
                    is_draft, is_sending, message_status, message_type
             FROM messages WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(message)
    }

    pub async fn labels_for_message(&self, message_id: &str) -> Result<Vec<String>, CacheError> {
        let rows = sqlx::query("SELECT label_id FROM message_labels WHERE message_id = ?")
            .bind(message_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    pub async fn messages_by_label(
        &self,
        user_id: &str,
        label_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, CacheError> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT m.id, m.user_id, m.conversation_id, m.subject, m.sender, m.to_list, m.body,
                    m.time, m.unread, m.is_draft, m.is_sending, m.message_status, m.message_type
             FROM messages m
             JOIN message_labels ml ON m.id = ml.message_id
             WHERE m.user_id = ? AND ml.label_id = ?
             ORDER BY m.time DESC
             LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(label_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    pub async fn message_count_by_label(
        &self,
        user_id: &str,
        label_id: &str,
    ) -> Result<i64, CacheError> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM messages m
             JOIN message_labels ml ON m.id = ml.message_id
             WHERE m.user_id = ? AND ml.label_id = ?",
        )
        .bind(user_id)
        .bind(label_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get(0))
    }

    pub async fn label(&self, user_id: &str, id: &str) -> Result<Option<Label>, CacheError> {
        let label = sqlx::query_as::<_, Label>(
            "SELECT id, user_id, name, color, label_type, sort_order, parent_id, is_soft_deleted
             FROM labels WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(label)
    }

    pub async fn labels(&self, user_id: &str) -> Result<Vec<Label>, CacheError> {
        let labels = sqlx::query_as::<_, Label>(
            "SELECT id, user_id, name, color, label_type, sort_order, parent_id, is_soft_deleted
             FROM labels WHERE user_id = ? AND is_soft_deleted = 0
             ORDER BY sort_order ASC, name ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(labels)
    }

    pub async fn contact(&self, user_id: &str, id: &str) -> Result<Option<Contact>, CacheError> {
        let contact = sqlx::query_as::<_, Contact>(
            "SELECT id, user_id, name, cards, is_soft_deleted
             FROM contacts WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(contact)
    }

    pub async fn emails_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Vec<ContactEmail>, CacheError> {
        let emails = sqlx::query_as::<_, ContactEmail>(
            "SELECT id, contact_id, user_id, address, is_default, sort_order
             FROM contact_emails WHERE contact_id = ?
             ORDER BY sort_order ASC",
        )
        .bind(contact_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(emails)
    }
}

pub(crate) async fn upsert_message(
    conn: &mut SqliteConnection,
    message: &Message,
) -> Result<(), CacheError> {
    sqlx::query(
        "INSERT INTO messages (id, user_id, conversation_id, subject, sender, to_list, body,
                               time, unread, is_draft, is_sending, message_status, message_type)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             conversation_id = excluded.conversation_id,
             subject = excluded.subject,
             sender = excluded.sender,
             to_list = excluded.to_list,
             body = COALESCE(excluded.body, messages.body),
             time = excluded.time,
             unread = excluded.unread,
             is_draft = excluded.is_draft,
             message_status = excluded.message_status,
             message_type = excluded.message_type",
    )
    .bind(&message.id)
    .bind(&message.user_id)
    .bind(&message.conversation_id)
    .bind(&message.subject)
    .bind(&message.sender)
    .bind(&message.to_list)
    .bind(&message.body)
    .bind(message.time)
    .bind(message.unread)
    .bind(message.is_draft)
    .bind(message.is_sending)
    .bind(message.message_status)
    .bind(message.message_type)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn message_for_update(
    conn: &mut SqliteConnection,
    user_id: &str,
    id: &str,
) -> Result<Option<Message>, CacheError> {
    let message = sqlx::query_as::<_, Message>(
        "SELECT id, user_id, conversation_id, subject, sender, to_list, body, time, unread,
                is_draft, is_sending, message_status, message_type
         FROM messages WHERE id = ? AND user_id = ?",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(message)
}

pub(crate) async fn labels_on_message(
    conn: &mut SqliteConnection,
    message_id: &str,
) -> Result<Vec<String>, CacheError> {
    let rows = sqlx::query("SELECT label_id FROM message_labels WHERE message_id = ?")
        .bind(message_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(|r| r.get(0)).collect())
}

pub(crate) async fn attach_label(
    conn: &mut SqliteConnection,
    message_id: &str,
    label_id: &str,
) -> Result<bool, CacheError> {
    let result =
        sqlx::query("INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES (?, ?)")
            .bind(message_id)
            .bind(label_id)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn detach_label(
    conn: &mut SqliteConnection,
    message_id: &str,
    label_id: &str,
) -> Result<bool, CacheError> {
    let result = sqlx::query("DELETE FROM message_labels WHERE message_id = ? AND label_id = ?")
        .bind(message_id)
        .bind(label_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn detach_all_labels(
    conn: &mut SqliteConnection,
    message_id: &str,
) -> Result<(), CacheError> {
    sqlx::query("DELETE FROM message_labels WHERE message_id = ?")
        .bind(message_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn set_unread(
    conn: &mut SqliteConnection,
    message_id: &str,
    unread: bool,
) -> Result<(), CacheError> {
    sqlx::query("UPDATE messages SET unread = ? WHERE id = ?")
        .bind(unread)
        .bind(message_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn delete_message(
    conn: &mut SqliteConnection,
    message_id: &str,
) -> Result<(), CacheError> {
    sqlx::query("DELETE FROM message_labels WHERE message_id = ?")
        .bind(message_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM messages WHERE id = ?")
        .bind(message_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn upsert_label(
    conn: &mut SqliteConnection,
    label: &Label,
) -> Result<(), CacheError> {
    sqlx::query(
        "INSERT INTO labels (id, user_id, name, color, label_type, sort_order, parent_id,
                             is_soft_deleted)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             color = excluded.color,
             label_type = excluded.label_type,
             sort_order = excluded.sort_order,
             parent_id = excluded.parent_id,
             is_soft_deleted = excluded.is_soft_deleted",
    )
    .bind(&label.id)
    .bind(&label.user_id)
    .bind(&label.name)
    .bind(&label.color)
    .bind(label.label_type)
    .bind(label.sort_order)
    .bind(&label.parent_id)
    .bind(label.is_soft_deleted)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete_label(
    conn: &mut SqliteConnection,
    user_id: &str,
    label_id: &str,
) -> Result<(), CacheError> {
    sqlx::query("DELETE FROM message_labels WHERE label_id = ?")
        .bind(label_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM labels WHERE id = ? AND user_id = ?")
        .bind(label_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM label_updates WHERE label_id = ? AND user_id = ?")
        .bind(label_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn upsert_contact(
    conn: &mut SqliteConnection,
    contact: &Contact,
) -> Result<(), CacheError> {
    sqlx::query(
        "INSERT INTO contacts (id, user_id, name, cards, is_soft_deleted)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             cards = COALESCE(excluded.cards, contacts.cards),
             is_soft_deleted = excluded.is_soft_deleted",
    )
    .bind(&contact.id)
    .bind(&contact.user_id)
    .bind(&contact.name)
    .bind(&contact.cards)
    .bind(contact.is_soft_deleted)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn delete_contact(
    conn: &mut SqliteConnection,
    user_id: &str,
    contact_id: &str,
) -> Result<(), CacheError> {
    sqlx::query("DELETE FROM contact_emails WHERE contact_id = ?")
        .bind(contact_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM contacts WHERE id = ? AND user_id = ?")
        .bind(contact_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn delete_all_contacts(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<(), CacheError> {
    sqlx::query("DELETE FROM contact_emails WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM contacts WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn replace_contact_emails(
    conn: &mut SqliteConnection,
    contact_id: &str,
    emails: &[ContactEmail],
) -> Result<(), CacheError> {
    sqlx::query("DELETE FROM contact_emails WHERE contact_id = ?")
        .bind(contact_id)
        .execute(&mut *conn)
        .await?;
    for email in emails {
        sqlx::query(
            "INSERT INTO contact_emails (id, contact_id, user_id, address, is_default, sort_order)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&email.id)
        .bind(&email.contact_id)
        .bind(&email.user_id)
        .bind(&email.address)
        .bind(email.is_default)
        .bind(email.sort_order)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn delete_review_messages(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<u64, CacheError> {
    sqlx::query(
        "DELETE FROM message_labels WHERE message_id IN (
             SELECT id FROM messages WHERE user_id = ? AND message_type = ?
         )",
    )
    .bind(user_id)
    .bind(models::MESSAGE_TYPE_REVIEW)
    .execute(&mut *conn)
    .await?;
    let result = sqlx::query("DELETE FROM messages WHERE user_id = ? AND message_type = ?")
        .bind(user_id)
        .bind(models::MESSAGE_TYPE_REVIEW)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn delete_drafts(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<u64, CacheError> {
    sqlx::query(
        "DELETE FROM message_labels WHERE message_id IN (
             SELECT id FROM messages WHERE user_id = ? AND is_draft = 1
         )",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    let result = sqlx::query("DELETE FROM messages WHERE user_id = ? AND is_draft = 1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn delete_messages_older_than(
    conn: &mut SqliteConnection,
    user_id: &str,
    label_id: &str,
    cutoff: i64,
) -> Result<u64, CacheError> {
    let result = sqlx::query(
        "DELETE FROM messages WHERE user_id = ? AND time < ? AND id IN (
             SELECT message_id FROM message_labels WHERE label_id = ?
         )",
    )
    .bind(user_id)
    .bind(cutoff)
    .bind(label_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM message_labels WHERE message_id NOT IN (SELECT id FROM messages)")
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
