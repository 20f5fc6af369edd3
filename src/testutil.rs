use crate::db::Store;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

/// In-memory store for tests. A single long-lived connection, otherwise each
/// pooled connection would see its own empty database.
pub(crate) async fn memory_store() -> Store {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    let store = Store::from_pool(pool);
    store.run_migrations().await.unwrap();
    store
}
