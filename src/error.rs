use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("API error: {0}")]
    Api(String),
    #[error("No event cursor for user, bootstrap with FetchLatestEventId first")]
    EventIdRequired,
    #[error("Cache writer task stopped")]
    WriterStopped,
}
