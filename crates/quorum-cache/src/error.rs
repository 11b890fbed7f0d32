use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Snapshot payload is not valid JSON for key {key}: {source}")]
    Payload {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Snapshot store not available: {0}")]
    Unavailable(String),
}
