// Error types for select query execution.

/// Errors surfaced by one select query. All variants are terminal for the
/// current query; nothing is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The inbound descriptor is malformed or incomplete. Raised before
    /// any remote call is made.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The select call could not be initiated.
    #[error("remote query unreachable: {0}")]
    RemoteQueryUnreachable(String),

    /// The event stream reported an error mid-execution.
    #[error("remote query failed: {0}")]
    RemoteQueryFailed(String),

    /// The streamed payload is not parseable as the expected row format.
    #[error("malformed query result: {0}")]
    MalformedResult(String),

    /// The time-enrichment query returned zero rows.
    #[error("unable to fetch time field")]
    TimeFieldUnavailable,

    /// The caller's cancellation signal fired during execution.
    #[error("query cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for select query operations.
pub type Result<T> = std::result::Result<T, Error>;
