use thiserror::Error;

/// Errors returned by the RapidPro API client.
#[derive(Debug, Error)]
pub enum RapidProError {
    /// Network or TLS failure from the underlying HTTP client, including
    /// non-2xx statuses.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Client misconfiguration, e.g. an unparseable base URL.
    #[error("RapidPro client error: {0}")]
    Client(String),

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}
