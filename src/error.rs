use std::time::Duration;

use thiserror::Error;

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid repository format.
    #[error("Invalid repository format: expected 'owner/repo', got '{0}'")]
    InvalidRepo(String),

    /// Invalid base URL.
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// The tracked repositories file could not be read or parsed.
    #[error("Invalid configuration in '{path}': {message}")]
    Config { path: String, message: String },

    /// A credential needed to deliver notifications was not supplied.
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Reading or writing persisted state failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors fetching releases for a single repository.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Error making HTTP request to GitHub API.
    #[error("Failed to fetch releases from GitHub: {0}")]
    Http(#[source] reqwest::Error),

    /// The request did not complete within the configured timeout.
    #[error("GitHub request timed out after {0:?}")]
    Timeout(Duration),

    /// GitHub API returned an error status.
    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Error parsing JSON response.
    #[error("Failed to parse GitHub API response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors delivering a notification to the channel.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Failed to reach the Telegram API: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error: {status} - {description}")]
    Api { status: u16, description: String },

    /// Telegram asked us to back off for longer than we are willing to wait.
    #[error("Telegram rate limit hit, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
}

/// Errors reading or writing the state files.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to replace '{path}': {source}")]
    Persist {
        path: String,
        #[source]
        source: tempfile::PersistError,
    },
}

/// Result type alias for relpoll operations.
pub type Result<T> = std::result::Result<T, Error>;
