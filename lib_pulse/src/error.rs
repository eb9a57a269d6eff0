//! # Error Types
//!
//! Error enums for the fallible edges of the stream: snapshot fetches, the
//! slice cache and the push channel. None of them is fatal to a process; each
//! caller logs and carries on with whatever state it already has.

use thiserror::Error;

/// Failure of one snapshot resource fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build request URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Resource {resource} answered HTTP {status}: {body}")]
    Status {
        resource: String,
        status: u16,
        body: String,
    },

    #[error("Resource {0} answered without a body")]
    EmptyBody(String),

    #[error("Failed to decode {resource}: {reason}")]
    Decode { resource: String, reason: String },
}

impl From<reqwest_middleware::Error> for FetchError {
    fn from(e: reqwest_middleware::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transport(e.to_string())
    }
}

/// Failure of the keyed slice store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis did not answer within {0:?}")]
    Unresponsive(std::time::Duration),

    #[error("Cache entry {key} is not valid JSON: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize slice {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of the push channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Push channel read error: {0}")]
    Read(String),
}
