//! Error types for the catalog client.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// Provider asked for a longer pause than the bot tolerates.
    #[error("rate limited for {wait_secs}s, above the {limit_secs}s threshold")]
    RateLimitExceeded { wait_secs: u64, limit_secs: u64 },

    /// Access token rejected.
    #[error("authorization denied by provider: {body}")]
    Unauthorized { body: String },

    #[error("provider error (status {status}): {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to reach provider: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid provider response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid provider URL {url}: {reason}")]
    Url { url: String, reason: String },

    #[error("admission gate closed")]
    GateClosed,
}

impl CatalogError {
    /// Fatal errors abort the whole run instead of just the current fetch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CatalogError::RateLimitExceeded { .. } | CatalogError::Unauthorized { .. }
        )
    }
}

/// True when `err` carries a fatal [`CatalogError`] anywhere in its chain.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<CatalogError>())
        .any(CatalogError::is_fatal)
}
