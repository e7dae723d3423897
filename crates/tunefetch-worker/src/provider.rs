//! Catalog metadata resolution.

use async_trait::async_trait;
use thiserror::Error;

use tunefetch_models::{CatalogEntry, CatalogUrl};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Missing catalog credentials")]
    MissingCredentials,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Catalog API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected catalog response: {0}")]
    Decode(String),
}

/// Resolves a catalog URL into a named collection of tracks.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn resolve(&self, url: &CatalogUrl) -> Result<CatalogEntry, MetadataError>;
}
