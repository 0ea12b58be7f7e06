//! Where imported posts are published.
//!
//! [`PostStore`] is the seam between the pipeline and the content-management
//! site; [`WordPressPostStore`] implements it over the WordPress REST API.

mod wordpress;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub use wordpress::WordPressPostStore;

use crate::util::BodyError;

/// Post-meta key holding the source's post id.
pub const META_REMOTE_ID: &str = "_autosync_remote_id";
/// Post-meta key holding the source URL.
pub const META_SOURCE_URL: &str = "_autosync_source_url";

/// A post ready to be created on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub slug: String,
    pub status: String,
    pub author_id: Option<u64>,
    pub category_id: Option<u64>,
}

#[derive(Debug, Error)]
pub enum PostStoreError {
    /// Connection, DNS or TLS failure
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded its deadline
    #[error("Request timed out")]
    Timeout,
    /// Target answered with a non-2xx status
    #[error("HTTP status {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Success response without an `id`
    #[error("Response has no object id")]
    MissingId,
    /// Reading the staged upload failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    /// `[target]` is incomplete
    #[error("Target not configured: {0}")]
    NotConfigured(&'static str),
}

/// Local post storage used by the pipeline.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Creates a post and returns its id.
    async fn create_post(&self, post: &NewPost) -> Result<u64, PostStoreError>;

    /// Records which remote post a local post came from.
    async fn set_remote_meta(&self, post_id: u64, remote_id: u64, source_url: &str) -> Result<(), PostStoreError>;

    async fn update_content(&self, post_id: u64, content: &str) -> Result<(), PostStoreError>;

    /// Uploads `file` as an attachment of `post_id`, sets it as the featured
    /// image and returns the attachment id.
    async fn attach_featured_image(&self, post_id: u64, file: &Path, filename: &str) -> Result<u64, PostStoreError>;
}
