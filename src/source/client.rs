use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::util::{read_limited_bytes, BodyError};

const POSTS_TIMEOUT: Duration = Duration::from_secs(20);
const MEDIA_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_LISTING_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_MEDIA_SIZE: usize = 1024 * 1024;

/// Posts requested per source per run.
pub const PAGE_SIZE: u32 = 10;

/// Path shapes tried against a source's base URL, in order.
const CANDIDATE_PATHS: [&str; 3] = ["/posts", "/wp/v2/posts", "/wp-json/wp/v2/posts"];

/// A post as returned by a source. Lives for one run only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePost {
    pub remote_id: u64,
    pub slug: String,
    pub title: String,
    pub content_html: String,
    /// `None` when the source reports no featured media (or id 0).
    pub featured_media_id: Option<u64>,
}

#[derive(Deserialize)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

/// Missing `id` and `slug` are tolerated: such posts import with remote id 0
/// and a slug derived from the title.
#[derive(Deserialize)]
struct WirePost {
    id: Option<u64>,
    slug: Option<String>,
    title: Option<Rendered>,
    content: Option<Rendered>,
    #[serde(default)]
    featured_media: Option<u64>,
}

impl From<WirePost> for RemotePost {
    fn from(wire: WirePost) -> Self {
        let title = wire.title.map(|t| t.rendered).unwrap_or_default();
        Self {
            remote_id: wire.id.unwrap_or_default(),
            slug: wire.slug.unwrap_or_default(),
            title: html_escape::decode_html_entities(&title).into_owned(),
            content_html: wire.content.map(|c| c.rendered).unwrap_or_default(),
            featured_media_id: wire.featured_media.filter(|&id| id != 0),
        }
    }
}

/// Why a single candidate URL yielded nothing.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Connection, DNS or TLS failure
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded its deadline
    #[error("Request timed out")]
    Timeout,
    /// Non-2xx response
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error(transparent)]
    Body(#[from] BodyError),
    /// Body was not JSON, or not the expected shape
    #[error("Unexpected response: {0}")]
    Shape(String),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Read-only client for remote WordPress-style REST sources.
#[derive(Debug, Clone)]
pub struct SourceClient {
    http: reqwest::Client,
}

impl SourceClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Fetches the newest posts from a source.
    ///
    /// Tries each candidate URL shape in turn and stops at the first one
    /// that answers with a JSON array. Never fails: when every candidate
    /// fails the result is empty. Array elements that are not post objects
    /// are dropped.
    pub async fn fetch_posts(&self, base_url: &str) -> Vec<RemotePost> {
        let base = base_url.trim().trim_end_matches('/');
        for path in CANDIDATE_PATHS {
            let candidate = format!("{base}{path}");
            match self.fetch_listing(&candidate).await {
                Ok(items) => {
                    let total = items.len();
                    let posts: Vec<RemotePost> = items
                        .into_iter()
                        .filter_map(|item| serde_json::from_value::<WirePost>(item).ok())
                        .map(RemotePost::from)
                        .collect();
                    if posts.len() < total {
                        tracing::warn!(
                            source = %candidate,
                            skipped = total - posts.len(),
                            "Skipped malformed post objects"
                        );
                    }
                    tracing::debug!(source = %candidate, posts = posts.len(), "Fetched posts");
                    return posts;
                }
                Err(e) => {
                    tracing::debug!(source = %candidate, error = %e, "Candidate endpoint failed");
                }
            }
        }
        tracing::warn!(source = %base, "No candidate endpoint returned a post list");
        Vec::new()
    }

    async fn fetch_listing(&self, candidate: &str) -> Result<Vec<Value>, SourceError> {
        let mut url = url::Url::parse(candidate)?;
        url.query_pairs_mut()
            .append_pair("per_page", &PAGE_SIZE.to_string());

        let json = self.get_json(url, POSTS_TIMEOUT, MAX_LISTING_SIZE).await?;
        match json {
            Value::Array(items) => Ok(items),
            other => Err(SourceError::Shape(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Resolves a featured media id to the image's `source_url`.
    pub async fn media_url(&self, base_url: &str, media_id: u64) -> Option<String> {
        let base = base_url.trim().trim_end_matches('/');
        match self.fetch_media(base, media_id).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::debug!(source = %base, media_id, error = %e, "Failed to resolve featured media");
                None
            }
        }
    }

    async fn fetch_media(&self, base: &str, media_id: u64) -> Result<String, SourceError> {
        let url = url::Url::parse(&format!("{base}/wp/v2/media/{media_id}"))?;
        let json = self.get_json(url, MEDIA_TIMEOUT, MAX_MEDIA_SIZE).await?;
        json.get("source_url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SourceError::Shape("media object has no source_url".into()))
    }

    async fn get_json(
        &self,
        url: url::Url,
        timeout: Duration,
        limit: usize,
    ) -> Result<Value, SourceError> {
        let response = tokio::time::timeout(timeout, self.http.get(url).send())
            .await
            .map_err(|_| SourceError::Timeout)??;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }

        let bytes = tokio::time::timeout(timeout, read_limited_bytes(response, limit))
            .await
            .map_err(|_| SourceError::Timeout)??;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Shape(e.to_string()))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
