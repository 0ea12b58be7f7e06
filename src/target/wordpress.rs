use async_trait::async_trait;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use super::{NewPost, PostStore, PostStoreError, META_REMOTE_ID, META_SOURCE_URL};
use crate::config::TargetConfig;
use crate::util::read_limited_bytes;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RESPONSE_SIZE: usize = 2 * 1024 * 1024;

/// WordPress REST client authenticated with an application password.
pub struct WordPressPostStore {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: SecretString,
}

impl std::fmt::Debug for WordPressPostStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordPressPostStore")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl WordPressPostStore {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            username: username.into(),
            password,
        }
    }

    /// Builds a client from `[target]`; all of base URL, username and
    /// application password must be set.
    pub fn from_config(http: reqwest::Client, target: &TargetConfig) -> Result<Self, PostStoreError> {
        if target.base_url.trim().is_empty() {
            return Err(PostStoreError::NotConfigured("base_url"));
        }
        if target.username.trim().is_empty() {
            return Err(PostStoreError::NotConfigured("username"));
        }
        let password = target
            .application_password
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(PostStoreError::NotConfigured("application_password"))?;
        Ok(Self::new(
            http,
            target.base_url.as_str(),
            target.username.trim(),
            SecretString::from(password.to_string()),
        ))
    }

    fn endpoint(&self, path: &str) -> Result<url::Url, PostStoreError> {
        Ok(url::Url::parse(&format!("{}/wp-json/wp/v2/{}", self.base_url, path))?)
    }

    async fn post_json(&self, url: url::Url, body: &Value) -> Result<Value, PostStoreError> {
        let request = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(body)?);
        self.send(request, REQUEST_TIMEOUT).await
    }

    async fn send(&self, request: reqwest::RequestBuilder, timeout: Duration) -> Result<Value, PostStoreError> {
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| PostStoreError::Timeout)??;
        let status = response.status();
        let bytes = tokio::time::timeout(timeout, read_limited_bytes(response, MAX_RESPONSE_SIZE))
            .await
            .map_err(|_| PostStoreError::Timeout)??;

        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(PostStoreError::HttpStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn set_featured(&self, post_id: u64, media_id: u64) -> Result<(), PostStoreError> {
        let body = json!({ "featured_media": media_id });
        self.post_json(self.endpoint(&format!("posts/{post_id}"))?, &body)
            .await?;
        Ok(())
    }

    /// Permanently deletes an uploaded attachment, logging the outcome.
    async fn delete_media(&self, media_id: u64) {
        match self.try_delete_media(media_id).await {
            Ok(()) => tracing::debug!(media_id, "Removed orphaned attachment"),
            Err(e) => tracing::warn!(media_id, error = %e, "Failed to remove orphaned attachment"),
        }
    }

    async fn try_delete_media(&self, media_id: u64) -> Result<(), PostStoreError> {
        let mut url = self.endpoint(&format!("media/{media_id}"))?;
        url.query_pairs_mut().append_pair("force", "true");
        let request = self
            .http
            .delete(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()));
        self.send(request, REQUEST_TIMEOUT).await?;
        Ok(())
    }
}

fn object_id(value: &Value) -> Result<u64, PostStoreError> {
    value
        .get("id")
        .and_then(Value::as_u64)
        .filter(|&id| id != 0)
        .ok_or(PostStoreError::MissingId)
}

/// MIME type for an allow-listed image extension.
fn image_mime(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Filename safe to embed in a quoted `Content-Disposition` value.
fn header_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '-' })
        .collect()
}

#[async_trait]
impl PostStore for WordPressPostStore {
    async fn create_post(&self, post: &NewPost) -> Result<u64, PostStoreError> {
        let mut body = json!({
            "title": post.title,
            "content": post.content,
            "slug": post.slug,
            "status": post.status,
        });
        if let Some(author) = post.author_id {
            body["author"] = json!(author);
        }
        if let Some(category) = post.category_id {
            body["categories"] = json!([category]);
        }

        let created = self.post_json(self.endpoint("posts")?, &body).await?;
        let id = object_id(&created)?;
        tracing::debug!(post_id = id, slug = %post.slug, "Created target post");
        Ok(id)
    }

    async fn set_remote_meta(&self, post_id: u64, remote_id: u64, source_url: &str) -> Result<(), PostStoreError> {
        let mut meta = serde_json::Map::new();
        meta.insert(META_REMOTE_ID.to_string(), json!(remote_id));
        meta.insert(META_SOURCE_URL.to_string(), json!(source_url));
        let body = json!({ "meta": meta });
        self.post_json(self.endpoint(&format!("posts/{post_id}"))?, &body)
            .await?;
        Ok(())
    }

    async fn update_content(&self, post_id: u64, content: &str) -> Result<(), PostStoreError> {
        let body = json!({ "content": content });
        self.post_json(self.endpoint(&format!("posts/{post_id}"))?, &body)
            .await?;
        Ok(())
    }

    async fn attach_featured_image(&self, post_id: u64, file: &Path, filename: &str) -> Result<u64, PostStoreError> {
        let bytes = tokio::fs::read(file).await?;
        let mut url = self.endpoint("media")?;
        url.query_pairs_mut().append_pair("post", &post_id.to_string());

        let request = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .header(CONTENT_TYPE, image_mime(filename))
            .header(
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", header_filename(filename)),
            )
            .body(bytes);
        let media = self.send(request, UPLOAD_TIMEOUT).await?;
        let media_id = object_id(&media)?;

        if let Err(e) = self.set_featured(post_id, media_id).await {
            // The upload already attached the file to the post.
            self.delete_media(media_id).await;
            return Err(e);
        }
        tracing::debug!(post_id, media_id, "Set featured image");
        Ok(media_id)
    }
}
