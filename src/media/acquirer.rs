use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use url::Url;

use crate::config::ImageConfig;
use crate::target::{PostStore, PostStoreError};
use crate::util::{
    build_guarded_client, read_limited_bytes, validate_url, BodyError, HostPolicy, UrlValidationError,
};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Extensions accepted as featured images (lowercase).
pub const ALLOWED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Empty image URL")]
    EmptyUrl,
    /// URL failed scheme or host checks
    #[error("Invalid image URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Download exceeded 30 seconds
    #[error("Image download timed out")]
    Timeout,
    #[error("Image download failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Image download failed: HTTP status {0}")]
    HttpStatus(u16),
    #[error(transparent)]
    Body(#[from] BodyError),
    /// Inferred filename is not an allow-listed image type
    #[error("Invalid file type detected: {0:?}")]
    DisallowedExtension(String),
    #[error("Staging error: {0}")]
    Io(#[from] std::io::Error),
    /// Post store refused the upload or the featured-image update
    #[error("Attachment failed: {0}")]
    Store(#[from] PostStoreError),
}

/// Downloads remote images and attaches them as featured images.
#[derive(Debug, Clone)]
pub struct ImageAcquirer {
    http: reqwest::Client,
    policy: HostPolicy,
    staging_dir: PathBuf,
}

impl ImageAcquirer {
    pub fn new(http: reqwest::Client, policy: HostPolicy, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            policy,
            staging_dir: staging_dir.into(),
        }
    }

    /// Builds an acquirer with its own client, whose redirect policy applies
    /// the configured host policy to every hop.
    pub fn from_config(images: &ImageConfig) -> Result<Self, ImageError> {
        let policy = if images.allow_private_hosts {
            HostPolicy::AllowPrivate
        } else {
            HostPolicy::PublicOnly
        };
        let staging_dir = images
            .staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        Ok(Self::new(build_guarded_client(policy)?, policy, staging_dir))
    }

    /// Downloads `image_url` and sets it as the featured image of `post_id`.
    ///
    /// The staged download is removed on every path. On failure nothing is
    /// attached.
    pub async fn attach(
        &self,
        image_url: &str,
        post_id: u64,
        store: &dyn PostStore,
    ) -> Result<u64, ImageError> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(ImageError::EmptyUrl);
        }
        let url = validate_url(image_url, self.policy)?;

        tracing::debug!(url = %url, post_id, "Downloading image");
        let staged = self.download(&url).await?;
        let result = self.hand_off(&url, &staged, post_id, store).await;

        if let Err(e) = tokio::fs::remove_file(&staged).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %staged.display(), error = %e, "Failed to remove staged image");
            }
        }

        match &result {
            Ok(attachment_id) => {
                tracing::info!(post_id, attachment_id, "Attached featured image")
            }
            Err(e) => tracing::warn!(url = %url, post_id, error = %e, "Image acquisition failed"),
        }
        result
    }

    async fn hand_off(
        &self,
        url: &Url,
        staged: &Path,
        post_id: u64,
        store: &dyn PostStore,
    ) -> Result<u64, ImageError> {
        let filename = infer_filename(url, unix_now());
        let ext = extension(&filename);
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(ImageError::DisallowedExtension(ext));
        }
        Ok(store.attach_featured_image(post_id, staged, &filename).await?)
    }

    /// Downloads the image into a staging file and returns its path.
    async fn download(&self, url: &Url) -> Result<PathBuf, ImageError> {
        let response = tokio::time::timeout(DOWNLOAD_TIMEOUT, self.http.get(url.clone()).send())
            .await
            .map_err(|_| ImageError::Timeout)??;
        if !response.status().is_success() {
            return Err(ImageError::HttpStatus(response.status().as_u16()));
        }
        let bytes = tokio::time::timeout(DOWNLOAD_TIMEOUT, read_limited_bytes(response, MAX_IMAGE_SIZE))
            .await
            .map_err(|_| ImageError::Timeout)??;

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let path = self.staging_dir.join(staging_name(url));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

/// Unique staging filename: URL digest plus a nanosecond stamp, so
/// concurrent runs fetching the same image do not collide.
fn staging_name(url: &Url) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("autosync-{hex}-{nanos}.part")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Filename for the attachment: last path segment of the URL,
/// percent-decoded, or `image-<unix time>.jpg` when that segment is empty or
/// has no extension.
pub fn infer_filename(url: &Url, now: u64) -> String {
    let raw = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    let name = urlencoding::decode(raw)
        .map(|decoded| decoded.replace(['/', '\\'], "-"))
        .unwrap_or_else(|_| raw.to_string());
    let name = name.trim();

    if name.is_empty() || !name.contains('.') {
        return format!("image-{now}.jpg");
    }
    name.to_string()
}

fn extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::NewPost;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records attachments; optionally refuses them.
    #[derive(Default)]
    struct RecordingStore {
        attached: Mutex<Vec<(u64, String, Vec<u8>)>>,
        refuse: bool,
    }

    #[async_trait]
    impl PostStore for RecordingStore {
        async fn create_post(&self, _post: &NewPost) -> Result<u64, PostStoreError> {
            Ok(1)
        }
        async fn set_remote_meta(&self, _: u64, _: u64, _: &str) -> Result<(), PostStoreError> {
            Ok(())
        }
        async fn update_content(&self, _: u64, _: &str) -> Result<(), PostStoreError> {
            Ok(())
        }
        async fn attach_featured_image(&self, post_id: u64, file: &Path, filename: &str) -> Result<u64, PostStoreError> {
            if self.refuse {
                return Err(PostStoreError::MissingId);
            }
            let bytes = std::fs::read(file)?;
            self.attached
                .lock()
                .unwrap()
                .push((post_id, filename.to_string(), bytes));
            Ok(500)
        }
    }

    fn staging(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("autosync_acquirer_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    async fn serve(server: &MockServer, route: &str, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
    }

    #[test]
    fn test_infer_filename() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert_eq!(infer_filename(&url("https://x.example/a/b/photo.png?w=300"), 5), "photo.png");
        assert_eq!(infer_filename(&url("https://x.example/a/b/"), 5), "image-5.jpg");
        assert_eq!(infer_filename(&url("https://x.example/img/12345"), 5), "image-5.jpg");
        assert_eq!(infer_filename(&url("https://x.example/Pic.JPG"), 5), "Pic.JPG");
    }

    #[test]
    fn test_infer_filename_percent_decodes() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert_eq!(infer_filename(&url("https://x.example/up/my%20pic.jpg"), 5), "my pic.jpg");
        assert_eq!(infer_filename(&url("https://x.example/caf%C3%A9.png"), 5), "café.png");
        assert_eq!(infer_filename(&url("https://x.example/a%2Fb.gif"), 5), "a-b.gif");
        // Invalid UTF-8 keeps the raw segment.
        assert_eq!(infer_filename(&url("https://x.example/%FF.png"), 5), "%FF.png");
        assert_eq!(infer_filename(&url("https://x.example/shot%2Eexe"), 5), "shot.exe");
    }

    #[tokio::test]
    async fn test_attach_success_cleans_staging() {
        let server = MockServer::start().await;
        serve(&server, "/uploads/cat.png", b"png-bytes").await;
        let dir = staging("success");
        let store = RecordingStore::default();
        let acquirer = ImageAcquirer::new(reqwest::Client::new(), HostPolicy::AllowPrivate, &dir);

        let id = acquirer
            .attach(&format!("{}/uploads/cat.png", server.uri()), 77, &store)
            .await
            .unwrap();

        assert_eq!(id, 500);
        assert_eq!(
            store.attached.lock().unwrap().clone(),
            vec![(77, "cat.png".to_string(), b"png-bytes".to_vec())]
        );
        assert_eq!(staged_files(&dir), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_exe_rejected_without_attachment() {
        let server = MockServer::start().await;
        serve(&server, "/files/setup.exe", b"MZ").await;
        let dir = staging("exe");
        let store = RecordingStore::default();
        let acquirer = ImageAcquirer::new(reqwest::Client::new(), HostPolicy::AllowPrivate, &dir);

        let err = acquirer
            .attach(&format!("{}/files/setup.exe", server.uri()), 1, &store)
            .await
            .unwrap_err();

        assert!(matches!(err, ImageError::DisallowedExtension(ref ext) if ext == "exe"));
        assert!(store.attached.lock().unwrap().is_empty());
        assert_eq!(staged_files(&dir), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_extensionless_url_defaults_to_jpg() {
        let server = MockServer::start().await;
        serve(&server, "/image/42", b"jpeg").await;
        let dir = staging("extensionless");
        let store = RecordingStore::default();
        let acquirer = ImageAcquirer::new(reqwest::Client::new(), HostPolicy::AllowPrivate, &dir);

        acquirer
            .attach(&format!("{}/image/42", server.uri()), 3, &store)
            .await
            .unwrap();

        let attached = store.attached.lock().unwrap();
        assert!(attached[0].1.starts_with("image-"));
        assert!(attached[0].1.ends_with(".jpg"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_store_failure_cleans_staging() {
        let server = MockServer::start().await;
        serve(&server, "/a.gif", b"GIF89a").await;
        let dir = staging("store_failure");
        let store = RecordingStore {
            refuse: true,
            ..Default::default()
        };
        let acquirer = ImageAcquirer::new(reqwest::Client::new(), HostPolicy::AllowPrivate, &dir);

        let err = acquirer
            .attach(&format!("{}/a.gif", server.uri()), 3, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Store(_)));
        assert_eq!(staged_files(&dir), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_http_error_and_empty_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let dir = staging("http_error");
        let store = RecordingStore::default();
        let acquirer = ImageAcquirer::new(reqwest::Client::new(), HostPolicy::AllowPrivate, &dir);

        assert!(matches!(
            acquirer.attach(&format!("{}/gone.png", server.uri()), 1, &store).await,
            Err(ImageError::HttpStatus(404))
        ));
        assert!(matches!(acquirer.attach("   ", 1, &store).await, Err(ImageError::EmptyUrl)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_private_hosts_rejected_by_default() {
        let dir = staging("private");
        let store = RecordingStore::default();
        let acquirer = ImageAcquirer::from_config(&ImageConfig {
            staging_dir: Some(dir.clone()),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            acquirer.attach("http://127.0.0.1/a.png", 1, &store).await,
            Err(ImageError::InvalidUrl(_))
        ));
        assert!(matches!(
            acquirer.attach("file:///etc/passwd.png", 1, &store).await,
            Err(ImageError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_configured_client_checks_every_redirect_hop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/moved.png"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/final.png"))
            .mount(&server)
            .await;
        serve(&server, "/final.png", b"png").await;
        Mock::given(method("GET"))
            .and(path("/spin.png"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/spin.png"))
            .mount(&server)
            .await;

        let dir = staging("redirects");
        let store = RecordingStore::default();
        let acquirer = ImageAcquirer::from_config(&ImageConfig {
            allow_private_hosts: true,
            staging_dir: Some(dir.clone()),
            ..Default::default()
        })
        .unwrap();

        acquirer
            .attach(&format!("{}/moved.png", server.uri()), 3, &store)
            .await
            .unwrap();
        assert!(matches!(
            acquirer.attach(&format!("{}/spin.png", server.uri()), 4, &store).await,
            Err(ImageError::Network(e)) if e.is_redirect()
        ));

        let attached = store.attached.lock().unwrap().clone();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].1, "moved.png");
        std::fs::remove_dir_all(&dir).ok();
    }
}
