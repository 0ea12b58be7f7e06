//! One ingestion pass over every configured source.
//!
//! Sources are processed in config order and posts in the order the source
//! returns them, strictly sequentially. Per post:
//!
//! 1. dedup against the ledger by `(remote_id, source)`, then by slug base
//! 2. apply [`TransformRules`](crate::content::TransformRules)
//! 3. optional AI enrichment, overwriting only the fields it returns
//! 4. create the local post and record the remote mapping
//! 5. optional featured image
//! 6. append to the ledger
//!
//! Nothing here aborts a run. Failures are logged and counted; a failed post
//! creation drops only that post.

use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::content::{first_image_src, strip_image_reference, EnrichmentRequest, TextEnhancer};
use crate::media::ImageAcquirer;
use crate::source::{RemotePost, SourceClient};
use crate::state::{RunLock, RunState, LOCK_FILE, STATE_FILE};
use crate::storage::{ImportedPost, LogError, LogStore};
use crate::target::{NewPost, PostStore};
use crate::util::{slugify, strip_tags};

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sources: usize,
    pub fetched: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The run did nothing because another run held the run lock.
    pub busy: bool,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.busy {
            return f.write_str("another run is in progress");
        }
        write!(
            f,
            "{} sources, {} fetched, {} imported, {} skipped, {} failed",
            self.sources, self.fetched, self.imported, self.skipped, self.failed
        )
    }
}

/// Result of the manual "run now" trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualRun {
    pub success: bool,
    pub message: String,
    pub report: RunReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostOutcome {
    Imported,
    Skipped,
    Failed,
}

/// Per-run collaborators built from the config.
struct RunContext<'a> {
    config: &'a Config,
    enhancer: Option<TextEnhancer>,
    /// `None` when featured images are off.
    images: Option<ImageAcquirer>,
}

pub struct Pipeline {
    http: reqwest::Client,
    sources: SourceClient,
    ledger: Arc<dyn LogStore>,
    store: Arc<dyn PostStore>,
    state_dir: PathBuf,
}

impl Pipeline {
    /// `state_dir` holds the last-run state file and the run lock.
    pub fn new(
        http: reqwest::Client,
        ledger: Arc<dyn LogStore>,
        store: Arc<dyn PostStore>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sources: SourceClient::new(http.clone()),
            http,
            ledger,
            store,
            state_dir: state_dir.into(),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    /// Manual trigger: one run, summarised for the operator.
    pub async fn run_now(&self, config: &Config) -> ManualRun {
        let report = self.run(config).await;
        if report.busy {
            return ManualRun {
                success: false,
                message: "Manual run skipped: another run is in progress".to_string(),
                report,
            };
        }
        ManualRun {
            success: true,
            message: format!("Manual run completed: {report}"),
            report,
        }
    }

    /// Runs one full pass. Never fails; problems are logged and counted.
    pub async fn run(&self, config: &Config) -> RunReport {
        let state_path = self.state_path();
        match tokio::task::spawn_blocking(move || RunState::record_run(&state_path, Utc::now())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to record last run time"),
            Err(e) => tracing::warn!(error = %e, "Last-run task failed"),
        }

        let _lock = if config.run_lock {
            let ttl = Duration::from_secs(config.run_lock_ttl_seconds);
            let lock_path = self.lock_path();
            match tokio::task::spawn_blocking(move || RunLock::acquire(&lock_path, ttl)).await {
                Ok(Ok(Some(lock))) => Some(lock),
                Ok(Ok(None)) => {
                    tracing::info!("Another run holds the run lock, skipping");
                    return RunReport {
                        busy: true,
                        ..Default::default()
                    };
                }
                // Lock trouble falls back to unlocked behaviour.
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to take run lock, continuing unlocked");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Run lock task failed, continuing unlocked");
                    None
                }
            }
        } else {
            None
        };

        let referer = Some(config.target.base_url.trim()).filter(|u| !u.is_empty());
        let ctx = RunContext {
            config,
            enhancer: TextEnhancer::from_config(self.http.clone(), &config.ai, referer),
            images: if config.images.fetch_featured {
                match ImageAcquirer::from_config(&config.images) {
                    Ok(images) => Some(images),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to build image client, skipping images");
                        None
                    }
                }
            } else {
                None
            },
        };

        let mut report = RunReport::default();
        let sources = config.active_sources();
        if sources.is_empty() {
            tracing::info!("No sources configured");
        }

        for (source_url, category_id) in sources {
            report.sources += 1;
            let posts = self.sources.fetch_posts(&source_url).await;
            report.fetched += posts.len();
            tracing::debug!(source = %source_url, posts = posts.len(), "Processing source");

            for post in &posts {
                match self.process_post(&ctx, &source_url, category_id, post).await {
                    PostOutcome::Imported => report.imported += 1,
                    PostOutcome::Skipped => report.skipped += 1,
                    PostOutcome::Failed => report.failed += 1,
                }
            }
        }

        tracing::info!(
            sources = report.sources,
            fetched = report.fetched,
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failed,
            "Run finished"
        );
        report
    }

    async fn already_imported(&self, post: &RemotePost, slug: &str, source_url: &str) -> Result<bool, LogError> {
        if post.remote_id > 0 && self.ledger.exists(post.remote_id, source_url).await? {
            return Ok(true);
        }
        if !slug.is_empty() && self.ledger.exists_by_slug_base(slug, source_url).await? {
            return Ok(true);
        }
        Ok(false)
    }

    async fn process_post(
        &self,
        ctx: &RunContext<'_>,
        source_url: &str,
        category_id: Option<u64>,
        post: &RemotePost,
    ) -> PostOutcome {
        let config = ctx.config;
        let (mut title, mut content) = config.rules.apply(&strip_tags(&post.title), &post.content_html);

        // Posts without a remote slug dedup on the filtered title instead.
        let mut slug = slugify(&post.slug);
        if slug.is_empty() {
            slug = slugify(&title);
        }

        match self.already_imported(post, &slug, source_url).await {
            Ok(true) => {
                tracing::debug!(
                    source = %source_url,
                    remote_id = post.remote_id,
                    slug = %slug,
                    "Post already imported"
                );
                return PostOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => {
                // No dedup answer, no import.
                tracing::warn!(source = %source_url, remote_id = post.remote_id, error = %e, "Ledger lookup failed, skipping post");
                return PostOutcome::Failed;
            }
        }

        if let Some(enhancer) = &ctx.enhancer {
            let request = EnrichmentRequest {
                title_instruction: &config.ai.title_instruction,
                description_instruction: &config.ai.description_instruction,
                original_title: &title,
                original_description: &content,
            };
            match enhancer.enrich(&request).await {
                Some(result) => {
                    if let Some(new_title) = result.title {
                        title = new_title;
                        tracing::debug!(remote_id = post.remote_id, "AI title updated");
                    }
                    if let Some(new_description) = result.description {
                        content = new_description;
                        tracing::debug!(remote_id = post.remote_id, "AI description updated");
                    }
                }
                None => tracing::debug!(remote_id = post.remote_id, "AI generation returned no results"),
            }
        }

        let title = strip_tags(&title);
        if slug.is_empty() {
            slug = slugify(&title);
        }
        let new_post = NewPost {
            title,
            content,
            slug,
            status: config.target.post_status.clone(),
            author_id: config.target.author_id,
            category_id,
        };

        let post_id = match self.store.create_post(&new_post).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(source = %source_url, remote_id = post.remote_id, error = %e, "Failed to create post");
                return PostOutcome::Failed;
            }
        };

        if let Err(e) = self.store.set_remote_meta(post_id, post.remote_id, source_url).await {
            tracing::warn!(post_id, error = %e, "Failed to record remote mapping");
        }

        if let Some(images) = &ctx.images {
            self.attach_image(ctx.config, images, source_url, post, post_id, &new_post.content)
                .await;
        }

        let record = ImportedPost::now(post.remote_id, post_id, &new_post.slug, source_url, &new_post.title);
        if let Err(e) = self.ledger.append(&record).await {
            tracing::warn!(post_id, remote_id = post.remote_id, error = %e, "Failed to append ledger line");
        }

        tracing::info!(
            source = %source_url,
            remote_id = post.remote_id,
            post_id,
            title = %new_post.title,
            "Imported post"
        );
        PostOutcome::Imported
    }

    async fn attach_image(
        &self,
        config: &Config,
        images: &ImageAcquirer,
        source_url: &str,
        post: &RemotePost,
        post_id: u64,
        content: &str,
    ) {
        if let Some(custom) = config.images.custom_url() {
            // Override images are never stripped from the body.
            if let Err(e) = images.attach(custom, post_id, self.store.as_ref()).await {
                tracing::debug!(post_id, url = %custom, error = %e, "Custom image not attached");
            }
            return;
        }

        let Some(image_url) = self.derive_image_url(source_url, post).await else {
            tracing::debug!(post_id, "No featured image found");
            return;
        };

        if images.attach(&image_url, post_id, self.store.as_ref()).await.is_ok() {
            return;
        }
        if content.is_empty() {
            return;
        }

        let cleaned = strip_image_reference(content, &image_url);
        if cleaned == content {
            return;
        }
        tracing::debug!(post_id, url = %image_url, "Image failed to download, removing from content");
        if let Err(e) = self.store.update_content(post_id, &cleaned).await {
            tracing::warn!(post_id, error = %e, "Failed to remove broken image from content");
        }
    }

    /// Featured media first, then the first `<img>` in the raw body.
    async fn derive_image_url(&self, source_url: &str, post: &RemotePost) -> Option<String> {
        if let Some(media_id) = post.featured_media_id {
            if let Some(url) = self.sources.media_url(source_url, media_id).await {
                return Some(url);
            }
        }
        first_image_src(&post.content_html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display() {
        let report = RunReport {
            sources: 2,
            fetched: 10,
            imported: 3,
            skipped: 6,
            failed: 1,
            busy: false,
        };
        assert_eq!(
            report.to_string(),
            "2 sources, 10 fetched, 3 imported, 6 skipped, 1 failed"
        );
        let busy = RunReport {
            busy: true,
            ..Default::default()
        };
        assert_eq!(busy.to_string(), "another run is in progress");
    }
}
