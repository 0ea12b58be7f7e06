//! Optional AI rewrite of a post's title and description.
//!
//! Enrichment is best effort: every failure mode (missing credentials,
//! network trouble, non-2xx, unusable model output) collapses to `None` and
//! the pipeline carries on with the rule-filtered text.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::providers::{Prompt, Provider};
use crate::config::AiConfig;
use crate::util::{read_limited_bytes, truncate_chars, BodyError};

/// Longest description (in characters) forwarded to the provider.
pub const MAX_DESCRIPTION_CHARS: usize = 1500;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_SIZE: usize = 2 * 1024 * 1024;

/// Inputs for one enrichment call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichmentRequest<'a> {
    pub title_instruction: &'a str,
    pub description_instruction: &'a str,
    pub original_title: &'a str,
    pub original_description: &'a str,
}

/// Fields the model produced. At least one is `Some` and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentResult {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Error)]
enum EnhanceError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP status {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error("Response was not JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Response has no generated text")]
    MissingText,
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// A configured provider connection.
pub struct TextEnhancer {
    http: reqwest::Client,
    provider: Provider,
    api_key: SecretString,
    model: String,
    base_url: String,
    referer: Option<String>,
}

impl std::fmt::Debug for TextEnhancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextEnhancer")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl TextEnhancer {
    pub fn new(http: reqwest::Client, provider: Provider, api_key: SecretString) -> Self {
        Self {
            http,
            provider,
            api_key,
            model: provider.default_model().to_string(),
            base_url: provider.default_base_url().to_string(),
            referer: None,
        }
    }

    /// Builds an enhancer from the `[ai]` config table.
    ///
    /// Returns `None` when enrichment is disabled, or when the provider or
    /// credential is unset.
    pub fn from_config(http: reqwest::Client, ai: &AiConfig, referer: Option<&str>) -> Option<Self> {
        if !ai.enabled {
            return None;
        }
        let Some(provider) = ai.provider else {
            tracing::debug!("AI enrichment enabled but no provider configured");
            return None;
        };
        let Some(api_key) = ai.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) else {
            tracing::debug!(provider = %provider, "AI enrichment enabled but no API key configured");
            return None;
        };

        let mut enhancer = Self::new(http, provider, SecretString::from(api_key.to_string()));
        if let Some(model) = ai.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            enhancer.model = model.to_string();
        }
        if let Some(base) = ai.base_url.as_deref().filter(|b| !b.trim().is_empty()) {
            enhancer.base_url = base.trim().to_string();
        }
        enhancer.referer = referer.map(str::to_string);
        Some(enhancer)
    }

    /// Overrides the API root (used to aim at a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Asks the provider to rewrite title and/or description.
    pub async fn enrich(&self, request: &EnrichmentRequest<'_>) -> Option<EnrichmentResult> {
        if request.original_title.trim().is_empty() && request.original_description.trim().is_empty() {
            tracing::debug!("AI generation skipped: no content provided");
            return None;
        }

        let prompt = build_prompt(self.provider, request);
        tracing::debug!(provider = %self.provider, model = %self.model, "Calling AI provider");

        let text = match self.call(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(provider = %self.provider, error = %e, "AI enrichment request failed");
                return None;
            }
        };

        let parsed = parse_model_output(&text);
        match &parsed {
            Some(result) => tracing::debug!(
                provider = %self.provider,
                title = result.title.is_some(),
                description = result.description.is_some(),
                "AI generation successful"
            ),
            None => tracing::warn!(
                provider = %self.provider,
                output = %truncate_chars(&text, 200),
                "Failed to parse AI response as JSON"
            ),
        }
        parsed
    }

    async fn call(&self, prompt: &Prompt) -> Result<String, EnhanceError> {
        let endpoint = self.provider.endpoint(&self.base_url, &self.model)?;
        let body = self.provider.request_body(&self.model, prompt);

        let mut request = self
            .http
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?);

        request = if self.provider.uses_bearer_auth() {
            request.bearer_auth(self.api_key.expose_secret())
        } else {
            request.header(self.provider.auth_header(), self.api_key.expose_secret())
        };
        if self.provider == Provider::OpenRouter {
            request = request.header("X-Title", "autosync");
            if let Some(referer) = &self.referer {
                request = request.header("HTTP-Referer", referer);
            }
        }

        // Errors are rendered into logs; keep request URLs out of them.
        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| EnhanceError::Timeout(REQUEST_TIMEOUT))?
            .map_err(|e| EnhanceError::Network(e.without_url()))?;

        let status = response.status();
        let bytes = tokio::time::timeout(REQUEST_TIMEOUT, read_limited_bytes(response, MAX_RESPONSE_SIZE))
            .await
            .map_err(|_| EnhanceError::Timeout(REQUEST_TIMEOUT))?
            .map_err(BodyError::without_url)?;

        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(EnhanceError::HttpStatus {
                status: status.as_u16(),
                message,
            });
        }

        let json: Value = serde_json::from_slice(&bytes)?;
        json.pointer(self.provider.response_text_pointer())
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(EnhanceError::MissingText)
    }
}

/// Builds the shared prompt. The description is cut to
/// [`MAX_DESCRIPTION_CHARS`] to bound request size.
pub fn build_prompt(provider: Provider, request: &EnrichmentRequest<'_>) -> Prompt {
    let mut user = String::from("Instructions:\n");
    if !request.title_instruction.is_empty() {
        user.push_str(&format!("Title: {}\n", request.title_instruction));
    }
    if !request.description_instruction.is_empty() {
        user.push_str(&format!("Description: {}\n", request.description_instruction));
    }

    user.push_str("\nOriginal Content:\n");
    if !request.original_title.is_empty() {
        user.push_str(&format!("Title: {}\n", request.original_title));
    }
    if !request.original_description.is_empty() {
        user.push_str(&format!(
            "Description: {}\n",
            truncate_chars(request.original_description, MAX_DESCRIPTION_CHARS)
        ));
    }

    user.push_str(
        "\nReturn only valid JSON in this exact format:\n\
         {\"title\": \"enhanced title\", \"description\": \"enhanced description\"}",
    );

    Prompt {
        system: provider.system_prompt().to_string(),
        user,
    }
}

/// Decodes the model's text as `{"title": ..., "description": ...}`.
///
/// Tolerates a surrounding Markdown code fence. Returns `None` unless at
/// least one field is a non-empty string after trimming.
pub fn parse_model_output(text: &str) -> Option<EnrichmentResult> {
    let json: Value = serde_json::from_str(strip_code_fence(text)).ok()?;
    let field = |name: &str| {
        json.get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let result = EnrichmentResult {
        title: field("title"),
        description: field("description"),
    };
    if result.title.is_none() && result.description.is_none() {
        return None;
    }
    Some(result)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
