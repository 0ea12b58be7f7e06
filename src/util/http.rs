use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::url_validator::{validate_url, HostPolicy, UrlValidationError};

/// User agent sent on every outbound request.
pub const USER_AGENT: &str = concat!("autosync/", env!("CARGO_PKG_VERSION"));

/// Most redirect hops a guarded client follows.
pub const MAX_REDIRECTS: usize = 5;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure while draining a response body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("Network error while reading body: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Response too large (exceeds {0} bytes)")]
    TooLarge(usize),
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },
}

impl BodyError {
    /// Drops the request URL from a wrapped network error. Some endpoints
    /// carry credentials in their URLs.
    pub fn without_url(self) -> Self {
        match self {
            BodyError::Network(e) => BodyError::Network(e.without_url()),
            other => other,
        }
    }
}

/// Builds the shared HTTP client.
///
/// Per-request deadlines are applied by callers with `tokio::time::timeout`;
/// the connect timeout here only bounds the TCP/TLS handshake.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
}

/// Why a redirect hop was refused.
#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("Too many redirects (max {0})")]
    TooMany(usize),
    #[error("Redirect loop detected at {0}")]
    Loop(String),
    #[error("Redirect target rejected: {0}")]
    Blocked(#[from] UrlValidationError),
}

/// Client for URLs taken from untrusted content. Every redirect hop is
/// validated against `policy`, so a public URL cannot bounce the request
/// to a private host.
pub fn build_guarded_client(policy: HostPolicy) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(guarded_redirect_policy(policy))
        .build()
}

fn guarded_redirect_policy(policy: HostPolicy) -> Policy {
    Policy::custom(move |attempt| {
        let verdict = check_redirect(attempt.url(), attempt.previous(), policy);
        match verdict {
            Ok(()) => {
                tracing::debug!(
                    from = %attempt.previous().last().map(Url::as_str).unwrap_or("initial"),
                    to = %attempt.url(),
                    hop = attempt.previous().len(),
                    "Following redirect"
                );
                attempt.follow()
            }
            Err(e) => {
                tracing::warn!(to = %attempt.url(), error = %e, "Refusing redirect");
                attempt.error(e)
            }
        }
    })
}

/// Decides whether the hop to `next` may be followed. `previous` holds the
/// URLs already requested, the original one first.
pub fn check_redirect(next: &Url, previous: &[Url], policy: HostPolicy) -> Result<(), RedirectError> {
    if previous.len() > MAX_REDIRECTS {
        return Err(RedirectError::TooMany(MAX_REDIRECTS));
    }
    if previous.iter().any(|prev| prev.as_str() == next.as_str()) {
        return Err(RedirectError::Loop(next.to_string()));
    }
    validate_url(next.as_str(), policy)?;
    Ok(())
}

/// Reads a response body, failing once it grows past `limit` bytes.
pub async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, BodyError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(BodyError::TooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BodyError::TooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(BodyError::Incomplete {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
