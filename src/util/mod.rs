//! Utility functions shared across the pipeline stages.
//!
//! - **HTTP**: the shared client and a size-capped body reader
//! - **URL validation**: scheme checks and SSRF guards for URLs lifted out of
//!   remote content
//! - **Text processing**: tag stripping, slugs, one-line ledger fields

mod http;
mod text;
mod url_validator;

pub use http::{
    build_client, build_guarded_client, check_redirect, read_limited_bytes, BodyError, RedirectError,
    MAX_REDIRECTS, USER_AGENT,
};
pub use text::{format_file_size, single_line, slugify, strip_tags, truncate_chars};
pub use url_validator::{validate_url, HostPolicy, UrlValidationError};
