//! Polling of remote REST sources.
//!
//! - [`client`] - post listing with URL-shape fallback, featured media lookup

mod client;

pub use client::{RemotePost, SourceClient, SourceError, PAGE_SIZE};
