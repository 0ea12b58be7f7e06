//! Content shaping between fetch and publish.
//!
//! - [`transform`] - rule-based cleanup of titles and post bodies
//! - [`enhance`] - optional generative rewrite through an AI provider
//! - [`providers`] - per-vendor endpoints and envelopes used by `enhance`

pub mod enhance;
pub mod providers;
pub mod transform;

pub use enhance::{EnrichmentRequest, EnrichmentResult, TextEnhancer};
pub use providers::Provider;
pub use transform::{first_image_src, strip_image_reference, strip_links, ReplacementPair, TransformRules};
