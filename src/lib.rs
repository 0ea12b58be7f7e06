//! Imports posts from remote WordPress-style REST sources into a target site.
//!
//! A run polls each configured source, drops posts already recorded in the
//! import ledger, cleans titles and bodies with operator rules, optionally
//! rewrites them through an AI provider, publishes them with a featured
//! image and appends one ledger line per import.
//!
//! - [`config`] - TOML configuration
//! - [`source`] - remote post listing
//! - [`storage`] - the import ledger ([`storage::LogStore`])
//! - [`content`] - text rules and AI enrichment
//! - [`media`] - featured-image download and attachment
//! - [`target`] - publishing collaborator ([`target::PostStore`])
//! - [`pipeline`] - the run itself
//! - [`state`] - last-run bookkeeping and the optional run lock

pub mod config;
pub mod content;
pub mod media;
pub mod pipeline;
pub mod source;
pub mod state;
pub mod storage;
pub mod target;
pub mod util;

pub use config::Config;
pub use pipeline::{ManualRun, Pipeline, RunReport};
