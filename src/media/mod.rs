//! Featured-image acquisition: download, validate, hand off to the post store.

mod acquirer;

pub use acquirer::{infer_filename, ImageAcquirer, ImageError, ALLOWED_EXTENSIONS};
