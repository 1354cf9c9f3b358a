//! # etfscout Common Library
//!
//! Shared code for the etfscout pipeline:
//! - Error and result types
//! - Configuration loading (TOML + environment overrides)
//! - Retry policy value object (shared by the scrape retry controller
//!   and the upload adapter's sub-chunk retries)
//! - Identifier-list fingerprinting for resume validation

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod retry;

pub use error::{Error, Result};
pub use retry::{ErrorClass, RetryPolicy};
