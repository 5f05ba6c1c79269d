//! Utility functions shared by the HTTP, discovery and favicon layers.
//!
//! - **URL validation**: syntactic checks before anything is fetched
//! - **URL resolution**: relative hrefs from scraped markup, conventional favicon paths

mod url_validator;

pub use url_validator::{favicon_url, resolve_url, validate_url, UrlValidationError};
