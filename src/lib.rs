//! Feed ingestion engine.
//!
//! Fetches a set of feeds on a schedule with conditional requests and retry,
//! stores new items, and resolves feed addresses and site icons on demand.

pub mod config;
pub mod feed;
pub mod http;
pub mod storage;
pub mod util;
pub mod worker;
