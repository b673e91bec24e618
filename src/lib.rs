//! Aggregates the feeds of an OPML subscription list into one time-sorted
//! JSON document.
//!
//! The pipeline lives in [`feed`]; [`sink`] writes its result to disk.

pub mod config;
pub mod feed;
pub mod sink;
pub mod util;
