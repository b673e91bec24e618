//! Feed aggregation pipeline.
//!
//! This module turns an OPML subscription list into one merged, time-sorted
//! list of entries:
//!
//! - **OPML**: Fetch the subscription list and extract feed descriptors
//! - **Fetching**: HTTP retrieval with a per-request timeout and size limit
//! - **Parsing**: RSS items and Atom entries from the same document pass
//! - **Dates**: RFC 2822 / ISO 8601 normalization to canonical UTC
//! - **Aggregation**: Merge, sort newest first, filter and cap
//!
//! # Architecture
//!
//! - [`opml`] - Subscription list loading (a failure here aborts the run)
//! - [`fetcher`] - HTTP fetching shared by the subscription list and feeds
//! - [`parser`] - RSS/Atom parsing into [`Entry`] records, never fails
//! - [`date`] - Date parsing, canonical formatting and sort keys
//! - [`aggregate`] - Orchestration; per-feed failures skip that feed only
//!
//! # Example
//!
//! ```ignore
//! use rss_seed::config::Config;
//! use rss_seed::feed::{build_client, run};
//!
//! let config = Config::default();
//! let client = build_client(&config)?;
//! let result = run(&client, &config).await?;
//! println!("{} items", result.items.len());
//! ```

mod aggregate;
mod date;
mod fetcher;
mod opml;
mod parser;

pub use aggregate::{
    collect_entries, fetch_all, fetch_feed, finalize, run, AggregateResult, FeedResult,
};
pub use date::{format_utc, normalize_date, parse_date, sort_key};
pub use fetcher::{build_client, fetch_text, FetchError};
pub use opml::{load_feed_list, parse_opml_content, FeedDescriptor, LoadError, OpmlError};
pub use parser::{parse_feed, Entry, ATOM_NS};
