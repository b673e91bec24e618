//! Utility functions shared by the feed pipeline.
//!
//! - **Text processing**: turn feed HTML fragments into plain display text
//!
//! # Examples
//!
//! ```
//! use rss_seed::util::strip_html;
//!
//! assert_eq!(strip_html("<em>Breaking</em> &amp; news"), "Breaking & news");
//! ```

mod text;

pub use text::{collapse_whitespace, strip_html};
