use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::config::Config;
use crate::feed::fetcher::{fetch_text, FetchError};
use crate::feed::parser::check_attributes;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Bounds the work spent on malformed or hostile subscription lists.
const MAX_OPML_DEPTH: usize = 50;

/// Title given to outlines that carry neither `title` nor `text`.
const FALLBACK_TITLE: &str = "Feed";

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// An element carries a malformed attribute (duplicate name, unquoted
    /// value, missing `=`).
    #[error("Malformed attribute: {0}")]
    Attribute(#[from] AttrError),
}

/// Errors that can occur while loading the subscription list.
///
/// Both are fatal: without a feed list there is nothing to aggregate.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to fetch subscription list: {0}")]
    Fetch(#[from] FetchError),

    #[error("Failed to parse subscription list: {0}")]
    Opml(#[from] OpmlError),
}

/// A feed subscription extracted from an OPML document.
///
/// Represents a single `<outline>` element with a non-empty `xmlUrl`
/// attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescriptor {
    /// Display title for the feed. Sourced from `title` attribute,
    /// falling back to `text` attribute, then to `"Feed"`.
    pub title: String,
    /// URL of the RSS/Atom feed XML, exactly as written in the document.
    pub url: String,
}

/// Fetches the subscription document and returns its first `max_feeds`
/// feeds in document order.
///
/// # Errors
///
/// Returns [`LoadError::Fetch`] if the document cannot be retrieved and
/// [`LoadError::Opml`] if it is not well-formed OPML.
pub async fn load_feed_list(
    client: &reqwest::Client,
    config: &Config,
) -> Result<Vec<FeedDescriptor>, LoadError> {
    let content = fetch_text(client, &config.opml_url, config.fetch_timeout()).await?;

    let mut feeds = parse_opml_content(&content)?;
    let total = feeds.len();
    feeds.truncate(config.max_feeds);

    tracing::info!(
        url = %config.opml_url,
        found = total,
        used = feeds.len(),
        "Loaded subscription list"
    );

    Ok(feeds)
}

/// Parses OPML content and extracts feed subscriptions.
///
/// Handles both nested and flat OPML structures, extracting feeds from any
/// `<outline>` element with a non-empty `xmlUrl` attribute regardless of
/// nesting depth. Category/folder outlines (those without `xmlUrl`) are
/// traversed but not returned in the result.
///
/// URLs are not validated here; a feed with an unusable URL fails when it
/// is fetched, like any other unreachable feed.
pub fn parse_opml_content(content: &str) -> Result<Vec<FeedDescriptor>, OpmlError> {
    // SEC-002: XXE protection. quick-xml (0.37) never parses <!ENTITY> declarations from
    // DOCTYPE. Entity resolution only knows the 5 XML builtins (&lt; &gt; &amp; &apos; &quot;),
    // custom entities like &xxe; produce an `EscapeError::UnrecognizedEntity` error via
    // `decode_and_unescape_value()`.
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut buf = Vec::new();
    // SEC-003: Track outline nesting depth against MAX_OPML_DEPTH
    let mut depth: usize = 0;
    // Elements of any name still open; must be zero at end of input
    let mut open_elements: usize = 0;
    let mut saw_element = false;
    let mut root_closed = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if root_closed {
                    return Err(content_after_root());
                }
                saw_element = true;
                open_elements += 1;
                if e.name().as_ref() != b"outline" {
                    check_attributes(&e)?;
                } else {
                    depth += 1;
                    // SEC-003: Reject excessively nested OPMLs
                    if depth > MAX_OPML_DEPTH {
                        return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                    }

                    if let Some(feed) = parse_outline_attributes(&e, &reader)? {
                        feeds.push(feed);
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if root_closed {
                    return Err(content_after_root());
                }
                saw_element = true;
                root_closed = open_elements == 0;
                // Self-closing outline doesn't affect depth
                if e.name().as_ref() != b"outline" {
                    check_attributes(&e)?;
                } else if let Some(feed) = parse_outline_attributes(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::End(e)) => {
                open_elements = open_elements.saturating_sub(1);
                root_closed = open_elements == 0;
                if e.name().as_ref() == b"outline" {
                    depth = depth.saturating_sub(1);
                }
            }
            // Text is trimmed, so anything left at the top level is stray content
            Ok(Event::Text(_)) if open_elements == 0 => {
                return Err(OpmlError::XmlParse(
                    "text outside the root element".to_string(),
                ));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !saw_element {
        return Err(OpmlError::XmlParse("document has no root element".to_string()));
    }
    if open_elements > 0 {
        return Err(OpmlError::XmlParse(format!(
            "unexpected end of document with {open_elements} unclosed element(s)"
        )));
    }

    Ok(feeds)
}

fn content_after_root() -> OpmlError {
    OpmlError::XmlParse("content after the root element".to_string())
}

/// Extracts feed attributes from an outline element.
///
/// Returns `Some(FeedDescriptor)` if the outline has a non-empty `xmlUrl`
/// attribute, `None` for category/folder outlines without feed URLs.
fn parse_outline_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Option<FeedDescriptor>, OpmlError> {
    let mut xml_url = None;
    let mut title = None;
    let mut text = None;

    for attr in e.attributes() {
        // A malformed attribute rejects the whole list rather than one feed
        let attr = attr?;
        let slot = match attr.key.as_ref() {
            b"xmlUrl" => &mut xml_url,
            b"title" => &mut title,
            b"text" => &mut text,
            _ => continue,
        };
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| OpmlError::XmlParse(e.to_string()))?;
        *slot = Some(value.into_owned());
    }

    let Some(url) = xml_url.filter(|u| !u.is_empty()) else {
        return Ok(None);
    };

    let title = title
        .filter(|t| !t.is_empty())
        .or(text.filter(|t| !t.is_empty()))
        .unwrap_or_else(|| FALLBACK_TITLE.to_string());

    Ok(Some(FeedDescriptor { title, url }))
}
