use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

use crate::config::Config;
use crate::feed::date::{format_utc, normalize_date, sort_key};
use crate::feed::fetcher::{fetch_text, FetchError};
use crate::feed::opml::{load_feed_list, FeedDescriptor, LoadError};
use crate::feed::parser::{parse_feed, Entry};

/// The artifact produced by one aggregation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// When the run finished, canonical UTC ISO 8601.
    pub generated_at: String,
    /// Newest first, every entry with a non-empty link.
    pub items: Vec<Entry>,
}

/// Outcome of fetching and parsing a single feed.
pub type FeedResult = Result<Vec<Entry>, FetchError>;

/// Runs the whole pipeline: subscription list, every feed, merge.
///
/// # Errors
///
/// Only the subscription list can fail the run. Individual feeds that
/// cannot be fetched are skipped.
pub async fn run(client: &reqwest::Client, config: &Config) -> Result<AggregateResult, LoadError> {
    let feeds = load_feed_list(client, config).await?;
    let results = fetch_all(client, &feeds, config).await;
    let entries = collect_entries(&feeds, results);
    let items = finalize(entries, config.max_items);

    let result = AggregateResult {
        generated_at: format_utc(&Utc::now()),
        items,
    };

    tracing::info!(
        feeds = feeds.len(),
        items = result.items.len(),
        generated_at = %result.generated_at,
        "Aggregation complete"
    );

    Ok(result)
}

/// Fetches one feed and returns its first `items_per_feed` entries in
/// document order.
///
/// Entries are not re-sorted within the feed; publishers list newest first.
pub async fn fetch_feed(
    client: &reqwest::Client,
    feed: &FeedDescriptor,
    config: &Config,
) -> FeedResult {
    let text = fetch_text(client, &feed.url, config.fetch_timeout()).await?;

    let mut entries = parse_feed(&text, &feed.title);
    let parsed = entries.len();
    entries.truncate(config.items_per_feed);

    tracing::debug!(
        feed = %feed.url,
        parsed = parsed,
        kept = entries.len(),
        "Parsed feed"
    );

    Ok(entries)
}

/// Fetches every feed, at most `max_concurrent_fetches` at a time.
///
/// Results are returned in the order of `feeds`, not in completion order.
pub async fn fetch_all(
    client: &reqwest::Client,
    feeds: &[FeedDescriptor],
    config: &Config,
) -> Vec<FeedResult> {
    let in_flight = config.max_concurrent_fetches.max(1);

    stream::iter(feeds)
        .map(|feed| fetch_feed(client, feed, config))
        .buffered(in_flight)
        .collect()
        .await
}

/// Appends the entries of every successful feed, in feed order.
///
/// A failed feed contributes nothing; the failure is logged and the
/// remaining feeds are still used. Duplicates across feeds are kept.
pub fn collect_entries(feeds: &[FeedDescriptor], results: Vec<FeedResult>) -> Vec<Entry> {
    let mut entries = Vec::new();

    for (feed, result) in feeds.iter().zip(results) {
        match result {
            Ok(feed_entries) => entries.extend(feed_entries),
            Err(e) => {
                tracing::warn!(
                    title = %feed.title,
                    feed = %feed.url,
                    error = %e,
                    "Skipping feed"
                );
            }
        }
    }

    entries
}

/// Normalizes dates, orders newest first, drops link-less entries and caps
/// the result at `max_items`.
///
/// Entries whose date cannot be parsed keep their raw date string and sort
/// after every dated entry. Ties keep their incoming order.
pub fn finalize(mut entries: Vec<Entry>, max_items: usize) -> Vec<Entry> {
    for entry in entries.iter_mut() {
        match normalize_date(&entry.date) {
            Some(canonical) => entry.date = canonical,
            None => {
                tracing::debug!(
                    source = %entry.source,
                    date = %entry.date,
                    "Unparseable entry date, sorting as oldest"
                );
            }
        }
    }

    // Stable: equal keys keep feed-then-document order
    entries.sort_by_cached_key(|entry| Reverse(sort_key(&entry.date)));

    entries
        .into_iter()
        .filter(|entry| !entry.link.is_empty())
        .take(max_items)
        .collect()
}
