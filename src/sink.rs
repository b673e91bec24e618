//! Output adapters for an [`AggregateResult`].
//!
//! Two artifacts are produced per run:
//!
//! - the JSON document (`rss.json` by default), always rewritten in full
//! - an optional seed block inside a static page, delimited by
//!   [`SEED_START`] / [`SEED_END`] marker comments
//!
//! The splice itself is the pure [`splice_between_markers`]; only
//! [`write_json`] and [`update_page_seed`] touch the filesystem.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use crate::feed::{AggregateResult, Entry};

/// Marker comment opening the seed block.
pub const SEED_START: &str = "<!-- RSS_SEED_START -->";
/// Marker comment closing the seed block.
pub const SEED_END: &str = "<!-- RSS_SEED_END -->";

/// Writes the aggregate as indented UTF-8 JSON, replacing any existing file.
pub fn write_json(path: &Path, result: &AggregateResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize aggregate")?;
    write_atomic(path, json.as_bytes())?;

    tracing::info!(
        path = %path.display(),
        items = result.items.len(),
        "Wrote JSON feed"
    );
    Ok(())
}

/// Replaces everything strictly between `start` and `end` with `replacement`.
///
/// The first `start` marker and the first `end` marker after it delimit the
/// region; the markers themselves are not part of it. Returns `None` when
/// either marker is missing (or `end` only occurs before `start`), leaving
/// the caller to keep the content unchanged.
///
/// # Examples
///
/// ```
/// use rss_seed::sink::splice_between_markers;
///
/// let page = "a[[old]]b";
/// assert_eq!(splice_between_markers(page, "[[", "]]", "new").as_deref(), Some("a[[new]]b"));
/// assert_eq!(splice_between_markers("no markers", "[[", "]]", "new"), None);
/// ```
pub fn splice_between_markers(
    content: &str,
    start: &str,
    end: &str,
    replacement: &str,
) -> Option<String> {
    let region_start = content.find(start)? + start.len();
    let region_end = region_start + content[region_start..].find(end)?;

    let capacity = content.len() - (region_end - region_start) + replacement.len();
    let mut out = String::with_capacity(capacity);
    out.push_str(&content[..region_start]);
    out.push_str(replacement);
    out.push_str(&content[region_end..]);
    Some(out)
}

/// Renders the text placed between the seed markers: a JSON script element
/// holding the compact `items` array, on its own line.
pub fn seed_block(items: &[Entry]) -> Result<String> {
    let json = serde_json::to_string(items).context("Failed to serialize seed items")?;
    // `</script>` inside a summary must not close the element early
    let json = json.replace("</", "<\\/");
    Ok(format!(
        "\n<script type=\"application/json\" id=\"rss-seed\">{json}</script>\n"
    ))
}

/// Refreshes the seed block of the page at `path`.
///
/// Returns `Ok(false)` without touching anything when the page does not
/// exist or lacks either marker, `Ok(true)` when the page was rewritten.
pub fn update_page_seed(path: &Path, items: &[Entry]) -> Result<bool> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No page to seed");
            return Ok(false);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read page '{}'", path.display()))
        }
    };

    let block = seed_block(items)?;
    let Some(updated) = splice_between_markers(&content, SEED_START, SEED_END, &block) else {
        tracing::debug!(path = %path.display(), "Seed markers not found, leaving page unchanged");
        return Ok(false);
    };

    write_atomic(path, updated.as_bytes())?;
    tracing::info!(path = %path.display(), items = items.len(), "Updated page seed");
    Ok(true)
}

/// Writes `bytes` to `path` using write-to-temp-then-rename, so the
/// destination is never left in a partial state.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| {
            format!(
                "Failed to create temporary file '{}': check directory permissions",
                temp_path.display()
            )
        })?;

    file.write_all(bytes).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to write temporary file '{}'", temp_path.display())
    })?;

    file.sync_all().with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to sync temporary file '{}' to disk",
            temp_path.display()
        )
    })?;

    drop(file);

    // On Windows, rename fails if destination exists, so remove it first
    #[cfg(windows)]
    if path.exists() {
        std::fs::remove_file(path).with_context(|| {
            let _ = std::fs::remove_file(&temp_path);
            format!("Failed to remove existing '{}' before replace", path.display())
        })?;
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}'",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
