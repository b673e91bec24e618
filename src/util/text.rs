use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Converts an HTML fragment from a feed into a single line of plain text.
///
/// Applied to item summaries, which publishers routinely fill with escaped
/// markup. The steps run in a fixed order:
///
/// 1. Every tag (`<...>`) is replaced by a space, so `a<br>b` becomes `a b`
///    rather than `ab`.
/// 2. HTML entities are decoded (`&amp;`, `&nbsp;`, `&#8217;`, ...).
/// 3. Runs of Unicode whitespace collapse to one ASCII space and the
///    result is trimmed.
///
/// Entities are decoded *after* tag removal, so an escaped tag such as
/// `&lt;b&gt;` survives as the literal text `<b>`. Feed XML is already
/// unescaped once by the XML reader, which is what turns
/// `&lt;b&gt;Hi&lt;/b&gt;` in the document into real tags here.
///
/// # Examples
///
/// ```
/// use rss_seed::util::strip_html;
///
/// assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
/// assert_eq!(strip_html("  fish &amp; chips \n"), "fish & chips");
/// assert_eq!(strip_html(""), "");
/// ```
pub fn strip_html(s: &str) -> String {
    let without_tags = TAG_RE.replace_all(s, " ");
    let decoded = html_escape::decode_html_entities(&without_tags);
    collapse_whitespace(&decoded).into_owned()
}

/// Collapses whitespace runs to a single space and trims both ends.
///
/// Returns `Cow::Borrowed` when the input is already normalized.
pub fn collapse_whitespace(s: &str) -> Cow<'_, str> {
    let trimmed = s.trim();
    let needs_collapse = trimmed.char_indices().any(|(i, c)| {
        c.is_whitespace() && (c != ' ' || trimmed[i + 1..].starts_with(char::is_whitespace))
    });

    if !needs_collapse {
        return Cow::Borrowed(trimmed);
    }

    Cow::Owned(WS_RE.replace_all(trimmed, " ").into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_removes_tags() {
        assert_eq!(strip_html("<b>Hi</b> there"), "Hi there");
    }

    #[test]
    fn test_strip_html_tags_become_separators() {
        assert_eq!(strip_html("line one<br/>line two"), "line one line two");
        assert_eq!(strip_html("<p>a</p><p>b</p>"), "a b");
    }

    #[test]
    fn test_strip_html_decodes_entities() {
        assert_eq!(strip_html("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(strip_html("it&#8217;s"), "it\u{2019}s");
        assert_eq!(strip_html("&quot;quoted&quot;"), "\"quoted\"");
    }

    #[test]
    fn test_strip_html_escaped_tags_survive_as_text() {
        // Decoding happens after tag removal
        assert_eq!(strip_html("&lt;b&gt;literal&lt;/b&gt;"), "<b>literal</b>");
    }

    #[test]
    fn test_strip_html_nbsp_collapses() {
        assert_eq!(strip_html("a&nbsp;&nbsp; b"), "a b");
    }

    #[test]
    fn test_strip_html_multiline_attributes() {
        let html = "<a\n  href=\"https://example.com\"\n>link</a> text";
        assert_eq!(strip_html(html), "link text");
    }

    #[test]
    fn test_strip_html_empty_and_blank() {
        assert_eq!(strip_html(""), "");
        assert_eq!(strip_html("   \n\t "), "");
        assert_eq!(strip_html("<div>  </div>"), "");
    }

    #[test]
    fn test_collapse_whitespace_borrowed_when_clean() {
        let out = collapse_whitespace("already clean text");
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, "already clean text");
    }

    #[test]
    fn test_collapse_whitespace_trims_and_collapses() {
        assert_eq!(collapse_whitespace("  a \t\n b  "), "a b");
        assert_eq!(collapse_whitespace("a\nb"), "a b");
        assert_eq!(collapse_whitespace("a  b"), "a b");
    }
}
