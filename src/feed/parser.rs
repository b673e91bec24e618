use quick_xml::encoding::Decoder;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::strip_html;

/// Namespace URI of Atom 1.0 documents.
pub const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";

const UNTITLED: &str = "Untitled";

/// One article from a feed, in the shape written to the output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    /// May be empty straight out of the parser; such entries never reach
    /// the aggregate output.
    pub link: String,
    /// Raw date string until normalization, canonical UTC afterwards.
    pub date: String,
    /// Plain text, markup stripped.
    pub summary: String,
    /// Title of the feed the entry came from.
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Rss,
    Atom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Date,
    Summary,
}

impl Field {
    fn for_child(shape: Shape, local: &[u8]) -> Option<Self> {
        match (shape, local) {
            (_, b"title") => Some(Field::Title),
            (_, b"link") => Some(Field::Link),
            (Shape::Rss, b"pubDate") | (Shape::Atom, b"updated") => Some(Field::Date),
            (Shape::Rss, b"description") | (Shape::Atom, b"summary") => Some(Field::Summary),
            _ => None,
        }
    }
}

/// Accumulates the fields of one `<item>` / `<entry>` while its subtree is read.
///
/// Each field is `None` until its element is first seen. Later duplicates
/// of an element are ignored.
#[derive(Debug)]
struct EntryBuilder {
    shape: Shape,
    depth: usize,
    /// Position of the opening tag among all entries of the document.
    order: usize,
    title: Option<String>,
    link: Option<String>,
    date: Option<String>,
    summary: Option<String>,
    /// Field currently receiving text, with the depth of its element.
    open: Option<(Field, usize)>,
}

impl EntryBuilder {
    fn new(shape: Shape, depth: usize, order: usize) -> Self {
        Self {
            shape,
            depth,
            order,
            title: None,
            link: None,
            date: None,
            summary: None,
            open: None,
        }
    }

    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Date => &mut self.date,
            Field::Summary => &mut self.summary,
        }
    }

    /// Registers a direct child element. Returns `false` when an earlier
    /// element already claimed the field.
    fn claim(&mut self, field: Field) -> bool {
        let slot = self.slot(field);
        if slot.is_some() {
            return false;
        }
        *slot = Some(String::new());
        true
    }

    fn push_text(&mut self, depth: usize, text: &str) {
        if let Some((field, field_depth)) = self.open {
            if depth == field_depth {
                if let Some(buf) = self.slot(field) {
                    buf.push_str(text);
                }
            }
        }
    }

    fn build(self, source: &str) -> Entry {
        let title = self
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());

        Entry {
            title,
            link: self.link.map(|l| l.trim().to_string()).unwrap_or_default(),
            date: self.date.map(|d| d.trim().to_string()).unwrap_or_default(),
            summary: strip_html(self.summary.as_deref().unwrap_or_default()),
            source: source.to_string(),
        }
    }
}

/// Reasons a feed document is rejected as a whole.
#[derive(Debug, Error)]
enum DocumentError {
    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed attribute: {0}")]
    Attribute(#[from] AttrError),

    #[error("unexpected end of document with {0} unclosed element(s)")]
    Unclosed(usize),

    #[error("content outside the root element")]
    OutsideRoot,

    #[error("document has no root element")]
    NoRoot,
}

/// Output of a single pass over a feed document, one list per format.
///
/// Entries are tagged with the position of their opening tag, since a
/// nested entry is completed before the entry around it.
#[derive(Debug, Default)]
struct ParsedDocument {
    rss: Vec<(usize, Entry)>,
    atom: Vec<(usize, Entry)>,
}

impl ParsedDocument {
    fn push(&mut self, builder: EntryBuilder, source: &str) {
        let order = builder.order;
        let list = match builder.shape {
            Shape::Rss => &mut self.rss,
            Shape::Atom => &mut self.atom,
        };
        list.push((order, builder.build(source)));
    }

    fn into_entries(mut self) -> Vec<Entry> {
        self.rss.sort_by_key(|(order, _)| *order);
        self.atom.sort_by_key(|(order, _)| *order);
        self.rss
            .into_iter()
            .chain(self.atom)
            .map(|(_, entry)| entry)
            .collect()
    }
}

/// Parses an RSS or Atom document into entries tagged with `source`.
///
/// Both shapes are recognized in the same pass:
///
/// - RSS: `<item>` elements without a namespace, reading `title`, `link`,
///   `pubDate` and `description`
/// - Atom: `<entry>` elements in the Atom namespace, reading `title`, the
///   `href` of the first `link`, `updated` and `summary`
///
/// Entries are found at any depth, including inside other entries. RSS
/// items come first in the result, followed by Atom entries, each group in
/// order of their opening tags. Missing or blank titles become `"Untitled"`.
///
/// This never fails: a document that is not well-formed XML yields an empty
/// `Vec`. That covers undeclared entities, malformed or duplicate
/// attributes and anything after the root element. Capping the number of
/// entries per feed is left to the caller.
pub fn parse_feed(text: &str, source: &str) -> Vec<Entry> {
    match parse_document(text, source) {
        Ok(doc) => doc.into_entries(),
        Err(e) => {
            tracing::debug!(source = %source, error = %e, "Feed document is not well-formed XML");
            Vec::new()
        }
    }
}

fn parse_document(text: &str, source: &str) -> Result<ParsedDocument, DocumentError> {
    // SEC-002: quick-xml (0.37) never expands DOCTYPE entity declarations;
    // unknown entities surface as an unescape error and reject the document.
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = NsReader::from_str(text);
    let decoder = reader.decoder();

    let mut doc = ParsedDocument::default();
    // Entries still open, innermost last
    let mut open: Vec<EntryBuilder> = Vec::new();
    let mut started: usize = 0;
    let mut depth: usize = 0;
    let mut root_closed = false;
    let mut buf = Vec::new();

    loop {
        let (ns, event) = reader.read_resolved_event_into(&mut buf)?;
        match event {
            Event::Start(e) => {
                if root_closed {
                    return Err(DocumentError::OutsideRoot);
                }
                check_attributes(&e)?;
                depth += 1;
                if let Some(builder) = start_entry(&ns, e.local_name().as_ref(), depth, started) {
                    started += 1;
                    open.push(builder);
                } else if let Some(builder) = open.last_mut() {
                    open_child(builder, &ns, &e, depth, decoder)?;
                }
            }
            Event::Empty(e) => {
                if root_closed {
                    return Err(DocumentError::OutsideRoot);
                }
                check_attributes(&e)?;
                if depth == 0 {
                    root_closed = true;
                }
                // `<item/>` is an entry with every field missing
                if let Some(builder) = start_entry(&ns, e.local_name().as_ref(), depth + 1, started)
                {
                    started += 1;
                    doc.push(builder, source);
                } else if let Some(builder) = open.last_mut() {
                    // Self-closing children still count: `<link href=".."/>`, `<title/>`
                    if open_child(builder, &ns, &e, depth + 1, decoder)? {
                        builder.open = None;
                    }
                }
            }
            Event::Text(e) => {
                let text = e.unescape()?;
                if depth == 0 {
                    if !text.trim().is_empty() {
                        return Err(DocumentError::OutsideRoot);
                    }
                } else if let Some(builder) = open.last_mut() {
                    builder.push_text(depth, &text);
                }
            }
            Event::CData(e) => {
                if depth == 0 {
                    return Err(DocumentError::OutsideRoot);
                }
                if let Some(builder) = open.last_mut() {
                    builder.push_text(depth, &String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(_) => {
                let closes_entry = match open.last_mut() {
                    Some(builder) => {
                        if matches!(builder.open, Some((_, d)) if d == depth) {
                            builder.open = None;
                        }
                        builder.depth == depth
                    }
                    None => false,
                };
                if closes_entry {
                    if let Some(builder) = open.pop() {
                        doc.push(builder, source);
                    }
                }
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    root_closed = true;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if depth > 0 {
        return Err(DocumentError::Unclosed(depth));
    }
    if !root_closed {
        return Err(DocumentError::NoRoot);
    }

    Ok(doc)
}

/// Reads every attribute of `e` once, so duplicates and unquoted values
/// are reported even on elements whose attributes are otherwise unused.
pub(crate) fn check_attributes(e: &BytesStart<'_>) -> Result<(), AttrError> {
    e.attributes().try_for_each(|attr| attr.map(drop))
}

fn start_entry(
    ns: &ResolveResult<'_>,
    local: &[u8],
    depth: usize,
    order: usize,
) -> Option<EntryBuilder> {
    match (ns, local) {
        (ResolveResult::Unbound, b"item") => Some(EntryBuilder::new(Shape::Rss, depth, order)),
        (ResolveResult::Bound(Namespace(uri)), b"entry") if *uri == ATOM_NS => {
            Some(EntryBuilder::new(Shape::Atom, depth, order))
        }
        _ => None,
    }
}

/// Handles an element opened inside an entry. Only direct children in the
/// entry's own vocabulary are fields; anything else (extensions such as
/// `dc:creator`, nested markup) is skipped.
///
/// Returns `true` when the element now receives text.
fn open_child(
    builder: &mut EntryBuilder,
    ns: &ResolveResult<'_>,
    e: &BytesStart<'_>,
    depth: usize,
    decoder: Decoder,
) -> Result<bool, DocumentError> {
    if depth != builder.depth + 1 {
        return Ok(false);
    }

    let in_vocabulary = match (builder.shape, ns) {
        (Shape::Rss, ResolveResult::Unbound) => true,
        (Shape::Atom, ResolveResult::Bound(Namespace(uri))) => *uri == ATOM_NS,
        _ => false,
    };
    if !in_vocabulary {
        return Ok(false);
    }

    let Some(field) = Field::for_child(builder.shape, e.local_name().as_ref()) else {
        return Ok(false);
    };

    if !builder.claim(field) {
        return Ok(false);
    }

    if builder.shape == Shape::Atom && field == Field::Link {
        // Atom links carry their target in `href`, not in element text
        let mut href = String::new();
        for attr in e.attributes() {
            let attr = attr?;
            if attr.key.as_ref() == b"href" {
                href = attr.decode_and_unescape_value(decoder)?.into_owned();
                break;
            }
        }
        *builder.slot(field) = Some(href);
        return Ok(false);
    }

    builder.open = Some((field, depth));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "Example Blog";

    fn entry(title: &str, link: &str, date: &str, summary: &str) -> Entry {
        Entry {
            title: title.to_string(),
            link: link.to_string(),
            date: date.to_string(),
            summary: summary.to_string(),
            source: SOURCE.to_string(),
        }
    }

    #[test]
    fn test_parse_rss_item() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Channel</title>
  <item>
    <title>A</title>
    <link>http://x</link>
    <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
    <description>&lt;b&gt;Hi&lt;/b&gt; there</description>
  </item>
</channel></rss>"#;

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(
            entries,
            vec![entry("A", "http://x", "Mon, 01 Jan 2024 00:00:00 GMT", "Hi there")]
        );
    }

    #[test]
    fn test_parse_atom_entry() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Feed title is not an entry</title>
  <link href="https://example.com/"/>
  <entry>
    <title>Atom Post</title>
    <link rel="alternate" href="https://example.com/post"/>
    <link rel="edit" href="https://example.com/edit"/>
    <updated>2024-02-03T04:05:06Z</updated>
    <summary type="html">&lt;p&gt;Short &amp;amp; sweet&lt;/p&gt;</summary>
  </entry>
</feed>"#;

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(
            entries,
            vec![entry(
                "Atom Post",
                "https://example.com/post",
                "2024-02-03T04:05:06Z",
                "Short & sweet"
            )]
        );
    }

    #[test]
    fn test_parse_atom_prefixed_namespace() {
        let xml = r#"<a:feed xmlns:a="http://www.w3.org/2005/Atom">
  <a:entry>
    <a:title>Prefixed</a:title>
    <a:link href="https://example.com/p"/>
    <a:updated>2024-02-03T04:05:06Z</a:updated>
  </a:entry>
</a:feed>"#;

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Prefixed");
        assert_eq!(entries[0].link, "https://example.com/p");
    }

    #[test]
    fn test_entry_without_atom_namespace_ignored() {
        let xml = r#"<feed><entry><title>No ns</title><link href="https://x"/></entry></feed>"#;
        assert!(parse_feed(xml, SOURCE).is_empty());
    }

    #[test]
    fn test_namespaced_item_ignored() {
        // RSS 1.0 items live in the RSS 1.0 namespace and are not unqualified
        let xml = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <item><title>T</title><link>https://x</link></item>
</rdf:RDF>"#;
        assert!(parse_feed(xml, SOURCE).is_empty());
    }

    #[test]
    fn test_mixed_document_rss_first() {
        let xml = r#"<root xmlns:atom="http://www.w3.org/2005/Atom">
  <atom:entry><atom:title>Atom One</atom:title><atom:link href="https://a/1"/></atom:entry>
  <item><title>Rss One</title><link>https://r/1</link></item>
  <atom:entry><atom:title>Atom Two</atom:title><atom:link href="https://a/2"/></atom:entry>
  <item><title>Rss Two</title><link>https://r/2</link></item>
</root>"#;

        let titles: Vec<String> = parse_feed(xml, SOURCE)
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["Rss One", "Rss Two", "Atom One", "Atom Two"]);
    }

    #[test]
    fn test_missing_and_blank_title_default() {
        let xml = r#"<rss><channel>
  <item><link>https://x/1</link></item>
  <item><title>   </title><link>https://x/2</link></item>
  <item><title/><link>https://x/3</link></item>
</channel></rss>"#;

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.title == "Untitled"));
    }

    #[test]
    fn test_missing_fields_are_empty() {
        let xml = r#"<rss><channel><item><title>Only title</title></item></channel></rss>"#;

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(entries, vec![entry("Only title", "", "", "")]);
    }

    #[test]
    fn test_atom_link_without_href() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry><title>T</title><link rel="alternate"/></entry>
</feed>"#;

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(entries[0].link, "");
    }

    #[test]
    fn test_cdata_description() {
        let xml = r#"<rss><channel><item>
  <title><![CDATA[Tom & Jerry]]></title>
  <link>https://x</link>
  <description><![CDATA[<p>Some <em>rich</em>&nbsp;text</p>]]></description>
</item></channel></rss>"#;

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(entries[0].title, "Tom & Jerry");
        assert_eq!(entries[0].summary, "Some rich text");
    }

    #[test]
    fn test_first_occurrence_wins() {
        let xml = r#"<rss><channel><item>
  <title>First</title>
  <title>Second</title>
  <link>https://first</link>
  <link>https://second</link>
</item></channel></rss>"#;

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(entries[0].title, "First");
        assert_eq!(entries[0].link, "https://first");
    }

    #[test]
    fn test_extension_elements_ignored() {
        let xml = r#"<rss xmlns:atom="http://www.w3.org/2005/Atom" xmlns:dc="http://purl.org/dc/elements/1.1/"><channel><item>
  <atom:link href="https://wrong" rel="self"/>
  <dc:date>2020-01-01</dc:date>
  <title>T</title>
  <link>https://right</link>
</item></channel></rss>"#;

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(entries[0].link, "https://right");
        assert_eq!(entries[0].date, "");
    }

    #[test]
    fn test_xhtml_summary_children_not_text() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
  <title>T</title>
  <summary type="xhtml"><div xmlns="http://www.w3.org/1999/xhtml">nested</div></summary>
</entry></feed>"#;

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(entries[0].summary, "");
    }

    #[test]
    fn test_whitespace_trimmed() {
        let xml = "<rss><channel><item>\n  <title>\n  Spaced  \n</title>\n  <link>  https://x  </link>\n  <pubDate> 2024-01-01 </pubDate>\n</item></channel></rss>";

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(entries[0].title, "Spaced");
        assert_eq!(entries[0].link, "https://x");
        assert_eq!(entries[0].date, "2024-01-01");
    }

    #[test]
    fn test_document_order_preserved() {
        let mut xml = String::from("<rss><channel>");
        for i in 0..10 {
            xml.push_str(&format!("<item><title>{i}</title><link>https://x/{i}</link></item>"));
        }
        xml.push_str("</channel></rss>");

        let titles: Vec<String> = parse_feed(&xml, SOURCE).into_iter().map(|e| e.title).collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(titles, expected);
    }

    #[test]
    fn test_malformed_xml_yields_empty() {
        assert!(parse_feed("<not valid xml", SOURCE).is_empty());
        assert!(parse_feed("<rss><item><title>x</item></rss>", SOURCE).is_empty());
        assert!(parse_feed("", SOURCE).is_empty());
    }

    #[test]
    fn test_items_before_parse_error_are_discarded() {
        let xml =
            "<rss><channel><item><title>ok</title><link>https://x</link></item><item></channel></rss>";
        assert!(parse_feed(xml, SOURCE).is_empty());
    }

    #[test]
    fn test_undeclared_entity_yields_empty() {
        let xml = "<rss><channel><item><title>a&nbsp;b</title></item></channel></rss>";
        assert!(parse_feed(xml, SOURCE).is_empty());
    }

    #[test]
    fn test_self_closing_item_is_an_entry() {
        let xml = "<rss><channel><item/><item><title>x</title></item></channel></rss>";

        let entries = parse_feed(xml, SOURCE);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entry("Untitled", "", "", ""));
    }

    #[test]
    fn test_source_attached() {
        let xml = "<rss><channel><item><title>x</title></item></channel></rss>";
        let entries = parse_feed(xml, "Someone's Blog");
        assert_eq!(entries[0].source, "Someone's Blog");
    }

    #[test]
    fn test_content_after_root_yields_empty() {
        let item = "<item><title>x</title><link>https://x</link></item>";
        assert!(parse_feed(&format!("<rss>{item}</rss><junk/>"), SOURCE).is_empty());
        assert!(parse_feed(&format!("<rss>{item}</rss><rss></rss>"), SOURCE).is_empty());
        assert!(parse_feed(&format!("<rss>{item}</rss>trailing"), SOURCE).is_empty());
        // Whitespace and comments around the root are fine
        let ok = format!("<?xml version=\"1.0\"?>\n<rss>{item}</rss>\n<!-- end -->\n");
        assert_eq!(parse_feed(&ok, SOURCE).len(), 1);
    }

    #[test]
    fn test_nested_items_in_opening_order() {
        let xml = r#"<rss><channel>
  <item>
    <title>outer</title>
    <item><title>inner</title><link>https://x/inner</link></item>
    <link>https://x/outer</link>
  </item>
  <item><title>last</title></item>
</channel></rss>"#;

        let entries = parse_feed(xml, SOURCE);
        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["outer", "inner", "last"]);
        // Fields of the inner item stay with the inner item
        assert_eq!(entries[0].link, "https://x/outer");
        assert_eq!(entries[1].link, "https://x/inner");
    }

    #[test]
    fn test_malformed_attributes_yield_empty() {
        let duplicate = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
  <title>T</title><link href="https://a" href="https://b"/>
</entry></feed>"#;
        assert!(parse_feed(duplicate, SOURCE).is_empty());

        let unquoted = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
  <title>T</title><link href=https://a/>
</entry></feed>"#;
        assert!(parse_feed(unquoted, SOURCE).is_empty());

        // Attributes the parser never reads are still checked
        let elsewhere =
            r#"<rss version="2.0" version="2.0"><channel><item><title>T</title></item></channel></rss>"#;
        assert!(parse_feed(elsewhere, SOURCE).is_empty());
    }

    #[test]
    fn test_byte_order_mark_accepted() {
        let xml = "\u{feff}<rss><channel><item><title>bom</title></item></channel></rss>";
        assert_eq!(parse_feed(xml, SOURCE)[0].title, "bom");
    }
}
