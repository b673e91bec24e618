//! Date normalization for feed entries.
//!
//! RSS `pubDate` values are (mostly) RFC 2822 mail dates, Atom `updated`
//! values are (mostly) ISO 8601. Both are reduced to a UTC instant so that
//! entries from different feeds can be ordered against each other, and to a
//! single canonical string for the output artifact.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Timelike, Utc};

/// Mail date layouts tried once the weekday is dropped and the zone is
/// rewritten as a numeric offset. `%b` also accepts full month names.
const LENIENT_RFC2822_FORMATS: &[&str] = &["%d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M %z"];

/// Zone names with a known offset. Any other alphabetic zone reads as UTC.
const MAIL_ZONES: &[(&str, &str)] = &[
    ("UT", "+0000"),
    ("UTC", "+0000"),
    ("GMT", "+0000"),
    ("Z", "+0000"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
];

const WEEKDAYS: &[&str] = &["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// ISO 8601 layouts carrying an explicit offset that RFC 3339 rejects
/// (offset without colon, minutes-only precision).
const OFFSET_ISO8601_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
];

/// Zone-less ISO 8601 layouts, read as UTC.
const NAIVE_ISO8601_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses a feed date string into a UTC instant.
///
/// The RFC 2822 family is tried first, then the ISO 8601 family. A trailing
/// `Z` is an explicit zero offset. Values without any zone designator are
/// taken to be UTC. Surrounding whitespace is ignored.
///
/// Returns `None` when neither family matches, including for the empty
/// string.
///
/// # Examples
///
/// ```
/// use rss_seed::feed::parse_date;
///
/// let rfc = parse_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
/// let iso = parse_date("2024-01-01T00:00:00Z").unwrap();
/// assert_eq!(rfc, iso);
///
/// assert!(parse_date("not a date").is_none());
/// ```
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    parse_rfc2822(value).or_else(|| parse_iso8601(value))
}

fn parse_rfc2822(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }

    parse_rfc2822_lenient(value)
}

/// Mail dates as found in the wild: the weekday is ignored (and may be
/// spelled out or wrong), the zone may be missing, a name such as `UTC` or
/// `CEST`, or an offset written `+01:00`. Missing and unknown zones are UTC.
fn parse_rfc2822_lenient(value: &str) -> Option<DateTime<Utc>> {
    let mut tokens: Vec<&str> = value.split_whitespace().collect();
    if tokens.first().is_some_and(|token| is_weekday(token)) {
        tokens.remove(0);
    }
    // Trailing comment such as `(CEST)`
    if tokens.last().is_some_and(|token| token.starts_with('(') && token.ends_with(')')) {
        tokens.pop();
    }

    let offset = match tokens.last().and_then(|token| zone_offset(token)) {
        Some(offset) => {
            tokens.pop();
            offset
        }
        None => "+0000".to_string(),
    };

    let normalized = format!("{} {offset}", tokens.join(" "));
    LENIENT_RFC2822_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&normalized, fmt).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn is_weekday(token: &str) -> bool {
    if token.ends_with(',') {
        return true;
    }
    token.chars().all(|c| c.is_ascii_alphabetic())
        && token
            .get(..3)
            .is_some_and(|prefix| WEEKDAYS.contains(&prefix.to_ascii_lowercase().as_str()))
}

/// Reads a trailing zone token as a `+hhmm` offset. Returns `None` when the
/// token is not a zone at all (e.g. it is the time of day).
fn zone_offset(token: &str) -> Option<String> {
    if token.chars().all(|c| c.is_ascii_alphabetic()) {
        let offset = MAIL_ZONES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(token))
            .map_or("+0000", |(_, offset)| *offset);
        return Some(offset.to_string());
    }

    let (sign, rest) = token.split_at_checked(1)?;
    if sign != "+" && sign != "-" {
        return None;
    }
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("{sign}{digits}"))
    } else {
        None
    }
}

fn parse_iso8601(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(dt) = OFFSET_ISO8601_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(value, fmt).ok())
    {
        return Some(dt.with_timezone(&Utc));
    }

    // A literal `Z` on an otherwise zone-less layout (e.g. minutes only)
    let naive_part = value
        .strip_suffix('Z')
        .or_else(|| value.strip_suffix('z'))
        .unwrap_or(value);

    if let Some(naive) = NAIVE_ISO8601_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive_part, fmt).ok())
    {
        return Some(naive.and_utc());
    }

    NaiveDate::parse_from_str(naive_part, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Formats an instant in the canonical output form.
///
/// Whole seconds render as `2024-01-01T00:00:00Z`. Instants with a
/// sub-second part render with microsecond precision, e.g.
/// `2024-01-01T00:00:00.250000Z`. Nanoseconds below one microsecond are
/// truncated.
pub fn format_utc(dt: &DateTime<Utc>) -> String {
    let micros = dt.nanosecond() / 1_000;
    if micros == 0 {
        dt.to_rfc3339_opts(SecondsFormat::Secs, true)
    } else {
        let truncated = dt
            .with_nanosecond(micros * 1_000)
            .unwrap_or(*dt);
        truncated.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// Rewrites a raw date string into canonical form.
///
/// Returns `None` when the value is unparseable; callers keep the raw
/// string in that case.
pub fn normalize_date(value: &str) -> Option<String> {
    parse_date(value).map(|dt| format_utc(&dt))
}

/// Ordering key for an entry date.
///
/// Unparseable values map to [`DateTime::<Utc>::MIN_UTC`], so they rank
/// older than every parseable date and can never surface as newest.
pub fn sort_key(value: &str) -> DateTime<Utc> {
    parse_date(value).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
