//! Attribute extraction and value normalization for export tags.

use chrono::{DateTime, NaiveDateTime};
use regex::{Captures, Regex};
use std::sync::OnceLock;

static ATTRIBUTE_RE: OnceLock<Regex> = OnceLock::new();
static ENTITY_RE: OnceLock<Regex> = OnceLock::new();
static TIMESTAMP_RE: OnceLock<Regex> = OnceLock::new();
static BARE_OFFSET_RE: OnceLock<Regex> = OnceLock::new();

fn attribute_re() -> &'static Regex {
    ATTRIBUTE_RE.get_or_init(|| Regex::new(r#"(\w+)="([^"]+)""#).unwrap())
}

fn entity_re() -> &'static Regex {
    ENTITY_RE.get_or_init(|| Regex::new(r"&lt;|&gt;|&amp;|&quot;|&#39;").unwrap())
}

fn timestamp_re() -> &'static Regex {
    TIMESTAMP_RE.get_or_init(|| {
        Regex::new(
            r"^(\d{4}-\d{2}-\d{2})[ T](\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?)\s*(Z|[+-]\d{2}:?\d{2})?$",
        )
        .unwrap()
    })
}

fn bare_offset_re() -> &'static Regex {
    BARE_OFFSET_RE.get_or_init(|| Regex::new(r"\s?([+-]\d{2})(\d{2})$").unwrap())
}

/// Attributes of one tag, in the order they appear on the line.
///
/// A repeated key keeps its first position and takes the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pairs: Vec<(String, String)>,
}

impl Attributes {
    pub fn insert(&mut self, key: &str, value: &str) {
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.pairs.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Compact JSON object text with keys in tag order.
    ///
    /// This string feeds the record identity hash, so its exact bytes are
    /// part of the persisted id format.
    pub fn canonical_string(&self) -> String {
        let mut out = String::with_capacity(self.pairs.len() * 32);
        out.push('{');
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&serde_json::Value::String(key.clone()).to_string());
            out.push(':');
            out.push_str(&serde_json::Value::String(value.clone()).to_string());
        }
        out.push('}');
        out
    }
}

/// Extract every `key="value"` pair from a tag line.
///
/// Order and count are not assumed; pairs with empty values are skipped.
pub fn extract_attributes(tag: &str) -> Attributes {
    let mut attrs = Attributes::default();
    for caps in attribute_re().captures_iter(tag) {
        attrs.insert(&caps[1], &caps[2]);
    }
    attrs
}

/// Decode the five XML entities the export escapes in free text.
pub fn decode_html_entities(input: &str) -> String {
    entity_re()
        .replace_all(input, |caps: &Captures| match &caps[0] {
            "&lt;" => "<",
            "&gt;" => ">",
            "&amp;" => "&",
            "&quot;" => "\"",
            _ => "'",
        })
        .into_owned()
}

/// Rewrite an export timestamp into ISO-8601 form.
///
/// `2024-01-15 10:30:00 +0530` becomes `2024-01-15T10:30:00+05:30`.
/// Text that does not look like a date-time only has a trailing
/// colon-less offset fixed up.
pub fn normalize_timestamp(input: &str) -> String {
    let trimmed = input.trim();

    if let Some(caps) = timestamp_re().captures(trimmed) {
        let offset = match caps.get(3).map(|m| m.as_str()) {
            Some(off) if off.len() == 5 => format!("{}:{}", &off[..3], &off[3..]),
            Some(off) => off.to_string(),
            None => String::new(),
        };
        return format!("{}T{}{}", &caps[1], &caps[2], offset);
    }

    bare_offset_re().replace(trimmed, "$1:$2").into_owned()
}

/// Milliseconds since the Unix epoch for a normalized timestamp.
///
/// Timestamps without an offset are read as UTC.
pub fn timestamp_millis(normalized: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(normalized) {
        return Some(dt.timestamp_millis());
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(normalized, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Coerce attribute text into a number; anything non-numeric becomes NaN.
///
/// Follows the export's own coercion rules: surrounding whitespace is
/// ignored, blank text is zero, `0x`/`0o`/`0b` prefixes select a radix and
/// only the exact spelling `Infinity` names an infinite value.
pub fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        let head = trimmed.get(..2).map(str::to_ascii_lowercase);
        if head.as_deref() == Some(prefix) {
            return parse_radix(&trimmed[2..], radix);
        }
    }

    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // rejects "inf" and "nan", which str::parse would accept
        _ if trimmed
            .chars()
            .any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') =>
        {
            f64::NAN
        }
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

fn parse_radix(digits: &str, radix: u32) -> f64 {
    if digits.is_empty() {
        return f64::NAN;
    }
    digits
        .chars()
        .try_fold(0f64, |acc, c| {
            c.to_digit(radix).map(|d| acc * radix as f64 + d as f64)
        })
        .unwrap_or(f64::NAN)
}
