//! Text cleanup shared by the feed parser and the content extractor.
//!
//! Everything that ends up in a `news` row passes through here: HTML is
//! reduced to plain text, control characters are scrubbed, whitespace is
//! normalized, and bodies are capped by char count rather than bytes.

use once_cell::sync::Lazy;
use regex::Regex;

static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x?[0-9a-fA-F]+|[a-zA-Z]+);").unwrap());
static HORIZONTAL_WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\x{00A0}]+").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip all markup from an HTML fragment and return decoded plain text.
///
/// `ammonia` with an empty allow-list removes every tag while keeping the
/// text nodes entity-escaped; the entity pass then decodes those back into
/// plain characters.
pub fn html_to_text(html: &str) -> String {
    let stripped = ammonia::Builder::empty().clean(html).to_string();
    let decoded = decode_entities(&stripped);
    collapse_whitespace(decoded.trim())
}

fn decode_named(name: &str) -> Option<&'static str> {
    match name {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        "nbsp" => Some(" "),
        "ndash" => Some("\u{2013}"),
        "mdash" => Some("\u{2014}"),
        "laquo" => Some("\u{00AB}"),
        "raquo" => Some("\u{00BB}"),
        "hellip" => Some("\u{2026}"),
        _ => None,
    }
}

/// Decode numeric and the common named HTML entities.
pub fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures| {
            let body = &caps[1];
            if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| caps[0].to_string())
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>()
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| caps[0].to_string())
            } else {
                decode_named(body)
                    .map(String::from)
                    .unwrap_or_else(|| caps[0].to_string())
            }
        })
        .to_string()
}

/// Collapse all whitespace runs (including newlines) into single spaces.
/// Used for single-line fields: titles, descriptions, authors.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace control characters (keeping newlines) with spaces and trim.
/// Invalid input never reaches the store as anything but printable text.
pub fn scrub_control_chars(text: &str) -> String {
    let scrubbed: String = text
        .chars()
        .map(|c| {
            if c == '\n' {
                c
            } else if c.is_control() || c == '\u{FFFD}' {
                ' '
            } else {
                c
            }
        })
        .collect();
    scrubbed.trim().to_string()
}

/// Normalize a multi-line body: CRLF to LF, horizontal whitespace runs to a
/// single space, runs of 3+ blank lines to one blank line, trimmed edges.
pub fn normalize_body(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = HORIZONTAL_WS_RE.replace_all(&unified, " ");
    let lines: Vec<&str> = collapsed.split('\n').map(str::trim_end).collect();
    let rejoined = lines.join("\n");
    BLANK_LINES_RE.replace_all(&rejoined, "\n\n").trim().to_string()
}

/// Truncate to at most `max_runes` chars, ending with an ellipsis when the
/// cap is hit. Counts chars, never bytes.
pub fn truncate_runes(text: &str, max_runes: usize) -> String {
    if max_runes == 0 {
        return String::new();
    }
    let count = text.chars().count();
    if count <= max_runes {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_runes - 1).collect();
    out.push('\u{2026}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text_strips_tags_and_decodes() {
        let html = "<p>Rock &amp; roll <b>news</b> &#8212; today&nbsp;only</p>";
        assert_eq!(html_to_text(html), "Rock & roll news \u{2014} today only");
    }

    #[test]
    fn test_html_to_text_drops_scripts() {
        let html = "<div>Visible<script>alert('x')</script></div>";
        assert_eq!(html_to_text(html), "Visible");
    }

    #[test]
    fn test_decode_numeric_entities() {
        assert_eq!(decode_entities("&#1052;&#1072;&#1090;&#1095;"), "Матч");
        assert_eq!(decode_entities("&#x41;&#x42;"), "AB");
    }

    #[test]
    fn test_unknown_entity_left_alone() {
        assert_eq!(decode_entities("&bogus;"), "&bogus;");
    }

    #[test]
    fn test_scrub_control_chars() {
        assert_eq!(scrub_control_chars("a\u{0000}b\tc"), "a b c");
        assert_eq!(scrub_control_chars("  line\nnext  "), "line\nnext");
    }

    #[test]
    fn test_normalize_body_collapses_blank_runs() {
        let body = "first\r\n\r\n\r\n\r\nsecond   third\t\tfourth";
        assert_eq!(normalize_body(body), "first\n\nsecond third fourth");
    }

    #[test]
    fn test_truncate_runes_counts_chars_not_bytes() {
        // Five Cyrillic chars are ten bytes; a cap of 5 keeps them all.
        assert_eq!(truncate_runes("Матчи", 5), "Матчи");
        let cut = truncate_runes("Матчи дня", 5);
        assert_eq!(cut.chars().count(), 5);
        assert!(cut.ends_with('\u{2026}'));
    }

    #[test]
    fn test_truncate_runes_zero_cap() {
        assert_eq!(truncate_runes("anything", 0), "");
    }
}
