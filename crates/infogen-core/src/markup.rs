//! Extraction of embedded SVG markup from free model text.
//!
//! Models asked for a diagram frequently answer with prose wrapped around an
//! SVG document, sometimes inside a code fence, sometimes cut off by the token
//! limit. Strategies, first match wins:
//!
//! 1. direct tag scan (balanced `<svg>` ... `</svg>`)
//! 2. fenced code block whose body is a complete SVG document
//! 3. truncated document recovery (synthesized closing tag)
//!
//! Every extracted document is then normalized: namespace injected when
//! missing, stray fence delimiters removed, whitespace trimmed.

use lazy_static::lazy_static;
use regex::Regex;

/// Namespace every standalone SVG document must declare.
pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

const CLOSING_TAG: &str = "</svg>";

lazy_static! {
    /// Opening tag: `<svg` followed by whitespace, `>`, `/` or end of input.
    static ref OPEN_TAG: Regex = Regex::new(r"(?i)<svg(?:[\s/>]|$)").unwrap();

    static ref CLOSE_TAG: Regex = Regex::new(r"(?i)</svg\s*>").unwrap();

    /// Code fence with an optional `xml` / `svg` language tag.
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[ \t]*(?i:xml|svg)?[ \t]*\r?\n(.*?)```").unwrap();

    /// XML prolog, doctype and comments allowed ahead of the root element.
    static ref PROLOG: Regex =
        Regex::new(r"(?s)\A(?:\s*(?:<\?xml.*?\?>|<!DOCTYPE[^>]*>|<!--.*?-->))*\s*").unwrap();

    static ref FENCE_DELIMITER: Regex = Regex::new(r"```[A-Za-z]*").unwrap();

    static ref XMLNS_ATTR: Regex = Regex::new(r"(?i)\sxmlns\s*=").unwrap();
}

/// Extract and normalize an SVG document from `text`.
///
/// Returns `None` when the text contains no opening `<svg` tag.
pub fn extract(text: &str) -> Option<String> {
    let raw = direct_span(text)
        .map(|(start, end)| text[start..end].to_string())
        .or_else(|| fenced_document(text).map(str::to_string))
        .or_else(|| truncated_document(text))?;

    let markup = normalize(&raw);
    tracing::trace!(len = markup.len(), "Extracted vector markup");
    Some(markup)
}

/// Byte range of the first complete `<svg>` ... `</svg>` element.
///
/// Scanning starts at each opening tag in turn, so an unbalanced `<svg>`
/// mentioned in prose ahead of the real document does not swallow it.
fn direct_span(text: &str) -> Option<(usize, usize)> {
    OPEN_TAG
        .find_iter(text)
        .find_map(|open| balanced_span(text, open.start()))
}

/// Range from the opening tag at `start` through its matching closing tag.
///
/// Nested `<svg>` elements are balanced, so the range always ends at the
/// closing tag that corresponds to the tag at `start`.
fn balanced_span(text: &str, start: usize) -> Option<(usize, usize)> {
    let mut depth = 0usize;
    let mut cursor = start;

    loop {
        let next_open = OPEN_TAG.find_at(text, cursor);
        let next_close = CLOSE_TAG.find_at(text, cursor)?;

        match next_open {
            Some(open) if open.start() < next_close.start() => {
                depth += 1;
                cursor = open.end();
            }
            _ => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some((start, next_close.end()));
                }
                cursor = next_close.end();
            }
        }
    }
}

/// Body of the first fenced block that holds exactly one complete document.
fn fenced_document(text: &str) -> Option<&str> {
    FENCED_BLOCK.captures_iter(text).find_map(|caps| {
        let body = caps.get(1)?.as_str().trim();
        let root_start = PROLOG.find(body).map_or(0, |m| m.end());
        match direct_span(body) {
            Some((start, end)) if start == root_start && end == body.len() => Some(body),
            _ => None,
        }
    })
}

/// Everything from the opening tag to the end, closed with a synthetic tag.
fn truncated_document(text: &str) -> Option<String> {
    let start = OPEN_TAG.find(text)?.start();
    if CLOSE_TAG.is_match(&text[start..]) {
        return None;
    }
    let mut body = text[start..].trim_end().to_string();

    // A dangling fence after a cut-off document belongs to the fence, not the markup.
    while body.ends_with('`') {
        body.pop();
    }
    let mut body = body.trim_end().to_string();

    // The opening tag itself may have been cut off mid-attribute.
    if !body.contains('>') {
        body.push('>');
    }

    body.push_str(CLOSING_TAG);
    Some(body)
}

/// Strip fences, trim and ensure the root element declares the SVG namespace.
fn normalize(markup: &str) -> String {
    let stripped = FENCE_DELIMITER.replace_all(markup, "");
    let trimmed = stripped.trim();

    let Some(open) = OPEN_TAG.find(trimmed) else {
        return trimmed.to_string();
    };

    let tag_end = trimmed[open.start()..]
        .find('>')
        .map_or(trimmed.len(), |offset| open.start() + offset);
    let opening_tag = &trimmed[open.start()..tag_end];

    if XMLNS_ATTR.is_match(opening_tag) {
        return trimmed.to_string();
    }

    // Insert right after the `<svg` name.
    let insert_at = open.start() + "<svg".len();
    let mut out = String::with_capacity(trimmed.len() + SVG_NAMESPACE.len() + 10);
    out.push_str(&trimmed[..insert_at]);
    out.push_str(&format!(" xmlns=\"{}\"", SVG_NAMESPACE));
    out.push_str(&trimmed[insert_at..]);
    out
}
