//! Inline override blocks (`{\b1}`, `{\i0}`, `{\pos(10,20)}`...).
//!
//! Extraction records each block at its char offset in the markup-free,
//! trimmed text. Reinjection maps those offsets proportionally onto a
//! replacement text of a different length; it is a positional heuristic and
//! keeps the original relative order of the blocks.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^}]*\}").unwrap());
static TOGGLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([bius])(\d+)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Opening,
    Closing,
    Standalone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkupSpan {
    /// The block verbatim, braces included.
    pub token: String,
    /// Char offset in the trimmed markup-free text.
    pub offset: usize,
    pub kind: SpanKind,
}

fn directive_kind(directive: &str) -> Option<SpanKind> {
    if directive == "r" {
        return Some(SpanKind::Closing);
    }
    let caps = TOGGLE.captures(directive)?;
    let on = caps[2].bytes().any(|b| b != b'0');
    Some(if on { SpanKind::Opening } else { SpanKind::Closing })
}

/// Opening when every directive switches a style on, closing when every one
/// switches off (or resets), standalone otherwise.
pub fn classify(token: &str) -> SpanKind {
    let inner = token
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(token);
    let mut kinds = inner
        .split('\\')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(directive_kind);

    let Some(Some(first)) = kinds.next() else {
        return SpanKind::Standalone;
    };
    if kinds.all(|k| k == Some(first)) {
        first
    } else {
        SpanKind::Standalone
    }
}

/// Split a payload into its trimmed markup-free text and the blocks removed
/// from it.
pub fn extract(payload: &str) -> (String, Vec<MarkupSpan>) {
    let mut clean = String::with_capacity(payload.len());
    let mut clean_chars = 0usize;
    let mut raw_spans: Vec<(String, usize)> = Vec::new();
    let mut last = 0usize;

    for m in BLOCK.find_iter(payload) {
        let between = &payload[last..m.start()];
        clean.push_str(between);
        clean_chars += between.chars().count();
        raw_spans.push((m.as_str().to_string(), clean_chars));
        last = m.end();
    }
    clean.push_str(&payload[last..]);

    let leading = clean.chars().take_while(|c| c.is_whitespace()).count();
    let text = clean.trim().to_string();
    let len = text.chars().count();

    let spans = raw_spans
        .into_iter()
        .map(|(token, offset)| MarkupSpan {
            kind: classify(&token),
            offset: offset.saturating_sub(leading).min(len),
            token,
        })
        .collect();
    (text, spans)
}

/// Remove any blocks from `text`.
pub fn strip(text: &str) -> String {
    BLOCK.replace_all(text, "").into_owned()
}

/// Insert `spans` into `translated` at `round(offset * ratio)`, where ratio is
/// the length of `translated` over `original_len` (both in chars).
pub fn reinject(translated: &str, spans: &[MarkupSpan], original_len: usize) -> String {
    if spans.is_empty() {
        return translated.to_string();
    }
    let mut chars: Vec<char> = translated.chars().collect();
    let len = chars.len();
    let ratio = len as f64 / original_len.max(1) as f64;

    // Descending offset; on ties the later span goes in first so the earlier
    // one ends up in front of it.
    let mut order: Vec<usize> = (0..spans.len()).collect();
    order.sort_by(|&a, &b| spans[b].offset.cmp(&spans[a].offset).then(b.cmp(&a)));

    for i in order {
        let span = &spans[i];
        let at = ((span.offset as f64 * ratio).round() as usize).min(len);
        chars.splice(at..at, span.token.chars());
    }
    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert_eq!(classify(r"{\b1}"), SpanKind::Opening);
        assert_eq!(classify(r"{\i1\u1}"), SpanKind::Opening);
        assert_eq!(classify(r"{\b0}"), SpanKind::Closing);
        assert_eq!(classify(r"{\r}"), SpanKind::Closing);
        assert_eq!(classify(r"{\i0\b0}"), SpanKind::Closing);
        assert_eq!(classify(r"{\b1\i0}"), SpanKind::Standalone);
        assert_eq!(classify(r"{\pos(10,20)}"), SpanKind::Standalone);
        assert_eq!(classify(r"{\rAlt}"), SpanKind::Standalone);
        assert_eq!(classify("{}"), SpanKind::Standalone);
        assert_eq!(classify("{note}"), SpanKind::Standalone);
    }

    #[test]
    fn offsets_are_in_clean_text() {
        let (text, spans) = extract(r"Hello {\b1}world{\b0}!");
        assert_eq!(text, "Hello world!");
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].token.as_str(), spans[0].offset), (r"{\b1}", 6));
        assert_eq!((spans[1].token.as_str(), spans[1].offset), (r"{\b0}", 11));
        assert_eq!(spans[0].kind, SpanKind::Opening);
        assert_eq!(spans[1].kind, SpanKind::Closing);
    }

    #[test]
    fn offsets_account_for_trimmed_whitespace() {
        let (text, spans) = extract(r"{\an8}  Up here  {\b0}");
        assert_eq!(text, "Up here");
        assert_eq!(spans[0].offset, 0);
        assert_eq!(spans[1].offset, 7);
    }

    #[test]
    fn markup_only_payload_is_empty() {
        let (text, spans) = extract(r"{\pos(1,1)}  {\b1}");
        assert!(text.is_empty());
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|s| s.offset == 0));
    }

    #[test]
    fn reinject_scales_offsets() {
        let (_, spans) = extract(r"ab{\b1}cd");
        // ratio 2: offset 2 -> 4
        assert_eq!(reinject("12345678", &spans, 4), r"1234{\b1}5678");
        // shorter translation clamps into range
        assert_eq!(reinject("x", &spans, 4), r"x{\b1}");
    }

    #[test]
    fn reinject_keeps_original_order_on_ties() {
        let (_, spans) = extract(r"{\an8}{\b1}Hi{\b0}{\i1}{\i0}");
        let out = reinject("سلام", &spans, 2);
        assert_eq!(out, r"{\an8}{\b1}سلام{\b0}{\i1}{\i0}");
    }

    #[test]
    fn reinject_counts_chars_not_bytes() {
        let (_, spans) = extract(r"Hello {\b1}world{\b0}!");
        let out = reinject("سلام دنیا!", &spans, 12);
        assert_eq!(out.matches(r"{\b1}").count(), 1);
        assert_eq!(out.matches(r"{\b0}").count(), 1);
        assert!(out.find(r"{\b1}").unwrap() < out.find(r"{\b0}").unwrap());
        assert_eq!(strip(&out), "سلام دنیا!");
    }
}
