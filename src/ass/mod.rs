//! Advanced SubStation Alpha documents: line classification, dialogue payload
//! extraction and lossless reassembly.
//!
//! A dialogue line is `Dialogue: f0,f1,...,f8,payload` where the payload may
//! itself contain commas. Fields 0-8 are carried through byte for byte; only
//! the payload is ever rewritten.

pub mod markup;

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

pub use markup::{MarkupSpan, SpanKind};

const DIALOGUE_MARKER: &str = "Dialogue:";
const STYLE_MARKER: &str = "Style:";
/// Commas before the payload.
const PAYLOAD_FIELD: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Dialogue,
    Style,
    Info,
    Other,
}

/// Translatable part of a dialogue line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialogue {
    /// Payload without markup, trimmed. Never empty.
    pub text: String,
    pub spans: Vec<MarkupSpan>,
    /// Byte index in the raw line where the payload starts.
    payload_start: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssLine {
    pub kind: LineKind,
    /// The line as read, including a trailing `\r` if present.
    pub raw_line: String,
    /// Only for dialogue lines with translatable text.
    pub dialogue: Option<Dialogue>,
}

#[derive(Debug, Clone, Default)]
pub struct AssDocument {
    lines: Vec<AssLine>,
}

fn classify_line(trimmed: &str) -> LineKind {
    if trimmed.starts_with(DIALOGUE_MARKER) {
        LineKind::Dialogue
    } else if trimmed.starts_with(STYLE_MARKER) {
        LineKind::Style
    } else if trimmed.starts_with('[') || trimmed.contains(':') {
        LineKind::Info
    } else {
        LineKind::Other
    }
}

/// Byte index just past the ninth comma, if the line has that many.
fn payload_start(line: &str) -> Option<usize> {
    line.match_indices(',')
        .nth(PAYLOAD_FIELD - 1)
        .map(|(i, _)| i + 1)
}

fn parse_line(raw: &str) -> AssLine {
    let kind = classify_line(raw.trim());
    let dialogue = (kind == LineKind::Dialogue)
        .then(|| {
            let body = raw.strip_suffix('\r').unwrap_or(raw);
            let start = payload_start(body)?;
            let (text, spans) = markup::extract(&body[start..]);
            (!text.is_empty()).then_some(Dialogue {
                text,
                spans,
                payload_start: start,
            })
        })
        .flatten();

    AssLine {
        kind,
        raw_line: raw.to_string(),
        dialogue,
    }
}

pub fn parse_document(content: &str) -> AssDocument {
    let lines: Vec<AssLine> = content.split('\n').map(parse_line).collect();
    let dialogues = lines.iter().filter(|l| l.dialogue.is_some()).count();
    debug!(lines = lines.len(), dialogues, "ass_parsed");
    AssDocument { lines }
}

/// Rebuild `raw_line` with its payload replaced by `translated`, markup
/// reinserted proportionally. Newlines in the translation become `\N`.
pub fn reconstruct_dialogue(raw_line: &str, dialogue: &Dialogue, translated: &str) -> String {
    let (body, cr) = match raw_line.strip_suffix('\r') {
        Some(body) => (body, "\r"),
        None => (raw_line, ""),
    };
    let replacement = markup::strip(translated.trim()).replace("\r\n", "\n");
    let payload = markup::reinject(
        &replacement,
        &dialogue.spans,
        dialogue.text.chars().count(),
    )
    .replace('\n', "\\N");

    let mut out = String::with_capacity(dialogue.payload_start + payload.len() + 1);
    out.push_str(&body[..dialogue.payload_start]);
    out.push_str(&payload);
    out.push_str(cr);
    out
}

/// Every line passes through verbatim unless it is a dialogue whose text has
/// an entry in `translations`.
pub fn reconstruct_document(document: &AssDocument, translations: &HashMap<String, String>) -> String {
    document
        .lines
        .iter()
        .map(|line| match &line.dialogue {
            Some(d) => match translations.get(&d.text) {
                Some(translated) => reconstruct_dialogue(&line.raw_line, d, translated),
                None => line.raw_line.clone(),
            },
            None => line.raw_line.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl AssDocument {
    pub fn parse(content: &str) -> Self {
        parse_document(content)
    }

    pub fn lines(&self) -> &[AssLine] {
        &self.lines
    }

    pub fn dialogues(&self) -> impl Iterator<Item = (&AssLine, &Dialogue)> {
        self.lines
            .iter()
            .filter_map(|l| l.dialogue.as_ref().map(|d| (l, d)))
    }

    pub fn dialogue_count(&self) -> usize {
        self.dialogues().count()
    }

    /// Distinct dialogue texts in document order.
    pub fn unique_texts(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.dialogues()
            .map(|(_, d)| d.text.as_str())
            .filter(|t| seen.insert(*t))
            .map(str::to_string)
            .collect()
    }

    pub fn reconstruct(&self, translations: &HashMap<String, String>) -> String {
        reconstruct_document(self, translations)
    }
}
