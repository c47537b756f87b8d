//! Recovers one translation per input from a free-text model response.
//!
//! Strategies run in a fixed order; each either yields a plausible result
//! (exactly the expected count) or passes to the next. The last strategy is
//! terminal. The final list is padded with empty strings or truncated to the
//! expected count; an empty string means "no translation for this index".

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};
use whatlang::Script;

use super::normalize::is_mostly_script;

static BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").unwrap());
/// List numbering as the prompt requests it (`1. `, `2) `). Leading dashes
/// and `3:00`-style times are dialogue content.
static ENUM_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s+").unwrap());
static PURE_ENUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    BlankLines,
    Lines,
    Separator,
    TargetScript,
}

enum Attempt {
    Parsed(Vec<String>),
    TryNext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub strategy: ParseStrategy,
    pub translations: Vec<String>,
}

impl ParsedResponse {
    /// Indices that produced a translation.
    pub fn produced(&self) -> usize {
        self.translations.iter().filter(|t| !t.is_empty()).count()
    }
}

pub struct ResponseParser {
    expected: usize,
    separator: Option<String>,
    script: Script,
}

fn strip_marker(line: &str) -> String {
    ENUM_MARKER.replace(line.trim(), "").trim().to_string()
}

fn strip_block(block: &str) -> String {
    block
        .lines()
        .filter(|l| !PURE_ENUM.is_match(l))
        .map(strip_marker)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

impl ResponseParser {
    pub fn new(expected: usize, separator: Option<String>, script: Script) -> Self {
        Self {
            expected,
            separator,
            script,
        }
    }

    fn chain(&self) -> Vec<ParseStrategy> {
        let mut chain = vec![ParseStrategy::BlankLines, ParseStrategy::Lines];
        if self.separator.is_some() {
            chain.push(ParseStrategy::Separator);
        }
        chain.push(ParseStrategy::TargetScript);
        chain
    }

    fn plausible(&self, items: Vec<String>) -> Attempt {
        if items.len() == self.expected {
            Attempt::Parsed(items)
        } else {
            Attempt::TryNext
        }
    }

    fn attempt(&self, strategy: ParseStrategy, response: &str) -> Attempt {
        match strategy {
            ParseStrategy::BlankLines => {
                let items: Vec<String> = BLANK_LINE
                    .split(response)
                    .map(strip_block)
                    .filter(|b| !b.is_empty())
                    .collect();
                self.plausible(items)
            }
            ParseStrategy::Lines => {
                let items: Vec<String> = response
                    .lines()
                    .filter(|l| !l.trim().is_empty() && !PURE_ENUM.is_match(l))
                    .map(strip_marker)
                    .filter(|l| !l.is_empty())
                    .collect();
                self.plausible(items)
            }
            ParseStrategy::Separator => {
                let Some(sep) = self.separator.as_deref() else {
                    return Attempt::TryNext;
                };
                let items: Vec<String> = response
                    .split(sep)
                    .map(strip_block)
                    .filter(|b| !b.is_empty())
                    .collect();
                self.plausible(items)
            }
            ParseStrategy::TargetScript => Attempt::Parsed(
                response
                    .lines()
                    .map(strip_marker)
                    .filter(|l| is_mostly_script(l, self.script))
                    .collect(),
            ),
        }
    }

    pub fn parse(&self, response: &str) -> ParsedResponse {
        let response = response.trim();
        for strategy in self.chain() {
            if let Attempt::Parsed(mut translations) = self.attempt(strategy, response) {
                if translations.len() != self.expected {
                    warn!(
                        expected = self.expected,
                        got = translations.len(),
                        "response count mismatch, padding/truncating"
                    );
                }
                translations.resize(self.expected, String::new());
                debug!(strategy = ?strategy, count = self.expected, "response parsed");
                return ParsedResponse {
                    strategy,
                    translations,
                };
            }
        }
        // The chain always ends with a terminal strategy.
        ParsedResponse {
            strategy: ParseStrategy::TargetScript,
            translations: vec![String::new(); self.expected],
        }
    }
}
