//! Text normalization around the remote call.
//! Cleans source texts before prompting and translations after parsing,
//! applies Persian typography fixes, and measures target-script coverage.

use std::sync::LazyLock;

use regex::Regex;
use whatlang::Script;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
// Control, private-use and pictographic chars; format chars other than ZWNJ/ZWJ.
static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{Cc}\p{Co}\p{Extended_Pictographic}\x{FE0F}]|[\p{Cf}&&[^\x{200C}\x{200D}]]")
        .unwrap()
});
static DOTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{2,}").unwrap());
static QUESTIONS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\?{2,}").unwrap());
static BANGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!{2,}").unwrap());

static MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+([،,.?!؟؛])").unwrap());
static OPEN_QUOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"«\s+").unwrap());
static CLOSE_QUOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+»").unwrap());
static MI_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(می|نمی)[ \t]+([\x{0600}-\x{06FF}]+)").unwrap());
static REPEATED_MARKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([؟!])[؟!]+").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").unwrap());

/// Normalize a text for prompting, memory keys and stored translations.
pub fn clean_text(text: &str) -> String {
    let replaced = text.replace('ي', "ی").replace('ك', "ک");
    let stripped = NOISE.replace_all(&replaced, "");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ");
    let out = DOTS.replace_all(&collapsed, "...");
    let out = QUESTIONS.replace_all(&out, "?");
    BANGS.replace_all(&out, "!").into_owned()
}

/// Whitespace-only normalization used for exact memory keys.
pub fn normalize_key(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Persian typography fixes applied to final translations.
pub fn polish_persian(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    let out = text.trim().replace('ي', "ی").replace('ك', "ک");
    let out = MULTI_SPACE.replace_all(&out, " ");
    let out = SPACE_BEFORE_PUNCT.replace_all(&out, "$1");
    let out = DOTS.replace_all(&out, "…");
    let out = OPEN_QUOTE.replace_all(&out, "«");
    let out = CLOSE_QUOTE.replace_all(&out, "»");
    let out = MI_PREFIX.replace_all(&out, "${1}\u{200C}${2}");
    let out = REPEATED_MARKS.replace_all(&out, "$1");
    let out: Vec<&str> = out.split('\n').map(str::trim).collect();
    BLANK_LINES.replace_all(&out.join("\n"), "\n").into_owned()
}

fn char_script(c: char) -> Option<Script> {
    let mut buf = [0u8; 4];
    whatlang::detect_script(c.encode_utf8(&mut buf))
}

/// Share of non-whitespace chars written in `script`, in [0, 1].
pub fn script_ratio(text: &str, script: Script) -> f64 {
    let mut total = 0usize;
    let mut hits = 0usize;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        total += 1;
        if char_script(c) == Some(script) {
            hits += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    hits as f64 / total as f64
}

/// True when most alphabetic chars of `text` are in `script`.
pub fn is_mostly_script(text: &str, script: Script) -> bool {
    let mut letters = 0usize;
    let mut hits = 0usize;
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if char_script(c) == Some(script) {
            hits += 1;
        }
    }
    letters > 0 && hits * 2 > letters
}

/// Script a target language is written in.
pub fn script_for_language(code: &str) -> Script {
    match code.to_ascii_lowercase().as_str() {
        "fa" | "ar" | "ur" | "ps" => Script::Arabic,
        "ru" | "uk" | "bg" | "sr" => Script::Cyrillic,
        "el" => Script::Greek,
        "he" => Script::Hebrew,
        "hi" | "mr" | "ne" => Script::Devanagari,
        "ko" => Script::Hangul,
        "zh" => Script::Mandarin,
        "th" => Script::Thai,
        _ => Script::Latin,
    }
}

/// Detects the dominant language of `text`.
/// Returns an ISO 639-1 code or None if detection is unreliable.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let info = whatlang::detect(text)?;
    if !info.is_reliable() {
        return None;
    }
    use whatlang::Lang::*;
    Some(match info.lang() {
        Eng => "en",
        Pes => "fa",
        Ara => "ar",
        Fra => "fr",
        Deu => "de",
        Spa => "es",
        Rus => "ru",
        Por => "pt",
        Ita => "it",
        Tur => "tr",
        Jpn => "ja",
        Kor => "ko",
        Cmn => "zh",
        _ => "other",
    })
}
