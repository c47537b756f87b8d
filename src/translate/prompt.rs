//! Prompt construction for one batch of subtitle texts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    Movie,
    Series,
    Documentary,
    Animation,
    Comedy,
    Drama,
    Action,
}

impl Genre {
    pub fn as_str(self) -> &'static str {
        match self {
            Genre::Movie => "movie",
            Genre::Series => "series",
            Genre::Documentary => "documentary",
            Genre::Animation => "animation",
            Genre::Comedy => "comedy",
            Genre::Drama => "drama",
            Genre::Action => "action",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Genre::Movie => "a feature film",
            Genre::Series => "a TV series",
            Genre::Documentary => "a documentary",
            Genre::Animation => "an animation",
            Genre::Comedy => "a comedy",
            Genre::Drama => "a drama",
            Genre::Action => "an action title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Formality {
    Formal,
    Informal,
    Neutral,
}

impl Formality {
    fn instruction(self) -> &'static str {
        match self {
            Formality::Formal => "formal and polite",
            Formality::Informal => "informal, conversational and warm",
            Formality::Neutral => "balanced, neither stiff nor slangy",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub genre: Genre,
    pub formality: Formality,
    pub preserve_names: bool,
    pub contextual_translation: bool,
    pub quality_check: bool,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            genre: Genre::Movie,
            formality: Formality::Neutral,
            preserve_names: false,
            contextual_translation: true,
            quality_check: false,
        }
    }
}

/// Everything one prompt needs besides the texts.
#[derive(Debug, Clone, Copy)]
pub struct PromptOptions<'a> {
    pub target_language: &'a str,
    pub quality: &'a QualitySettings,
    pub context: Option<&'a str>,
    /// Out-of-band separator the model is asked to put between translations.
    pub separator: Option<&'a str>,
}

/// Numbered list, 1-based: `1. text`.
pub fn number_texts(texts: &[String]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(texts: &[String], opts: &PromptOptions<'_>) -> String {
    let lang = opts.target_language;
    let mut prompt = format!(
        "You are a professional subtitle translator. Translate the subtitle lines below \
         into natural, fluent {lang}.\n\n\
         Content: {genre}\n\
         Register: {register}\n\n\
         Subtitle rules:\n\
         - at most 42 characters per line and at most 2 lines\n\
         - readable within 3-4 seconds\n\
         - keep the emotion of each line; prefer short everyday words\n\
         - nothing may stay untranslated\n",
        genre = opts.quality.genre.description(),
        register = opts.quality.formality.instruction(),
    );

    if opts.quality.preserve_names {
        prompt.push_str("- keep personal names, places and brands in their original spelling\n");
    } else {
        prompt.push_str("- transliterate personal names, places and brands into the target script\n");
    }

    if let Some(context) = opts.context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\nFor consistency, earlier translations:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }

    prompt.push_str("\nLines to translate:\n");
    prompt.push_str(&number_texts(texts));
    prompt.push_str("\n\n");

    match opts.separator {
        Some(sep) => prompt.push_str(&format!(
            "Answer with exactly {n} translations in the same order, separated by a line \
             containing only {sep}. No numbering, no explanations.",
            n = texts.len(),
        )),
        None => prompt.push_str(&format!(
            "Answer with exactly {n} numbered {lang} translations in the same order \
             (\"1. ...\"), one per line. No explanations.",
            n = texts.len(),
        )),
    }
    prompt
}
