//! Document flow: parse → unique texts → orchestrated run → reconstruct.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ass::AssDocument;
use crate::metrics::RunSummary;
use crate::orchestrator::{Orchestrator, Session};
use crate::progress::RunObserver;
use crate::translate::normalize::detect_language;
use crate::translate::TranslateError;

const OUTPUT_SUFFIX: &str = "_persian";

#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    /// The rebuilt document. Untranslated dialogue keeps its original text.
    pub content: String,
    pub dialogue_lines: usize,
    /// Unique dialogue texts submitted.
    pub requested: usize,
    /// Unique dialogue texts that came back translated.
    pub translated: usize,
    pub summary: RunSummary,
}

impl DocumentOutcome {
    pub fn is_complete(&self) -> bool {
        self.translated == self.requested
    }
}

pub async fn translate_document(
    orchestrator: &Orchestrator,
    session: &mut Session,
    content: &str,
    cancel: CancellationToken,
    observer: &dyn RunObserver,
) -> Result<DocumentOutcome, TranslateError> {
    let document = AssDocument::parse(content);
    let texts = document.unique_texts();
    if texts.is_empty() {
        return Err(TranslateError::InvalidInput(
            "no translatable dialogue lines found".into(),
        ));
    }
    let dialogue_lines = document.dialogue_count();
    let sample: String = texts.iter().take(50).map(String::as_str).collect::<Vec<_>>().join(" ");
    info!(
        dialogue_lines,
        unique = texts.len(),
        source_lang = detect_language(&sample).unwrap_or("unknown"),
        "document_loaded"
    );

    let report = orchestrator
        .translate_texts(session, &texts, cancel, observer)
        .await?;

    let content = document.reconstruct(&report.translations);
    let translated = texts
        .iter()
        .filter(|t| report.translations.contains_key(*t))
        .count();
    info!(requested = texts.len(), translated, "document_reconstructed");

    Ok(DocumentOutcome {
        content,
        dialogue_lines,
        requested: texts.len(),
        translated,
        summary: report.summary,
    })
}

/// `<dir>/<stem>_persian.ass` next to `input`.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "subtitles".to_string());
    input.with_file_name(format!("{stem}{OUTPUT_SUFFIX}.ass"))
}
