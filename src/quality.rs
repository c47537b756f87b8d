//! Heuristic quality scores for produced translations. Derived data for
//! reporting only; nothing in the pipeline branches on them.

use serde::Serialize;
use whatlang::Script;

use crate::translate::memory::TranslationMemory;
use crate::translate::normalize::script_ratio;
use crate::translate::similarity::similarity;

const CONSISTENCY_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityScore {
    pub overall: u32,
    pub fluency: u32,
    pub accuracy: u32,
    pub consistency: u32,
    pub suggestions: Vec<String>,
}

/// Score `translated` against `original`. Consistency compares with the closest
/// earlier translation of a near-identical source, so call this before the new
/// pair is written to memory.
pub fn score_translation(
    original: &str,
    translated: &str,
    memory: &TranslationMemory,
    script: Script,
) -> QualityScore {
    let mut suggestions = Vec::new();

    let original_len = original.chars().count().max(1) as f64;
    let length_ratio = translated.chars().count() as f64 / original_len;
    let mut fluency: f64 = 100.0;
    if length_ratio > 1.3 {
        fluency -= 15.0;
        suggestions.push("translation may be too long".to_string());
    } else if length_ratio < 0.7 {
        fluency -= 20.0;
        suggestions.push("translation may be too short".to_string());
    }

    let accuracy = script_ratio(translated, script) * 100.0;
    if accuracy < 70.0 {
        suggestions.push("low share of target-script characters; check for untranslated words".to_string());
    }

    let mut consistency = 100.0;
    if let Some(closest) = memory.find_similar(original, CONSISTENCY_THRESHOLD).first() {
        consistency = similarity(translated, &closest.entry.target) * 100.0;
        if consistency < 80.0 {
            suggestions.push(format!("similar earlier translation: \"{}\"", closest.entry.target));
        }
    }

    QualityScore {
        overall: ((fluency + accuracy + consistency) / 3.0).round() as u32,
        fluency: fluency.round() as u32,
        accuracy: accuracy.round() as u32,
        consistency: consistency.round() as u32,
        suggestions,
    }
}

pub fn average_overall(scores: &[QualityScore]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().map(|s| s.overall as f64).sum::<f64>() / scores.len() as f64)
}
