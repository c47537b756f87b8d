//! Chunked translation runs.
//!
//! A run partitions the unique source texts into at most [`MAX_CHUNKS`]
//! chunks and processes them strictly in order: memory lookup, context,
//! prompt, remote call under the retry policy, response parsing, write-back.
//! Cancellation is observed before every chunk, during every remote call and
//! during every wait. A chunk whose retries are exhausted is left out of the
//! result and the run moves on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use whatlang::Script;

use crate::cancellation::RunController;
use crate::config::Config;
use crate::metrics::{MetricsRegistry, ProcessingMetrics, RunSummary, Stage};
use crate::progress::{ProgressUpdate, RunObserver};
use crate::quality::{score_translation, QualityScore};
use crate::state_machine::{RunState, StateMachine};
use crate::translate::context::{token_estimate, ContextHistory, ContextOptions};
use crate::translate::memory::{MemoryEntry, TranslationMemory};
use crate::translate::normalize::{clean_text, polish_persian, script_for_language};
use crate::translate::prompt::{build_prompt, PromptOptions, QualitySettings};
use crate::translate::response::ResponseParser;
use crate::translate::retry::RetryPolicy;
use crate::translate::{GenerationParams, TranslateError, TranslationRequest, Transport};

/// Hard ceiling on chunks per run.
pub const MAX_CHUNKS: usize = 5;

/// Confidence stored with a fresh remote translation.
const FRESH_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Cleaned form of `original_texts[i]`.
    pub texts: Vec<String>,
    pub original_texts: Vec<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Split `texts` into at most `min(requested, MAX_CHUNKS)` chunks of
/// `ceil(total / chunk_count)` texts. Every input lands in exactly one chunk,
/// in input order.
pub fn create_chunks(texts: &[String], requested: usize) -> Vec<Chunk> {
    if texts.is_empty() {
        return Vec::new();
    }
    let chunk_count = requested.clamp(1, MAX_CHUNKS);
    let size = texts.len().div_ceil(chunk_count).max(1);
    let total_chunks = texts.len().div_ceil(size);

    texts
        .chunks(size)
        .enumerate()
        .map(|(chunk_index, originals)| Chunk {
            texts: originals.iter().map(|t| clean_text(t)).collect(),
            original_texts: originals.to_vec(),
            chunk_index,
            total_chunks,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub target_language: String,
    pub chunk_count: usize,
    pub inter_chunk_delay: Duration,
    pub retry: RetryPolicy,
    pub params: GenerationParams,
    pub quality: QualitySettings,
    pub context: ContextOptions,
    pub post_process: bool,
    pub separator: Option<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Config::default().run_settings()
    }
}

/// State that outlives a run: the persisted memory and the session's
/// context history. Passed in explicitly so that no two runs share it
/// implicitly.
pub struct Session {
    pub memory: TranslationMemory,
    pub history: ContextHistory,
}

impl Session {
    pub fn new(memory: TranslationMemory) -> Self {
        Self {
            memory,
            history: ContextHistory::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// Original source text → translation. Texts whose chunk failed are absent.
    pub translations: HashMap<String, String>,
    /// Unique non-empty texts the run was asked to translate.
    pub requested: usize,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.translations.len() == self.requested
    }
}

pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    settings: RunSettings,
    controller: RunController,
    state: StateMachine,
    metrics: Arc<MetricsRegistry>,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>, settings: RunSettings) -> Self {
        Self {
            transport,
            settings,
            controller: RunController::new(),
            state: StateMachine::new(),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn state(&self) -> RunState {
        self.state.current()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Signal the active run, if any, to stop.
    pub fn cancel_active(&self) -> bool {
        self.controller.cancel_active()
    }

    /// Translate `texts` chunk by chunk. The caller owns `cancel`; starting a
    /// run cancels whichever run was active before. Returns
    /// `TranslateError::Cancelled` if the token fires at any point; otherwise
    /// a report that may be partial.
    pub async fn translate_texts(
        &self,
        session: &mut Session,
        texts: &[String],
        cancel: CancellationToken,
        observer: &dyn RunObserver,
    ) -> Result<RunReport, TranslateError> {
        let generation = self.controller.begin(cancel.clone());
        if let Err(e) = self.state.transition(RunState::Running) {
            debug!(error = %e, "run start transition rejected");
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id, generation);
        let result = self
            .run_chunks(session, texts, &cancel, observer)
            .instrument(span)
            .await;

        if self.controller.finish(generation) {
            let next = match &result {
                Err(TranslateError::Cancelled) => RunState::Cancelled,
                Err(_) => RunState::Failed,
                Ok(report) if report.requested > 0 && report.translations.is_empty() => {
                    RunState::Failed
                }
                Ok(_) => RunState::Completed,
            };
            let _ = self.state.transition(next);
        } else {
            debug!(generation, "stale run finished, state left to the newer run");
        }
        result
    }

    async fn run_chunks(
        &self,
        session: &mut Session,
        texts: &[String],
        cancel: &CancellationToken,
        observer: &dyn RunObserver,
    ) -> Result<RunReport, TranslateError> {
        let run_timer = self.metrics.timer(Stage::Run);
        let unique = unique_texts(texts);
        if cancel.is_cancelled() {
            info!("run cancelled before start");
            return Err(TranslateError::Cancelled);
        }

        let chunks = create_chunks(&unique, self.settings.chunk_count);
        let script = script_for_language(&self.settings.target_language);
        let mut metrics = ProcessingMetrics::new();
        let mut translations: HashMap<String, String> = HashMap::with_capacity(unique.len());

        info!(
            texts = unique.len(),
            chunks = chunks.len(),
            target = %self.settings.target_language,
            "run_started"
        );
        observer.on_status(&format!(
            "translating {} texts in {} chunks",
            unique.len(),
            chunks.len()
        ));

        for chunk in &chunks {
            if cancel.is_cancelled() {
                info!(chunk = chunk.chunk_index + 1, "run cancelled");
                return Err(TranslateError::Cancelled);
            }
            let chunk_timer = self.metrics.timer(Stage::Chunk);
            let label = format!("chunk {}/{}", chunk.chunk_index + 1, chunk.total_chunks);
            info!(chunk = chunk.chunk_index + 1, texts = chunk.texts.len(), "chunk_started");

            let mut pairs: Vec<(String, String)> = Vec::with_capacity(chunk.texts.len());
            let mut misses: Vec<usize> = Vec::new();
            for (i, text) in chunk.texts.iter().enumerate() {
                let lookup_timer = self.metrics.timer(Stage::MemoryLookup);
                let hit = session.memory.lookup(text);
                lookup_timer.finish();
                match hit {
                    Some(found) => {
                        translations.insert(chunk.original_texts[i].clone(), found.entry.target.clone());
                        pairs.push((text.clone(), found.entry.target));
                        metrics.memory_hits += 1;
                        metrics.processed_texts += 1;
                    }
                    None => misses.push(i),
                }
            }
            if misses.len() < chunk.texts.len() {
                observer.on_status(&format!(
                    "{label}: {} texts resolved from translation memory",
                    chunk.texts.len() - misses.len()
                ));
            }

            if !misses.is_empty() {
                let miss_texts: Vec<String> = misses.iter().map(|&i| chunk.texts[i].clone()).collect();
                match self
                    .translate_batch(session, &miss_texts, &label, cancel, observer, &mut metrics, script)
                    .await
                {
                    Ok(results) => {
                        for (&i, translated) in misses.iter().zip(results) {
                            if translated.is_empty() {
                                metrics.failed_texts += 1;
                                continue;
                            }
                            session.memory.upsert(MemoryEntry::new(
                                &chunk.texts[i],
                                &translated,
                                FRESH_CONFIDENCE,
                                Some(self.settings.quality.genre.as_str().to_string()),
                            ));
                            translations.insert(chunk.original_texts[i].clone(), translated.clone());
                            pairs.push((chunk.texts[i].clone(), translated));
                            metrics.processed_texts += 1;
                        }
                    }
                    Err(TranslateError::Cancelled) => {
                        info!(chunk = chunk.chunk_index + 1, "run cancelled");
                        return Err(TranslateError::Cancelled);
                    }
                    Err(e) => {
                        metrics.failed_texts += misses.len();
                        warn!(chunk = chunk.chunk_index + 1, texts = misses.len(), error = %e, "chunk_failed");
                        observer.on_status(&format!("{label}: failed, {} texts left untranslated: {e}", misses.len()));
                    }
                }
            }

            session.history.add_chunk(chunk.chunk_index, pairs);
            if let Err(e) = session.memory.persist() {
                warn!(error = %e, "translation memory persist failed");
            }
            metrics.close_chunk();
            chunk_timer.finish();

            let done = chunk.chunk_index + 1;
            let fraction = done as f64 / chunk.total_chunks as f64;
            observer.on_progress(&ProgressUpdate {
                progress: (fraction * 100.0).round() as u8,
                current_chunk: done,
                total_chunks: chunk.total_chunks,
                translated_count: translations.len(),
                total_texts: unique.len(),
                estimated_time_remaining: metrics.estimate_remaining(fraction),
            });
            info!(
                chunk = done,
                translated = translations.len(),
                failed = metrics.failed_texts,
                "chunk_done"
            );

            let is_last = done == chunk.total_chunks;
            if !is_last && !self.settings.inter_chunk_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.inter_chunk_delay) => {}
                    _ = cancel.cancelled() => {
                        info!(chunk = done, "run cancelled during inter-chunk delay");
                        return Err(TranslateError::Cancelled);
                    }
                }
            }
        }

        run_timer.finish();
        let context = session.history.stats(&session.memory);
        debug!(
            history = context.total_entries,
            chunks = context.chunks,
            per_chunk = context.avg_entries_per_chunk,
            memory = context.memory_entries,
            "context_stats"
        );
        let summary = metrics.summary();
        info!(
            processed = summary.processed_texts,
            failed = summary.failed_texts,
            retries = summary.retry_count,
            remote_calls = summary.remote_calls,
            calls_per_chunk = ?summary.calls_per_chunk,
            memory_hits = summary.memory_hits,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run_done"
        );
        Ok(RunReport {
            translations,
            requested: unique.len(),
            summary,
        })
    }

    /// One remote call (with retries) for the memory misses of a chunk.
    /// Returns exactly `texts.len()` translations; empty means none produced.
    #[allow(clippy::too_many_arguments)]
    async fn translate_batch(
        &self,
        session: &Session,
        texts: &[String],
        label: &str,
        cancel: &CancellationToken,
        observer: &dyn RunObserver,
        metrics: &mut ProcessingMetrics,
        script: Script,
    ) -> Result<Vec<String>, TranslateError> {
        let settings = &self.settings;
        let context = settings
            .quality
            .contextual_translation
            .then(|| session.history.build_context(texts, &session.memory, &settings.context));

        let prompt = build_prompt(
            texts,
            &PromptOptions {
                target_language: &settings.target_language,
                quality: &settings.quality,
                context: context.as_deref(),
                separator: settings.separator.as_deref(),
            },
        );
        let estimate = token_estimate(context.as_deref().unwrap_or(""), &prompt);
        if !estimate.is_within_limit {
            warn!(tokens = estimate.total, "prompt exceeds token limit");
        } else {
            debug!(tokens = estimate.total, context_tokens = estimate.context, "prompt_built");
        }

        let request = TranslationRequest {
            prompt,
            params: settings.params,
        };
        let request = &request;
        let transport = &self.transport;
        let registry = &self.metrics;
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let raw = settings
            .retry
            .run(label, cancel, observer, metrics, |attempt| {
                calls.fetch_add(1, Ordering::Relaxed);
                let timer = registry.timer(Stage::RemoteCall);
                async move {
                    debug!(attempt, "remote_call_started");
                    let result = transport.send(request, cancel).await;
                    timer.finish();
                    result
                }
            })
            .await;
        metrics.remote_calls += calls.load(Ordering::Relaxed);
        let raw = raw?;

        let parsed = ResponseParser::new(texts.len(), settings.separator.clone(), script).parse(&raw);
        let persian = settings.post_process && settings.target_language.eq_ignore_ascii_case("fa");
        let translations: Vec<String> = parsed
            .translations
            .into_iter()
            .map(|t| {
                // Line breaks inside one translation survive as subtitle breaks.
                let cleaned = t
                    .lines()
                    .map(clean_text)
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                if persian {
                    polish_persian(&cleaned)
                } else {
                    cleaned
                }
            })
            .collect();

        if settings.quality.quality_check {
            let scores: Vec<QualityScore> = texts
                .iter()
                .zip(&translations)
                .filter(|(_, t)| !t.is_empty())
                .map(|(source, t)| score_translation(source, t, &session.memory, script))
                .collect();
            if !scores.is_empty() {
                observer.on_quality_scores(&scores);
            }
        }
        Ok(translations)
    }
}

/// Distinct non-blank texts in first-seen order.
fn unique_texts(texts: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(texts.len());
    texts
        .iter()
        .filter(|t| !clean_text(t).is_empty())
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}
