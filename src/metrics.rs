//! Run accounting and stage latencies.
//!
//! [`ProcessingMetrics`] is the per-run accumulator: texts, retries, memory
//! hits and how many remote calls each chunk cost. [`MetricsRegistry`] lives
//! as long as the orchestrator and keeps a bounded window of latencies for
//! every [`Stage`] across runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Latency samples kept per stage.
const WINDOW: usize = 512;

/// Counters threaded through one run. Owned by the orchestrator for the run's
/// duration; a [`RunSummary`] snapshot survives it.
#[derive(Debug, Clone)]
pub struct ProcessingMetrics {
    pub start_time: Instant,
    pub processed_texts: usize,
    pub failed_texts: usize,
    pub retry_count: u32,
    pub memory_hits: usize,
    /// Remote attempts so far, retries included.
    pub remote_calls: u32,
    calls_per_chunk: Vec<u32>,
}

impl ProcessingMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            processed_texts: 0,
            failed_texts: 0,
            retry_count: 0,
            memory_hits: 0,
            remote_calls: 0,
            calls_per_chunk: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Close out a chunk: every remote call since the previous chunk closed
    /// is charged to it.
    pub fn close_chunk(&mut self) {
        let charged: u32 = self.calls_per_chunk.iter().sum();
        self.calls_per_chunk.push(self.remote_calls - charged);
    }

    /// `elapsed / fraction_done - elapsed`, clamped to zero.
    pub fn estimate_remaining(&self, fraction_done: f64) -> Duration {
        if fraction_done <= 0.0 {
            return Duration::ZERO;
        }
        let elapsed = self.elapsed().as_secs_f64();
        let remaining = elapsed / fraction_done.min(1.0) - elapsed;
        Duration::from_secs_f64(remaining.max(0.0))
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            processed_texts: self.processed_texts,
            failed_texts: self.failed_texts,
            retry_count: self.retry_count,
            memory_hits: self.memory_hits,
            remote_calls: self.remote_calls,
            calls_per_chunk: self.calls_per_chunk.clone(),
            elapsed: self.elapsed(),
        }
    }
}

impl Default for ProcessingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub processed_texts: usize,
    pub failed_texts: usize,
    pub retry_count: u32,
    pub memory_hits: usize,
    pub remote_calls: u32,
    /// Index `i` is the number of remote attempts chunk `i` needed. Zero for
    /// chunks answered entirely from memory.
    pub calls_per_chunk: Vec<u32>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    MemoryLookup,
    RemoteCall,
    Chunk,
    Run,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::MemoryLookup => "memory_lookup",
            Stage::RemoteCall => "remote_call",
            Stage::Chunk => "chunk",
            Stage::Run => "run",
        }
    }
}

/// Measures one stage from creation until [`StageTimer::finish`].
pub struct StageTimer {
    stage: Stage,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl StageTimer {
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        self.registry.record(self.stage, elapsed);
        elapsed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub count: usize,
    pub p50: Duration,
    pub p95: Duration,
    pub max: Duration,
}

#[derive(Default)]
pub struct MetricsRegistry {
    windows: Mutex<HashMap<Stage, VecDeque<Duration>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stage: Stage, elapsed: Duration) {
        let mut windows = self.windows.lock();
        let window = windows.entry(stage).or_default();
        if window.len() == WINDOW {
            window.pop_front();
        }
        window.push_back(elapsed);
        tracing::trace!(stage = stage.as_str(), elapsed_us = elapsed.as_micros() as u64, "stage_timed");
    }

    pub fn timer(self: &Arc<Self>, stage: Stage) -> StageTimer {
        StageTimer {
            stage,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    /// Nearest-rank percentile over the stage's window, `None` before the
    /// first sample.
    pub fn percentile(&self, stage: Stage, p: f64) -> Option<Duration> {
        let windows = self.windows.lock();
        let window = windows.get(&stage)?;
        let mut sorted: Vec<Duration> = window.iter().copied().collect();
        sorted.sort_unstable();
        nearest_rank(&sorted, p)
    }

    /// One line per stage that has samples, in pipeline order.
    pub fn summary(&self) -> Vec<StageSummary> {
        let windows = self.windows.lock();
        let mut out: Vec<StageSummary> = windows
            .iter()
            .filter_map(|(&stage, window)| {
                let mut sorted: Vec<Duration> = window.iter().copied().collect();
                sorted.sort_unstable();
                Some(StageSummary {
                    stage,
                    count: sorted.len(),
                    p50: nearest_rank(&sorted, 50.0)?,
                    p95: nearest_rank(&sorted, 95.0)?,
                    max: *sorted.last()?,
                })
            })
            .collect();
        out.sort_by_key(|s| s.stage);
        out
    }
}

fn nearest_rank(sorted: &[Duration], p: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted.get(rank.saturating_sub(1)).copied()
}
