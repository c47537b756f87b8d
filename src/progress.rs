//! Run observers: progress, status messages and quality scores flow out to
//! whatever presents them. Every callback is fire-and-forget; the core never
//! waits on an observer.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::quality::QualityScore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// 0..=100
    pub progress: u8,
    /// 1-based.
    pub current_chunk: usize,
    pub total_chunks: usize,
    pub translated_count: usize,
    pub total_texts: usize,
    pub estimated_time_remaining: Duration,
}

pub trait RunObserver: Send + Sync {
    fn on_progress(&self, _update: &ProgressUpdate) {}
    fn on_status(&self, _message: &str) {}
    fn on_quality_scores(&self, _scores: &[QualityScore]) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Writes progress lines to stderr, timestamped from creation.
pub struct ConsoleObserver {
    enabled: bool,
    t0: Instant,
}

impl ConsoleObserver {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    fn line(&self, msg: &str) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {msg}");
    }
}

impl RunObserver for ConsoleObserver {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.line(&format!(
            "chunk {}/{}  {}/{} texts ({:3}%)  eta {}",
            update.current_chunk,
            update.total_chunks,
            update.translated_count,
            update.total_texts,
            update.progress,
            fmt_elapsed(update.estimated_time_remaining.as_secs_f64()),
        ));
    }

    fn on_status(&self, message: &str) {
        self.line(message);
    }

    fn on_quality_scores(&self, scores: &[QualityScore]) {
        if let Some(avg) = crate::quality::average_overall(scores) {
            self.line(&format!("quality: {} scored, average {avg:.1}/100", scores.len()));
        }
    }
}

pub fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formatting() {
        assert_eq!(fmt_elapsed(0.0), "00:00");
        assert_eq!(fmt_elapsed(75.4), "01:15");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
        assert_eq!(fmt_elapsed(-3.0), "00:00");
    }
}
