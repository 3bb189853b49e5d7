use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

/// Counts encoded frames and logs at a fixed interval.
///
/// `advance` only touches an atomic, so any worker thread can share the
/// tracker by reference.
#[derive(Debug)]
pub struct ProgressTracker {
    completed: AtomicU64,
    total: Option<u64>,
    report_every: u64,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: Option<u64>, report_every: u64) -> Self {
        Self {
            completed: AtomicU64::new(0),
            total,
            report_every: report_every.max(1),
            started: Instant::now(),
        }
    }

    pub fn advance(&self) -> u64 {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if completed % self.report_every == 0 {
            self.report(completed);
        }
        completed
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Percentage of the expected total, capped at 100.
    pub fn percent(&self) -> Option<f64> {
        let total = self.total.filter(|total| *total > 0)?;
        Some((self.completed() as f64 / total as f64 * 100.0).min(100.0))
    }

    pub fn finish(&self) {
        let completed = self.completed();
        let elapsed = self.started.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            completed as f64 / elapsed
        } else {
            0.0
        };
        info!(
            frames = completed,
            elapsed_s = %format!("{elapsed:.2}"),
            fps = %format!("{fps:.1}"),
            "encoding finished"
        );
    }

    fn report(&self, completed: u64) {
        match (self.total, self.percent()) {
            (Some(total), Some(percent)) => info!(
                frame = completed,
                total,
                percent = %format!("{percent:.1}"),
                "encoded frames"
            ),
            _ => info!(frame = completed, "encoded frames"),
        }
    }
}
