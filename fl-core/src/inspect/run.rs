//! Run-level timing for a "start all"

use std::time::{Duration, Instant};

use tracing::info;

/// Summary logged once a run's expected detections have all completed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSummary {
    pub wall_time: Duration,
    pub inference_time: Duration,
    pub average_inference: Duration,
    pub detections: usize,
}

impl TimingSummary {
    pub fn log(&self) {
        info!("=== Detection Timing Report ===");
        info!("Total wall clock time: {:.2} seconds", self.wall_time.as_secs_f64());
        info!("Total inference time: {:.2} seconds", self.inference_time.as_secs_f64());
        info!(
            "Average inference time per detection: {:.2} seconds",
            self.average_inference.as_secs_f64()
        );
        info!("Number of detections: {}", self.detections);
        info!("=== End of Detection Report ===");
    }
}

/// Counters for the run started by the last "start all"
#[derive(Debug, Clone)]
pub struct RunStats {
    started_at: Instant,
    expected: usize,
    completed: usize,
    total_inference: Duration,
    reported: bool,
}

impl RunStats {
    /// New run expecting one detection per started slot
    pub fn start(expected: usize) -> Self {
        Self {
            started_at: Instant::now(),
            expected,
            completed: 0,
            total_inference: Duration::ZERO,
            reported: false,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total_inference(&self) -> Duration {
        self.total_inference
    }

    /// Count a finished batch; returns the summary the first time the run completes
    pub fn record(&mut self, detections: usize, inference: Duration) -> Option<TimingSummary> {
        self.completed += detections;
        self.total_inference += inference;

        if self.reported || self.expected == 0 || self.completed < self.expected {
            return None;
        }
        self.reported = true;

        Some(TimingSummary {
            wall_time: self.started_at.elapsed(),
            inference_time: self.total_inference,
            average_inference: self.total_inference / self.completed.max(1) as u32,
            detections: self.completed,
        })
    }
}
