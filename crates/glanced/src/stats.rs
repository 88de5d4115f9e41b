//! Rolling recognition statistics.

use chrono::{DateTime, Utc};
use glance_core::FrameResult;
use serde::Serialize;
use std::time::{Duration, Instant};

/// One flushed statistics window, published to observers and kept for the
/// read accessor.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    /// Completed frames per second over the window.
    pub frame_rate: f64,
    /// Matched/detected ratio over the window; 0 when nothing was detected.
    pub match_ratio: f64,
    /// Frames completed in the window.
    pub frames: u64,
    /// Faces detected in the window.
    pub faces_detected: u64,
    /// Faces matched in the window.
    pub faces_matched: u64,
    /// Lifetime matched-face count across all windows.
    pub total_matched: u64,
    pub at: DateTime<Utc>,
}

impl StatisticsSnapshot {
    /// The all-zero snapshot reported before the first window closes.
    pub fn zero() -> Self {
        Self {
            frame_rate: 0.0,
            match_ratio: 0.0,
            frames: 0,
            faces_detected: 0,
            faces_matched: 0,
            total_matched: 0,
            at: Utc::now(),
        }
    }
}

/// Single-writer rolling-window aggregator.
///
/// `record` and `flush_if_due` are both driven from the result-delivery
/// path, which serializes all mutation; the session wraps the aggregator in
/// a mutex only so its lifetime counters survive recognition restarts.
#[derive(Debug)]
pub struct StatsAggregator {
    window: Duration,
    window_start: Instant,
    frames: u64,
    detected: u64,
    matched: u64,
    lifetime_matched: u64,
}

impl StatsAggregator {
    pub fn new(window: Duration) -> Self {
        Self::with_start(window, Instant::now())
    }

    /// Aggregator with an explicit window origin, for deterministic tests.
    pub fn with_start(window: Duration, start: Instant) -> Self {
        Self {
            window,
            window_start: start,
            frames: 0,
            detected: 0,
            matched: 0,
            lifetime_matched: 0,
        }
    }

    /// Fold one completed frame into the current window.
    pub fn record(&mut self, frame: &FrameResult) {
        self.frames += 1;
        self.detected += frame.results.len() as u64;
        self.matched += frame.matched_count() as u64;
    }

    /// Roll the window if it has elapsed, returning the flushed snapshot.
    ///
    /// Never fails: with zero detections the ratio reports 0 instead of
    /// dividing by zero.
    pub fn flush_if_due(&mut self, now: Instant) -> Option<StatisticsSnapshot> {
        let elapsed = now.duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        let frame_rate = if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        };
        let match_ratio = if self.detected > 0 {
            self.matched as f64 / self.detected as f64
        } else {
            0.0
        };
        self.lifetime_matched += self.matched;

        let snapshot = StatisticsSnapshot {
            frame_rate,
            match_ratio,
            frames: self.frames,
            faces_detected: self.detected,
            faces_matched: self.matched,
            total_matched: self.lifetime_matched,
            at: Utc::now(),
        };

        self.frames = 0;
        self.detected = 0;
        self.matched = 0;
        self.window_start = now;
        Some(snapshot)
    }
}
