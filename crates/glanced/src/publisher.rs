//! Non-blocking fan-out of pipeline results to observers.

use crate::stats::StatisticsSnapshot;
use chrono::{DateTime, Utc};
use glance_core::FrameResult;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Events observable from a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Frame(FrameResult),
    Stats(StatisticsSnapshot),
    /// The detector has failed several consecutive ticks. Recoverable: the
    /// scheduler keeps retrying; the signal is raised once per episode.
    DetectionDegraded { consecutive_failures: u32 },
}

/// Wire form for transports: `{"type": ..., "data": ..., "timestamp": ...}`.
#[derive(Debug, Serialize)]
pub struct Record<'a> {
    #[serde(flatten)]
    pub event: &'a Event,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn to_record(&self) -> Record<'_> {
        Record {
            event: self,
            timestamp: Utc::now(),
        }
    }
}

/// Fan-out point between the scheduler and its observers.
///
/// Publishing never blocks the scheduler: events go through a bounded
/// broadcast channel where a lagging observer drops its oldest events, frame
/// history is a capped ring, and the latest statistics snapshot is kept for
/// the read accessor.
pub struct Publisher {
    events: broadcast::Sender<Event>,
    history: Mutex<VecDeque<FrameResult>>,
    latest_stats: Mutex<StatisticsSnapshot>,
    history_capacity: usize,
}

impl Publisher {
    pub fn new(event_capacity: usize, history_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            events,
            history: Mutex::new(VecDeque::with_capacity(history_capacity.max(1))),
            latest_stats: Mutex::new(StatisticsSnapshot::zero()),
            history_capacity: history_capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn publish_frame(&self, frame: FrameResult) {
        {
            let mut history = self.history.lock().expect("history lock poisoned");
            if history.len() == self.history_capacity {
                history.pop_front();
            }
            history.push_back(frame.clone());
        }
        // Send only fails when no observer is subscribed; that is fine.
        let _ = self.events.send(Event::Frame(frame));
    }

    pub fn publish_stats(&self, stats: StatisticsSnapshot) {
        *self.latest_stats.lock().expect("stats lock poisoned") = stats.clone();
        let _ = self.events.send(Event::Stats(stats));
    }

    pub fn publish_degraded(&self, consecutive_failures: u32) {
        tracing::warn!(consecutive_failures, "detection degraded");
        let _ = self.events.send(Event::DetectionDegraded {
            consecutive_failures,
        });
    }

    /// Most recent frame results, oldest first.
    pub fn history(&self) -> Vec<FrameResult> {
        self.history
            .lock()
            .expect("history lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn latest_stats(&self) -> StatisticsSnapshot {
        self.latest_stats
            .lock()
            .expect("stats lock poisoned")
            .clone()
    }
}
