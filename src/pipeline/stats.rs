//! Stats Aggregator.
//!
//! All counters live behind one lock together with the "last report"
//! timestamp, so an update and the periodic-report check are a single
//! critical section and two stages can't both emit the same report.

use std::fmt;
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::Mutex;

use super::Stage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCount {
    pub frames: u64,
    /// Interleaved samples, whatever the item type.
    pub samples: u64,
}

/// Cumulative counters. Every field only grows, except `last_report`.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub total_pcm_bytes: u64,
    pub total_payload_bytes: u64,
    pub frames_encoded: u64,
    pub frames_decoded: u64,
    /// Frames whose encode/decode took longer than the frame duration.
    pub slow_frames: u64,
    drops: [DropCount; Stage::COUNT],
    pub last_report: Instant,
}

impl StatsSnapshot {
    fn new(now: Instant) -> Self {
        Self {
            total_pcm_bytes: 0,
            total_payload_bytes: 0,
            frames_encoded: 0,
            frames_decoded: 0,
            slow_frames: 0,
            drops: [DropCount::default(); Stage::COUNT],
            last_report: now,
        }
    }

    /// Percentage of PCM bytes saved by compression, `None` before any PCM.
    pub fn compression_ratio(&self) -> Option<f64> {
        if self.total_pcm_bytes == 0 {
            return None;
        }
        Some(100.0 - self.total_payload_bytes as f64 / self.total_pcm_bytes as f64 * 100.0)
    }

    /// Drops recorded against `stage` as the consumer that wasn't ready.
    pub fn dropped(&self, stage: Stage) -> DropCount {
        self.drops[stage.index()]
    }

    pub fn total_dropped_frames(&self) -> u64 {
        self.drops.iter().map(|d| d.frames).sum()
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total pcm {}, total opus {}, {:.2}% data saved, {} frames dropped, {} slow frames",
            self.total_pcm_bytes,
            self.total_payload_bytes,
            self.compression_ratio().unwrap_or(0.0),
            self.total_dropped_frames(),
            self.slow_frames,
        )
    }
}

pub struct StatsAggregator {
    inner: Mutex<StatsSnapshot>,
    interval: Duration,
}

impl StatsAggregator {
    /// `interval` is the minimum spacing between two periodic reports.
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Mutex::new(StatsSnapshot::new(Instant::now())),
            interval,
        }
    }

    /// Count PCM bytes read from the capture device. Returns the report if
    /// this update was the one that emitted it.
    pub fn record_pcm(&self, bytes: usize) -> Option<StatsSnapshot> {
        let mut inner = self.inner.lock();
        inner.total_pcm_bytes += bytes as u64;
        self.report_if_due(&mut inner)
    }

    /// Count one encoded payload of `bytes` bytes.
    pub fn record_payload(&self, bytes: usize) -> Option<StatsSnapshot> {
        let mut inner = self.inner.lock();
        inner.total_payload_bytes += bytes as u64;
        inner.frames_encoded += 1;
        self.report_if_due(&mut inner)
    }

    pub fn record_decoded(&self) {
        self.inner.lock().frames_decoded += 1;
    }

    pub fn record_drop(&self, consumer: Stage, samples: usize) {
        let mut inner = self.inner.lock();
        let drop = &mut inner.drops[consumer.index()];
        drop.frames += 1;
        drop.samples += samples as u64;
    }

    /// Record how long `stage` spent on one frame. Returns true if it was
    /// longer than `budget`.
    pub fn record_timing(&self, stage: Stage, elapsed: Duration, budget: Duration) -> bool {
        if elapsed <= budget {
            return false;
        }
        self.inner.lock().slow_frames += 1;
        warn!(
            "{} took {:?} for one frame, longer than the {:?} frame duration",
            stage, elapsed, budget
        );
        true
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().clone()
    }

    fn report_if_due(&self, inner: &mut StatsSnapshot) -> Option<StatsSnapshot> {
        let now = Instant::now();
        if now.duration_since(inner.last_report) < self.interval {
            return None;
        }
        inner.last_report = now;
        info!("{}", inner);
        Some(inner.clone())
    }
}
