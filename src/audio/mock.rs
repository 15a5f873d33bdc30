//! Synthetic devices for running pipelines without audio hardware.
//!
//! Each mock hands out a probe sharing its counters so a test can inspect
//! the device after it has been moved into a stage.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::device::{CaptureDevice, PlaybackDevice};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Counters shared with a [`MockCapture`].
#[derive(Debug, Clone, Default)]
pub struct CaptureProbe {
    reads: Arc<AtomicUsize>,
    drains: Arc<AtomicUsize>,
}

impl CaptureProbe {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn drains(&self) -> usize {
        self.drains.load(Ordering::SeqCst)
    }
}

/// Capture device producing silence or a sine tone.
pub struct MockCapture {
    sample_rate: u32,
    channels: u32,
    tone_hz: Option<f64>,
    phase: f64,
    pace: Option<Duration>,
    fail_after: Option<usize>,
    probe: CaptureProbe,
}

impl MockCapture {
    /// Silent capture, as fast as the reader asks.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            tone_hz: None,
            phase: 0.0,
            pace: None,
            fail_after: None,
            probe: CaptureProbe::default(),
        }
    }

    pub fn with_sine(mut self, frequency: f64) -> Self {
        self.tone_hz = Some(frequency);
        self
    }

    /// Sleep `interval` before every read, like a real-time device.
    pub fn paced(mut self, interval: Duration) -> Self {
        self.pace = Some(interval);
        self
    }

    /// Fail every read after `reads` successful ones.
    pub fn fail_after(mut self, reads: usize) -> Self {
        self.fail_after = Some(reads);
        self
    }

    pub fn probe(&self) -> CaptureProbe {
        self.probe.clone()
    }

    fn next_sample(&mut self) -> i16 {
        match self.tone_hz {
            Some(freq) => {
                let value = (self.phase * TAU).sin() * 0.3 * i16::MAX as f64;
                self.phase = (self.phase + freq / self.sample_rate as f64).fract();
                value as i16
            }
            None => 0,
        }
    }
}

impl CaptureDevice for MockCapture {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if let Some(limit) = self.fail_after {
            if self.probe.reads() >= limit {
                return Err(PipelineError::Device("mock capture failure".into()));
            }
        }
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }

        let frame_bytes = self.channels as usize * 2;
        for frame in buf.chunks_exact_mut(frame_bytes) {
            let bytes = self.next_sample().to_le_bytes();
            for sample in frame.chunks_exact_mut(2) {
                sample.copy_from_slice(&bytes);
            }
        }
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn latency(&self) -> Result<Duration> {
        Ok(self.pace.unwrap_or(Duration::ZERO))
    }

    fn drain(&mut self) -> Result<()> {
        self.probe.drains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counters and captured writes shared with a [`MockPlayback`].
#[derive(Debug, Clone, Default)]
pub struct PlaybackProbe {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    drains: Arc<AtomicUsize>,
}

impl PlaybackProbe {
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn drains(&self) -> usize {
        self.drains.load(Ordering::SeqCst)
    }
}

/// Playback device that records every write.
#[derive(Default)]
pub struct MockPlayback {
    probe: PlaybackProbe,
    fail_writes: bool,
    pace: Option<Duration>,
}

impl MockPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write fails with a device error.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// Take `interval` to accept every write.
    pub fn paced(mut self, interval: Duration) -> Self {
        self.pace = Some(interval);
        self
    }

    pub fn probe(&self) -> PlaybackProbe {
        self.probe.clone()
    }
}

impl PlaybackDevice for MockPlayback {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.fail_writes {
            return Err(PipelineError::Device("mock playback failure".into()));
        }
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        self.probe.writes.lock().push(buf.to_vec());
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.probe.drains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
