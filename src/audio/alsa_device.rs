//! ALSA PCM device wrappers for audio capture and playback.

use std::time::Duration;

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::device::{CaptureDevice, PlaybackDevice};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Consecutive failed writes tolerated before playback gives up.
const MAX_WRITE_RECOVERIES: u32 = 3;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

impl AlsaParams {
    fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }
}

fn open_pcm(
    device: &str,
    direction: Direction,
    config: &PipelineConfig,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false).map_err(|e| {
        PipelineError::Device(format!(
            "Failed to open PCM device '{}' for {}: {}",
            device, dir_name, e
        ))
    })?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm)?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(config.channels)?;
        hwp.set_rate_near(config.sample_rate, ValueOr::Nearest)?;
        // One period per codec frame keeps reads aligned with frame boundaries.
        hwp.set_period_size_near(
            config.samples_per_channel() as alsa::pcm::Frames,
            ValueOr::Nearest,
        )?;
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    // No resampling in the pipeline: the device has to run at codec rate.
    if params.sample_rate != config.sample_rate || params.channels != config.channels {
        return Err(PipelineError::Device(format!(
            "{} device '{}' negotiated {}Hz/{}ch, pipeline needs {}Hz/{}ch",
            dir_name,
            device,
            params.sample_rate,
            params.channels,
            config.sample_rate,
            config.channels
        )));
    }

    Ok((pcm, params))
}

/// Blocking ALSA capture stream.
pub struct AlsaCapture {
    pcm: PCM,
    params: AlsaParams,
}

impl AlsaCapture {
    pub fn open(device: &str, config: &PipelineConfig) -> Result<Self> {
        let (pcm, params) = open_pcm(device, Direction::Capture, config, "Capture")?;
        pcm.prepare()?;
        Ok(Self { pcm, params })
    }
}

impl CaptureDevice for AlsaCapture {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let frame_bytes = self.params.bytes_per_frame();
        let mut filled = 0;
        while filled < buf.len() {
            let io = self.pcm.io_bytes();
            match io.readi(&mut buf[filled..]) {
                Ok(frames) => filled += frames * frame_bytes,
                Err(e) => {
                    // Overruns are recoverable; anything else try_recover hands back.
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    self.pcm.try_recover(e, true).map_err(|e| {
                        PipelineError::Device(format!("Couldn't read from capture stream: {}", e))
                    })?;
                }
            }
        }
        Ok(())
    }

    fn latency(&self) -> Result<Duration> {
        let frames = self.pcm.delay()?.max(0) as u64;
        Ok(Duration::from_micros(
            frames * 1_000_000 / self.params.sample_rate as u64,
        ))
    }

    fn drain(&mut self) -> Result<()> {
        self.pcm.drain()?;
        Ok(())
    }
}

/// Blocking ALSA playback stream.
pub struct AlsaPlayback {
    pcm: PCM,
    params: AlsaParams,
}

impl AlsaPlayback {
    pub fn open(device: &str, config: &PipelineConfig) -> Result<Self> {
        let (pcm, params) = open_pcm(device, Direction::Playback, config, "Playback")?;
        Ok(Self { pcm, params })
    }
}

impl PlaybackDevice for AlsaPlayback {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let frame_bytes = self.params.bytes_per_frame();
        let total_frames = buf.len() / frame_bytes;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            let io = self.pcm.io_bytes();
            match io.writei(&buf[frames_written * frame_bytes..total_frames * frame_bytes]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    self.pcm.try_recover(e, true).map_err(|e| {
                        PipelineError::Device(format!("playback write failed: {}", e))
                    })?;
                    if retry_count >= MAX_WRITE_RECOVERIES {
                        return Err(PipelineError::Device(format!(
                            "playback write failed {} times in a row, {} frames unwritten",
                            retry_count,
                            total_frames - frames_written
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.pcm.drain()?;
        Ok(())
    }
}
