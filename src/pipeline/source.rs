//! Frame Source: capture device → PCM frames.
//!
//! Runs on a blocking thread. Each iteration reads exactly one frame of
//! bytes, counts them, and offers the frame downstream without waiting.

use std::sync::Arc;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use super::frame::PcmFrame;
use super::queue::HandoffSender;
use super::stats::StatsAggregator;
use crate::audio::CaptureDevice;
use crate::config::PipelineConfig;
use crate::error::Result;

pub struct FrameSource<C> {
    device: C,
    config: PipelineConfig,
    output: HandoffSender<PcmFrame>,
    stats: Arc<StatsAggregator>,
}

impl<C: CaptureDevice> FrameSource<C> {
    pub fn new(
        device: C,
        config: PipelineConfig,
        output: HandoffSender<PcmFrame>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            device,
            config,
            output,
            stats,
        }
    }

    /// Read until cancelled, the consumer exits, or the device fails.
    /// The device is drained exactly once on the way out.
    pub fn run(mut self, cancel: &CancellationToken) -> Result<()> {
        match self.device.latency() {
            Ok(latency) => info!("record latency {:?}", latency),
            Err(e) => warn!("Couldn't query capture latency: {}", e),
        }

        let mut buf = vec![0u8; self.config.frame_bytes()];
        let mut sequence = 0u64;

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }
            if let Err(e) = self.device.read_exact(&mut buf) {
                break Err(e);
            }

            let frame = PcmFrame::from_le_bytes(&buf, sequence);
            sequence += 1;
            // Counted at read time, whether or not the handoff succeeds.
            self.stats.record_pcm(buf.len());

            if cancel.is_cancelled() {
                break Ok(());
            }
            if self.output.offer(frame).is_closed() {
                break Ok(());
            }
        };

        if let Err(e) = self.device.drain() {
            warn!("Capture drain failed: {}", e);
        }
        info!("quitting capture after {} frames", sequence);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockCapture;
    use crate::config::FrameDuration;
    use crate::error::PipelineError;
    use crate::pipeline::Stage;
    use crate::pipeline::queue::{HandoffReceiver, handoff};
    use std::time::Duration;

    fn setup(
        config: PipelineConfig,
    ) -> (
        Arc<StatsAggregator>,
        HandoffSender<PcmFrame>,
        HandoffReceiver<PcmFrame>,
    ) {
        let stats = Arc::new(StatsAggregator::new(Duration::from_secs(3600)));
        let (tx, rx) = handoff(config.queue_capacity, Stage::Encoder, stats.clone());
        (stats, tx, rx)
    }

    #[test]
    fn test_frames_have_configured_length() {
        for duration in FrameDuration::ALL {
            let config = PipelineConfig {
                frame_duration: duration,
                channels: 2,
                ..Default::default()
            };
            let (stats, tx, mut rx) = setup(config);
            let capture = MockCapture::new(&config).with_sine(440.0).fail_after(1);
            let probe = capture.probe();

            let cancel = CancellationToken::new();
            let result = FrameSource::new(capture, config, tx, stats).run(&cancel);
            assert!(matches!(result, Err(PipelineError::Device(_))));
            assert_eq!(probe.drains(), 1);

            let frame = recv_blocking(&mut rx);
            assert_eq!(frame.len(), config.frame_samples(), "{}", duration);
        }
    }

    #[test]
    fn test_saturated_consumer_drops_but_counts_pcm() {
        let config = PipelineConfig {
            frame_duration: FrameDuration::Ms20,
            ..Default::default()
        };
        let (stats, tx, _rx) = setup(config);
        let capture = MockCapture::new(&config).fail_after(5);

        let result =
            FrameSource::new(capture, config, tx, stats.clone()).run(&CancellationToken::new());
        assert!(result.is_err());

        let snap = stats.snapshot();
        // Nobody receives: first frame fills the slot, the other four are dropped.
        assert_eq!(snap.total_pcm_bytes, 5 * config.frame_bytes() as u64);
        assert_eq!(snap.dropped(Stage::Encoder).frames, 4);
        assert_eq!(snap.dropped(Stage::Encoder).samples, 4 * 960);
    }

    #[test]
    fn test_cancelled_before_start_reads_nothing() {
        let config = PipelineConfig::default();
        let (stats, tx, _rx) = setup(config);
        let capture = MockCapture::new(&config);
        let probe = capture.probe();

        let cancel = CancellationToken::new();
        cancel.cancel();
        FrameSource::new(capture, config, tx, stats).run(&cancel).unwrap();
        assert_eq!(probe.reads(), 0);
        assert_eq!(probe.drains(), 1);
    }

    #[test]
    fn test_exits_when_consumer_gone() {
        let config = PipelineConfig::default();
        let (stats, tx, rx) = setup(config);
        drop(rx);
        let capture = MockCapture::new(&config);
        let probe = capture.probe();

        FrameSource::new(capture, config, tx, stats)
            .run(&CancellationToken::new())
            .unwrap();
        assert_eq!(probe.reads(), 1);
    }

    fn recv_blocking(rx: &mut HandoffReceiver<PcmFrame>) -> PcmFrame {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(rx.recv(&CancellationToken::new()))
            .expect("frame queued")
    }
}
