//! Encoder stage: PCM frames → codec payloads.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use log::info;
use tokio_util::sync::CancellationToken;

use super::Stage;
use super::frame::{CodecPayload, PcmFrame};
use super::queue::{Handoff, HandoffReceiver, HandoffSender};
use super::stats::StatsAggregator;
use crate::audio::FrameEncoder;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

pub struct EncoderStage<E> {
    encoder: E,
    config: PipelineConfig,
    input: HandoffReceiver<PcmFrame>,
    output: HandoffSender<CodecPayload>,
    stats: Arc<StatsAggregator>,
}

impl<E: FrameEncoder> EncoderStage<E> {
    pub fn new(
        encoder: E,
        config: PipelineConfig,
        input: HandoffReceiver<PcmFrame>,
        output: HandoffSender<CodecPayload>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            encoder,
            config,
            input,
            output,
            stats,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let expected = self.config.frame_samples();
        let budget = self.config.frame_duration();
        let samples_per_channel = self.config.samples_per_channel() as u32;
        let mut encoded = 0u64;

        let result = loop {
            let Some(frame) = self.input.recv(&cancel).await else {
                break Ok(());
            };
            if frame.len() != expected {
                break Err(PipelineError::FrameSize {
                    stage: "encoder",
                    expected,
                    actual: frame.len(),
                });
            }

            let started = Instant::now();
            let packet = match self
                .encoder
                .encode(frame.samples(), self.config.max_payload_size)
            {
                Ok(packet) => packet,
                Err(e) => break Err(e),
            };
            self.stats.record_timing(Stage::Encoder, started.elapsed(), budget);
            self.stats.record_payload(packet.len());
            encoded += 1;

            let payload =
                CodecPayload::new(Bytes::from(packet), samples_per_channel, frame.sequence())
                    .with_channels(self.config.channels);
            if self.output.offer(payload) == Handoff::Closed {
                break Ok(());
            }
        };

        info!("quitting opus encoder after {} frames", encoded);
        result
    }
}
