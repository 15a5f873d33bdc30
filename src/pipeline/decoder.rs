//! Decoder stage (loopback only): codec payloads → PCM frames.

use std::sync::Arc;
use std::time::Instant;

use log::info;
use tokio_util::sync::CancellationToken;

use super::Stage;
use super::frame::{CodecPayload, PcmFrame};
use super::queue::{Handoff, HandoffReceiver, HandoffSender};
use super::stats::StatsAggregator;
use crate::audio::FrameDecoder;
use crate::config::PipelineConfig;
use crate::error::Result;

pub struct DecoderStage<D> {
    decoder: D,
    config: PipelineConfig,
    input: HandoffReceiver<CodecPayload>,
    output: HandoffSender<PcmFrame>,
    stats: Arc<StatsAggregator>,
}

impl<D: FrameDecoder> DecoderStage<D> {
    pub fn new(
        decoder: D,
        config: PipelineConfig,
        input: HandoffReceiver<CodecPayload>,
        output: HandoffSender<PcmFrame>,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            decoder,
            config,
            input,
            output,
            stats,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let channels = self.config.channels as usize;
        let budget = self.config.frame_duration();
        let mut decoded = 0u64;

        let result = loop {
            let Some(payload) = self.input.recv(&cancel).await else {
                break Ok(());
            };

            let started = Instant::now();
            let mut pcm = vec![0i16; self.config.frame_samples()];
            let per_channel = match self.decoder.decode(payload.data(), &mut pcm) {
                Ok(n) => n,
                Err(e) => break Err(e),
            };
            // Trust the decoder's count over the nominal frame size.
            pcm.truncate(per_channel * channels);
            self.stats.record_timing(Stage::Decoder, started.elapsed(), budget);
            self.stats.record_decoded();
            decoded += 1;

            if self.output.offer(PcmFrame::new(pcm, payload.sequence())) == Handoff::Closed {
                break Ok(());
            }
        };

        info!("quitting opus decoder after {} frames", decoded);
        result
    }
}
