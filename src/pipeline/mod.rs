//! pipeline - stages, the queues between them, and how they are wired
//!
//! ```text
//! relay:    capture ─▶ encoder ─▶ sink (WebRTC track)
//! loopback: capture ─▶ encoder ─▶ decoder ─▶ sink (playback device)
//! ```
//!
//! Every arrow is a bounded drop-on-full queue. Capture runs on the
//! blocking pool; the other stages are async tasks.

pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod queue;
pub mod sink;
pub mod source;
pub mod stats;

use std::fmt;
use std::sync::Arc;

use log::info;

pub use decoder::DecoderStage;
pub use encoder::EncoderStage;
pub use frame::{CodecPayload, PcmFrame};
pub use sink::{ChannelSink, FrameSink, PlaybackSink, SinkStage};
pub use source::FrameSource;
pub use stats::{StatsAggregator, StatsSnapshot};

use crate::audio::{CaptureDevice, FrameDecoder, FrameEncoder};
use crate::config::PipelineConfig;
use crate::lifecycle::LifecycleController;
use queue::handoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Capture = 0,
    Encoder = 1,
    Decoder = 2,
    Sink = 3,
}

impl Stage {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Capture => "capture",
            Stage::Encoder => "encoder",
            Stage::Decoder => "decoder",
            Stage::Sink => "sink",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wire capture → encoder → decoder → sink and start every stage.
pub fn spawn_loopback<C, E, D, S>(
    controller: &mut LifecycleController,
    config: PipelineConfig,
    stats: Arc<StatsAggregator>,
    capture: C,
    encoder: E,
    decoder: D,
    sink: S,
) where
    C: CaptureDevice + 'static,
    E: FrameEncoder + 'static,
    D: FrameDecoder + 'static,
    S: FrameSink<PcmFrame> + 'static,
{
    let capacity = config.queue_capacity;
    let (pcm_tx, pcm_rx) = handoff(capacity, Stage::Encoder, stats.clone());
    let (payload_tx, payload_rx) = handoff(capacity, Stage::Decoder, stats.clone());
    let (decoded_tx, decoded_rx) = handoff(capacity, Stage::Sink, stats.clone());

    let token = controller.token();
    controller.spawn(
        Stage::Sink,
        SinkStage::new(decoded_rx, sink).run(token.clone()),
    );
    controller.spawn(
        Stage::Decoder,
        DecoderStage::new(decoder, config, payload_rx, decoded_tx, stats.clone())
            .run(token.clone()),
    );
    controller.spawn(
        Stage::Encoder,
        EncoderStage::new(encoder, config, pcm_rx, payload_tx, stats.clone()).run(token.clone()),
    );
    let source = FrameSource::new(capture, config, pcm_tx, stats);
    controller.spawn_blocking(Stage::Capture, move || source.run(&token));

    info!(
        "Loopback pipeline started: {}Hz {}ch {} frames",
        config.sample_rate, config.channels, config.frame_duration
    );
}

/// Wire capture → encoder → sink and start every stage.
pub fn spawn_relay<C, E, S>(
    controller: &mut LifecycleController,
    config: PipelineConfig,
    stats: Arc<StatsAggregator>,
    capture: C,
    encoder: E,
    sink: S,
) where
    C: CaptureDevice + 'static,
    E: FrameEncoder + 'static,
    S: FrameSink<CodecPayload> + 'static,
{
    let capacity = config.queue_capacity;
    let (pcm_tx, pcm_rx) = handoff(capacity, Stage::Encoder, stats.clone());
    let (payload_tx, payload_rx) = handoff(capacity, Stage::Sink, stats.clone());

    let token = controller.token();
    controller.spawn(
        Stage::Sink,
        SinkStage::new(payload_rx, sink).run(token.clone()),
    );
    controller.spawn(
        Stage::Encoder,
        EncoderStage::new(encoder, config, pcm_rx, payload_tx, stats.clone()).run(token.clone()),
    );
    let source = FrameSource::new(capture, config, pcm_tx, stats);
    controller.spawn_blocking(Stage::Capture, move || source.run(&token));

    info!(
        "Relay pipeline started: {}Hz {}ch {} frames",
        config.sample_rate, config.channels, config.frame_duration
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_indices_are_dense() {
        let stages = [Stage::Capture, Stage::Encoder, Stage::Decoder, Stage::Sink];
        for (i, stage) in stages.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
        assert_eq!(stages.len(), Stage::COUNT);
        assert_eq!(Stage::Decoder.to_string(), "decoder");
    }
}
