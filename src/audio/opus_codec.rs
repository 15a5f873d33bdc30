//! Opus encoder/decoder bound to the pipeline's fixed frame size.
//!
//! - Encoder: interleaved PCM frame → Opus packet
//! - Decoder: Opus packet → interleaved PCM frame

use super::codec::{FrameDecoder, FrameEncoder};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

fn opus_channels(channels: u32) -> Result<opus::Channels> {
    match channels {
        1 => Ok(opus::Channels::Mono),
        2 => Ok(opus::Channels::Stereo),
        n => Err(PipelineError::Codec(format!(
            "opus supports 1 or 2 channels, got {}",
            n
        ))),
    }
}

// ======================== Opus Encoder ========================

/// Persistent Opus encoder, one instance for the whole stream.
pub struct OpusEncoder {
    encoder: opus::Encoder,
    frame_samples: usize,
}

impl OpusEncoder {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let mut encoder = opus::Encoder::new(
            config.sample_rate,
            opus_channels(config.channels)?,
            config.application.to_opus(),
        )?;
        if let Some(bitrate) = config.bitrate {
            encoder.set_bitrate(opus::Bitrate::Bits(bitrate))?;
        }

        log::info!(
            "Opus encoder created: {}Hz {}ch {:?} frame={} bitrate={:?}",
            config.sample_rate,
            config.channels,
            config.application,
            config.frame_duration,
            config.bitrate,
        );

        Ok(Self {
            encoder,
            frame_samples: config.frame_samples(),
        })
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16], max_payload: usize) -> Result<Vec<u8>> {
        if pcm.len() != self.frame_samples {
            return Err(PipelineError::FrameSize {
                stage: "opus encoder",
                expected: self.frame_samples,
                actual: pcm.len(),
            });
        }
        // Fresh buffer per frame: the packet leaves this call owned by the caller.
        Ok(self.encoder.encode_vec(pcm, max_payload)?)
    }
}

// ======================== Opus Decoder ========================

pub struct OpusDecoder {
    decoder: opus::Decoder,
}

impl OpusDecoder {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let decoder = opus::Decoder::new(config.sample_rate, opus_channels(config.channels)?)?;

        log::info!(
            "Opus decoder created: {}Hz {}ch",
            config.sample_rate,
            config.channels
        );

        Ok(Self { decoder })
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, payload: &[u8], out: &mut [i16]) -> Result<usize> {
        Ok(self.decoder.decode(payload, out, false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameDuration;

    fn config(frame_duration: FrameDuration, channels: u32) -> PipelineConfig {
        PipelineConfig {
            frame_duration,
            channels,
            ..Default::default()
        }
    }

    #[test]
    fn test_encode_silence_every_duration() {
        for duration in FrameDuration::ALL {
            let config = config(duration, 1);
            let mut encoder = OpusEncoder::new(&config).unwrap();
            let silence = vec![0i16; config.frame_samples()];
            let packet = encoder.encode(&silence, config.max_payload_size).unwrap();
            assert!(!packet.is_empty(), "{}", duration);
            assert!(packet.len() <= config.max_payload_size);
        }
    }

    #[test]
    fn test_wrong_frame_size_rejected() {
        let config = config(FrameDuration::Ms20, 1);
        let mut encoder = OpusEncoder::new(&config).unwrap();
        let err = encoder.encode(&[0i16; 100], 1000).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_zero_frame_round_trip_length() {
        let config = config(FrameDuration::Ms20, 2);
        let mut encoder = OpusEncoder::new(&config).unwrap();
        let mut decoder = OpusDecoder::new(&config).unwrap();

        let packet = encoder
            .encode(&vec![0i16; config.frame_samples()], config.max_payload_size)
            .unwrap();
        let mut out = vec![0i16; config.frame_samples()];
        let per_channel = decoder.decode(&packet, &mut out).unwrap();
        assert_eq!(per_channel, config.samples_per_channel());
        assert_eq!(per_channel * config.channels as usize, config.frame_samples());
    }

    #[test]
    fn test_garbage_payload_is_codec_error() {
        let config = config(FrameDuration::Ms20, 1);
        let mut decoder = OpusDecoder::new(&config).unwrap();
        // Code-3 packet claiming 63 frames of 20ms: over the 120ms packet limit.
        let mut out = vec![0i16; config.frame_samples()];
        let err = decoder.decode(&[0xfb, 0xff, 0xfe], &mut out).unwrap_err();
        assert!(matches!(err, PipelineError::Codec(_)));
    }

    #[test]
    fn test_bitrate_applied() {
        let config = PipelineConfig {
            bitrate: Some(16000),
            frame_duration: FrameDuration::Ms20,
            ..Default::default()
        };
        assert!(OpusEncoder::new(&config).is_ok());
    }
}
