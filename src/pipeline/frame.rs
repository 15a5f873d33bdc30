//! Units of data that move between stages.
//!
//! Both types own their storage. Sending one through a queue moves it, so
//! a payload can never be mutated by a later encode while the next stage
//! is still reading it.

use bytes::Bytes;

/// Size accounting used by the handoff queue when it reports a drop.
pub trait FrameSize {
    /// Interleaved samples the item represents.
    fn sample_count(&self) -> usize;
    /// Bytes the item occupies in its current encoding.
    fn byte_len(&self) -> usize;
}

/// One fixed-duration block of interleaved signed 16-bit samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    samples: Vec<i16>,
    sequence: u64,
}

impl PcmFrame {
    pub fn new(samples: Vec<i16>, sequence: u64) -> Self {
        Self { samples, sequence }
    }

    /// Decode little-endian S16 bytes. An odd trailing byte is discarded.
    pub fn from_le_bytes(bytes: &[u8], sequence: u64) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self { samples, sequence }
    }

    /// Serialize to little-endian S16 bytes for a playback device.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl FrameSize for PcmFrame {
    fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn byte_len(&self) -> usize {
        self.samples.len() * 2
    }
}

/// One encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPayload {
    data: Bytes,
    /// Samples per channel the payload decodes to.
    samples: u32,
    channels: u32,
    sequence: u64,
}

impl CodecPayload {
    /// A mono payload. Use [`CodecPayload::with_channels`] for stereo.
    pub fn new(data: impl Into<Bytes>, samples: u32, sequence: u64) -> Self {
        Self {
            data: data.into(),
            samples,
            channels: 1,
            sequence,
        }
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels.max(1);
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl FrameSize for CodecPayload {
    fn sample_count(&self) -> usize {
        self.samples as usize * self.channels as usize
    }

    fn byte_len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_decoding() {
        let bytes = [0x01, 0x00, 0xff, 0x7f, 0x00, 0x80, 0xfe, 0xff];
        let frame = PcmFrame::from_le_bytes(&bytes, 7);
        assert_eq!(frame.samples(), &[1, i16::MAX, i16::MIN, -2]);
        assert_eq!(frame.sequence(), 7);
        assert_eq!(frame.to_le_bytes(), bytes);
    }

    #[test]
    fn test_odd_trailing_byte_dropped() {
        let frame = PcmFrame::from_le_bytes(&[0x10, 0x00, 0x20, 0x00, 0x33], 0);
        assert_eq!(frame.samples(), &[16, 32]);
        assert_eq!(frame.byte_len(), 4);
    }

    #[test]
    fn test_payload_owns_its_bytes() {
        let mut scratch = vec![1u8, 2, 3];
        let payload = CodecPayload::new(scratch.clone(), 960, 0);
        scratch.fill(0);
        assert_eq!(payload.data().as_ref(), &[1, 2, 3]);
        assert_eq!(payload.sample_count(), 960);
        assert_eq!(payload.byte_len(), 3);
    }

    #[test]
    fn test_stereo_payload_counts_interleaved_samples() {
        let payload = CodecPayload::new(vec![0u8; 8], 960, 0).with_channels(2);
        assert_eq!(payload.samples(), 960);
        assert_eq!(payload.sample_count(), 1920);
        // Same unit as the PCM frame it was encoded from.
        assert_eq!(payload.sample_count(), PcmFrame::new(vec![0; 1920], 0).sample_count());
    }
}
