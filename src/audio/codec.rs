//! Codec interfaces.
//!
//! Implementations only need the external contract: one fixed-duration
//! PCM frame in, one payload out, and the reverse. Cross-frame state is
//! allowed but the pipeline does not rely on it.

use crate::error::Result;

pub trait FrameEncoder: Send {
    /// Encode one interleaved PCM frame into at most `max_payload` bytes.
    fn encode(&mut self, pcm: &[i16], max_payload: usize) -> Result<Vec<u8>>;
}

pub trait FrameDecoder: Send {
    /// Decode `payload` into `out`. Returns samples written per channel.
    fn decode(&mut self, payload: &[u8], out: &mut [i16]) -> Result<usize>;
}

impl<T: FrameEncoder + ?Sized> FrameEncoder for Box<T> {
    fn encode(&mut self, pcm: &[i16], max_payload: usize) -> Result<Vec<u8>> {
        (**self).encode(pcm, max_payload)
    }
}

impl<T: FrameDecoder + ?Sized> FrameDecoder for Box<T> {
    fn decode(&mut self, payload: &[u8], out: &mut [i16]) -> Result<usize> {
        (**self).decode(payload, out)
    }
}
