//! audio - capture/playback devices and the speech codec
//!
//! The pipeline only sees the traits in `device` and `codec`. ALSA and
//! Opus are the production bindings; `mock` provides hardware-free
//! devices for tests and dry runs.

mod alsa_device;
pub mod codec;
pub mod device;
pub mod mock;
mod opus_codec;

pub use alsa_device::{AlsaCapture, AlsaPlayback};
pub use codec::{FrameDecoder, FrameEncoder};
pub use device::{CaptureDevice, PlaybackDevice};
pub use opus_codec::{OpusDecoder, OpusEncoder};
