//! Real-time audio relay: capture PCM, encode to Opus, then either send it
//! to a WebRTC peer or decode and play it back locally.

pub mod audio;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod transport;

pub use config::{Config, Mode, PipelineConfig};
pub use error::{PipelineError, Result};
pub use lifecycle::{LifecycleController, LifecycleState, ShutdownHandle};
