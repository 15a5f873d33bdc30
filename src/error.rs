//! Error taxonomy for the relay pipeline.
//!
//! Every fatal condition is one of a handful of kinds so that the caller
//! (the binary, a test, a supervisor) decides what to do with it. A full
//! downstream queue is not an error and never shows up here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Capture/playback device open, read, write or drain failure.
    #[error("audio device error: {0}")]
    Device(String),

    /// Codec construction, encode or decode failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// A frame violated the fixed-duration contract.
    #[error("frame size mismatch in {stage}: expected {expected} samples, got {actual}")]
    FrameSize {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Malformed session description or other wire-level violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stage task panicked or was aborted before acknowledging exit.
    #[error("stage {stage} failed: {reason}")]
    Stage { stage: &'static str, reason: String },
}

impl PipelineError {
    /// True for the errors that the fixed-duration framing contract produces.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::FrameSize { .. } | Self::Protocol(_))
    }
}

impl From<opus::Error> for PipelineError {
    fn from(e: opus::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<alsa::Error> for PipelineError {
    fn from(e: alsa::Error) -> Self {
        Self::Device(e.to_string())
    }
}

impl From<webrtc::Error> for PipelineError {
    fn from(e: webrtc::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
