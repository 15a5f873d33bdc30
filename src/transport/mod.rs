//! transport - the relay-mode network side
//!
//! - `session`: base64 line codec for offer/answer session descriptions
//! - `peer`: WebRTC peer connection and the Opus track sink

pub mod peer;
pub mod session;

pub use peer::{WebRtcSink, WebRtcTransport};
pub use session::{DescriptionFormat, SessionDescription, decode_offer, encode_answer};
