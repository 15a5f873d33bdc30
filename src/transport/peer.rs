//! WebRTC peer connection carrying one Opus track.
//!
//! We are always the answering side: the peer's offer comes in, our
//! answer goes out once ICE gathering has finished, and from then on every
//! codec payload the pipeline produces is written to the track as one
//! media sample.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::config::WebRtcConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::{CodecPayload, FrameSink};

/// RTP clock for Opus is fixed regardless of the encoder's sample rate.
const OPUS_CLOCK_RATE: u32 = 48000;

fn opus_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: OPUS_CLOCK_RATE,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
}

impl WebRtcTransport {
    /// Answer `offer_sdp`. Returns the transport and our answer SDP.
    pub async fn connect(config: &WebRtcConfig, offer_sdp: String) -> Result<(Self, String)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PipelineError::Transport(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            PipelineError::Transport(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            PipelineError::Transport(format!("Failed to create peer connection: {}", e))
        })?);

        pc.on_ice_connection_state_change(Box::new(|state: RTCIceConnectionState| {
            Box::pin(async move {
                info!("Connection State has changed {}", state);
            })
        }));

        let track = Arc::new(TrackLocalStaticSample::new(
            opus_codec_capability(),
            config.track_id.clone(),
            config.stream_id.clone(),
        ));
        let rtp_sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| PipelineError::Transport(format!("Failed to add audio track: {}", e)))?;

        // RTCP has to be read for the interceptors to run.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
            debug!("RTCP reader finished");
        });

        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| PipelineError::Protocol(format!("Invalid SDP offer: {}", e)))?;
        pc.set_remote_description(offer).await.map_err(|e| {
            PipelineError::Protocol(format!("Failed to set remote description: {}", e))
        })?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| PipelineError::Transport(format!("Failed to create answer: {}", e)))?;

        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(answer).await.map_err(|e| {
            PipelineError::Transport(format!("Failed to set local description: {}", e))
        })?;
        // Answer carries every candidate: there is no trickle channel back.
        let _ = gather_complete.recv().await;

        let local = pc.local_description().await.ok_or_else(|| {
            PipelineError::Transport("no local description after ICE gathering".into())
        })?;
        info!("WebRTC answer ready, Opus track '{}' added", config.track_id);

        Ok((Self { pc, track }, local.sdp))
    }

    /// Sink writing payloads to this transport's track.
    pub fn sink(&self, sample_rate: u32) -> WebRtcSink {
        WebRtcSink {
            pc: self.pc.clone(),
            track: self.track.clone(),
            sample_rate,
        }
    }
}

/// Relay-mode sink. Closing it closes the peer connection.
pub struct WebRtcSink {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    sample_rate: u32,
}

/// Media time covered by `samples` per-channel samples at `sample_rate`.
pub fn sample_duration(samples: u32, sample_rate: u32) -> Duration {
    Duration::from_micros(samples as u64 * 1_000_000 / sample_rate.max(1) as u64)
}

#[async_trait]
impl FrameSink<CodecPayload> for WebRtcSink {
    fn name(&self) -> &str {
        "webrtc"
    }

    async fn deliver(&mut self, payload: CodecPayload) -> Result<()> {
        let sample = Sample {
            duration: sample_duration(payload.samples(), self.sample_rate),
            data: payload.into_data(),
            ..Default::default()
        };
        // Fails until the peer is connected; not fatal.
        if let Err(e) = self.track.write_sample(&sample).await {
            debug!("Opus write_sample failed: {}", e);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        info!("quitting WebRTC pipe");
        self.pc.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_duration() {
        assert_eq!(sample_duration(960, 48000), Duration::from_millis(20));
        assert_eq!(sample_duration(2880, 48000), Duration::from_millis(60));
        assert_eq!(sample_duration(120, 48000), Duration::from_micros(2500));
        assert_eq!(sample_duration(160, 8000), Duration::from_millis(20));
    }

    #[test]
    fn test_codec_capability_is_opus() {
        let codec = opus_codec_capability();
        assert_eq!(codec.mime_type, MIME_TYPE_OPUS);
        assert_eq!(codec.clock_rate, 48000);
    }
}
