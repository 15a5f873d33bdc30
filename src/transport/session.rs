//! Session description line codec.
//!
//! The peer's description arrives as one line of base64 text. Inside is
//! either a bare SDP document or the browser's JSON form
//! `{"type":"offer","sdp":"..."}`. The answer goes back in whichever form
//! the offer used.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionFormat {
    RawSdp,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp: String,
    pub format: DescriptionFormat,
}

#[derive(Serialize, Deserialize)]
struct JsonDescription {
    #[serde(rename = "type")]
    kind: String,
    sdp: String,
}

/// Decode the offer line read from the operator.
pub fn decode_offer(line: &str) -> Result<SessionDescription> {
    let line = line.trim();
    if line.is_empty() {
        return Err(PipelineError::Protocol("empty session description".into()));
    }

    let raw = STANDARD
        .decode(line)
        .map_err(|e| PipelineError::Protocol(format!("session description is not base64: {}", e)))?;
    let text = String::from_utf8(raw)
        .map_err(|_| PipelineError::Protocol("session description is not UTF-8".into()))?;

    if text.trim_start().starts_with('{') {
        let desc: JsonDescription = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Protocol(format!("bad JSON session description: {}", e)))?;
        if desc.kind != "offer" {
            return Err(PipelineError::Protocol(format!(
                "expected an offer, got '{}'",
                desc.kind
            )));
        }
        check_sdp(&desc.sdp)?;
        return Ok(SessionDescription {
            sdp: desc.sdp,
            format: DescriptionFormat::Json,
        });
    }

    check_sdp(&text)?;
    Ok(SessionDescription {
        sdp: text,
        format: DescriptionFormat::RawSdp,
    })
}

/// Encode our answer as one base64 line.
pub fn encode_answer(sdp: &str, format: DescriptionFormat) -> Result<String> {
    let body = match format {
        DescriptionFormat::RawSdp => sdp.to_string(),
        DescriptionFormat::Json => serde_json::to_string(&JsonDescription {
            kind: "answer".into(),
            sdp: sdp.to_string(),
        })
        .map_err(|e| PipelineError::Protocol(e.to_string()))?,
    };
    Ok(STANDARD.encode(body))
}

fn check_sdp(sdp: &str) -> Result<()> {
    if sdp.trim_start().starts_with("v=0") {
        Ok(())
    } else {
        Err(PipelineError::Protocol(
            "session description is not an SDP document".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

    #[test]
    fn test_raw_sdp_offer() {
        let line = format!("{}\n", STANDARD.encode(SDP));
        let desc = decode_offer(&line).unwrap();
        assert_eq!(desc.sdp, SDP);
        assert_eq!(desc.format, DescriptionFormat::RawSdp);
    }

    #[test]
    fn test_json_offer_answers_in_json() {
        let offer = serde_json::json!({ "type": "offer", "sdp": SDP }).to_string();
        let desc = decode_offer(&STANDARD.encode(offer)).unwrap();
        assert_eq!(desc.format, DescriptionFormat::Json);

        let answer = encode_answer("v=0\r\n", desc.format).unwrap();
        let decoded: serde_json::Value =
            serde_json::from_slice(&STANDARD.decode(answer).unwrap()).unwrap();
        assert_eq!(decoded["type"], "answer");
        assert_eq!(decoded["sdp"], "v=0\r\n");
    }

    #[test]
    fn test_raw_answer_is_plain_base64() {
        let answer = encode_answer(SDP, DescriptionFormat::RawSdp).unwrap();
        assert_eq!(STANDARD.decode(answer).unwrap(), SDP.as_bytes());
    }

    #[test]
    fn test_malformed_lines_are_protocol_errors() {
        let not_offer = serde_json::json!({ "type": "answer", "sdp": SDP }).to_string();
        let cases = [
            String::new(),
            "!!! not base64 !!!".to_string(),
            STANDARD.encode([0xff, 0xfe, 0x00]),
            STANDARD.encode("hello"),
            STANDARD.encode("{ broken json"),
            STANDARD.encode(not_offer),
        ];
        for line in cases {
            let err = decode_offer(&line).unwrap_err();
            assert!(err.is_protocol(), "{:?}: {}", line, err);
        }
    }
}
