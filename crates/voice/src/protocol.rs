//! Defines the JSON message protocol spoken over the signaling channel.

use crate::error::ProtocolError;
use matchday_core::Intent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A network path proposed by one of the peers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Messages sent from the client to the remote agent.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// The local session description offer.
    Offer { sdp: String },
    /// A locally discovered ICE candidate.
    IceCandidate { candidate: IceCandidate },
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages received from the remote agent.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The remote session description answering our offer.
    Answer { sdp: String },
    IceCandidate(IceCandidate),
    /// The agent started speaking.
    AudioStart,
    /// The agent finished speaking.
    AudioEnd,
    /// A message-framed audio chunk, still base64 encoded.
    Audio { data: String },
    /// A structured intent.
    Intent(Intent),
    /// Free agent text.
    Text(String),
    /// Anything else; carries the `type` field when there was one.
    Unknown(Option<String>),
}

impl InboundMessage {
    /// Parses one raw signaling frame.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw)?;
        let kind = value.get("type").and_then(Value::as_str);

        match kind {
            Some("answer" | "sdp_answer") => extract_sdp(&value)
                .map(|sdp| InboundMessage::Answer { sdp })
                .ok_or_else(|| malformed(kind, "missing or invalid session description")),
            Some("ice_candidate") => parse_candidate(&value).map(InboundMessage::IceCandidate),
            Some("audio_start") => Ok(InboundMessage::AudioStart),
            Some("audio_end") => Ok(InboundMessage::AudioEnd),
            Some("audio") => value
                .get("audio_data")
                .or_else(|| value.get("audio"))
                .and_then(Value::as_str)
                .map(|data| InboundMessage::Audio {
                    data: data.to_string(),
                })
                .ok_or_else(|| malformed(kind, "missing base64 audio payload")),
            Some("intent") => serde_json::from_value::<Intent>(value.clone())
                .map(InboundMessage::Intent)
                .map_err(|e| malformed(kind, &e.to_string())),
            _ => Ok(match value.get("text").and_then(Value::as_str) {
                Some(text) => InboundMessage::Text(text.to_string()),
                None => InboundMessage::Unknown(kind.map(str::to_string)),
            }),
        }
    }
}

fn malformed(kind: Option<&str>, reason: &str) -> ProtocolError {
    ProtocolError::Malformed {
        kind: kind.unwrap_or("<none>").to_string(),
        reason: reason.to_string(),
    }
}

/// Finds an SDP answer at the top level or nested under `payload`/`data`.
fn extract_sdp(message: &Value) -> Option<String> {
    let looks_like_sdp = |sdp: &&str| sdp.contains("v=0") && sdp.contains("m=audio");
    [
        message.get("sdp"),
        message.pointer("/payload/sdp"),
        message.pointer("/data/sdp"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .find(looks_like_sdp)
    .map(str::to_string)
}

/// Accepts both `{candidate: {candidate, sdpMid, sdpMLineIndex}}` and a bare
/// candidate string with the media fields alongside it.
fn parse_candidate(message: &Value) -> Result<IceCandidate, ProtocolError> {
    let kind = Some("ice_candidate");
    match message.get("candidate") {
        Some(Value::String(candidate)) => Ok(IceCandidate {
            candidate: candidate.clone(),
            sdp_mid: message
                .get("sdpMid")
                .and_then(Value::as_str)
                .map(str::to_string),
            sdp_mline_index: message
                .get("sdpMLineIndex")
                .and_then(Value::as_u64)
                .and_then(|i| u16::try_from(i).ok()),
        }),
        Some(object @ Value::Object(_)) => serde_json::from_value(object.clone())
            .map_err(|e| malformed(kind, &e.to_string())),
        _ => Err(malformed(kind, "missing candidate")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchday_core::NavTarget;
    use serde_json::json;

    const SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\nm=audio 9 UDP/TLS/RTP/SAVPF 0\r\n";

    #[test]
    fn test_outbound_offer_shape() {
        let msg = OutboundMessage::Offer {
            sdp: "v=0".to_string(),
        };
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json, json!({"type": "offer", "sdp": "v=0"}));
    }

    #[test]
    fn test_outbound_candidate_shape() {
        let msg = OutboundMessage::IceCandidate {
            candidate: IceCandidate {
                candidate: "candidate:1 1 UDP 1 10.0.0.1 5000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
        };
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "ice_candidate");
        assert_eq!(json["candidate"]["sdpMid"], "0");
        assert_eq!(json["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_parse_answer_variants() {
        let top = json!({"type": "answer", "sdp": SDP}).to_string();
        assert_eq!(
            InboundMessage::parse(&top).unwrap(),
            InboundMessage::Answer { sdp: SDP.to_string() }
        );

        let aliased = json!({"type": "sdp_answer", "sdp": SDP}).to_string();
        assert!(matches!(
            InboundMessage::parse(&aliased).unwrap(),
            InboundMessage::Answer { .. }
        ));

        let nested = json!({"type": "answer", "payload": {"sdp": SDP}}).to_string();
        assert!(matches!(
            InboundMessage::parse(&nested).unwrap(),
            InboundMessage::Answer { .. }
        ));

        let not_sdp = json!({"type": "answer", "sdp": "hello"}).to_string();
        assert!(matches!(
            InboundMessage::parse(&not_sdp),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_candidate_variants() {
        let object = json!({
            "type": "ice_candidate",
            "candidate": {"candidate": "candidate:1", "sdpMid": "0", "sdpMLineIndex": 0}
        })
        .to_string();
        assert_eq!(
            InboundMessage::parse(&object).unwrap(),
            InboundMessage::IceCandidate(IceCandidate {
                candidate: "candidate:1".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            })
        );

        let flat = json!({"type": "ice_candidate", "candidate": "candidate:2", "sdpMLineIndex": 1})
            .to_string();
        match InboundMessage::parse(&flat).unwrap() {
            InboundMessage::IceCandidate(c) => {
                assert_eq!(c.candidate, "candidate:2");
                assert_eq!(c.sdp_mid, None);
                assert_eq!(c.sdp_mline_index, Some(1));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let missing = json!({"type": "ice_candidate"}).to_string();
        assert!(InboundMessage::parse(&missing).is_err());
    }

    #[test]
    fn test_parse_speaking_markers_and_audio() {
        assert_eq!(
            InboundMessage::parse(r#"{"type":"audio_start"}"#).unwrap(),
            InboundMessage::AudioStart
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"audio_end"}"#).unwrap(),
            InboundMessage::AudioEnd
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"audio","audio_data":"AAAA"}"#).unwrap(),
            InboundMessage::Audio {
                data: "AAAA".to_string()
            }
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"audio","audio":"BBBB"}"#).unwrap(),
            InboundMessage::Audio {
                data: "BBBB".to_string()
            }
        );
        assert!(InboundMessage::parse(r#"{"type":"audio"}"#).is_err());
    }

    #[test]
    fn test_parse_structured_intent() {
        let raw = json!({"type": "intent", "action": "navigate", "target": "tables"}).to_string();
        assert_eq!(
            InboundMessage::parse(&raw).unwrap(),
            InboundMessage::Intent(Intent::navigate(NavTarget::Tables))
        );

        let bad = json!({"type": "intent", "action": "navigate", "target": "moon"}).to_string();
        assert!(InboundMessage::parse(&bad).is_err());
    }

    #[test]
    fn test_parse_text_and_unknown() {
        assert_eq!(
            InboundMessage::parse(r#"{"type":"agent_response","text":"Here is the squad"}"#)
                .unwrap(),
            InboundMessage::Text("Here is the squad".to_string())
        );
        assert_eq!(
            InboundMessage::parse(r#"{"text":"untyped"}"#).unwrap(),
            InboundMessage::Text("untyped".to_string())
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"ping","event_id":3}"#).unwrap(),
            InboundMessage::Unknown(Some("ping".to_string()))
        );
        assert_eq!(
            InboundMessage::parse("{}").unwrap(),
            InboundMessage::Unknown(None)
        );
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(matches!(
            InboundMessage::parse("not json"),
            Err(ProtocolError::Json(_))
        ));
    }
}
