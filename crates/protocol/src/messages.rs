use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Origin marker stamped into every text payload sent over the data
/// channel; the renderer-side plugin filters on it.
pub const DATA_ORIGIN: &str = "dataconnector";

/// Signalling messages exchanged with the pixel-streaming signalling
/// server. The wire uses camelCase `type` tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalMessage {
    /// SDP offer, sent by whichever side takes the first step.
    Offer {
        sdp: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
    /// SDP answer from the responding side.
    Answer { sdp: String },
    /// Trickled ICE candidate.
    IceCandidate { candidate: CandidateInit },
    /// Server-assigned endpoint id.
    Id { id: u32 },
    /// Role assignment: "server" responds, anything else initiates.
    Role { role: String },
    /// Peer-connection options (ICE servers), applied at the next
    /// peer-connection construction.
    Config {
        #[serde(rename = "peerConnectionOptions")]
        peer_connection_options: Value,
    },
    PlayerCount {
        count: u32,
    },
    PlayerConnected,
    PlayerDisconnected,
    ServerDisconnected,
    Control {
        message: Value,
    },
}

/// The candidate object nested inside an `iceCandidate` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
}

/// Wrap a plain string the way the renderer expects application text.
pub fn wrap_text(data: &str) -> Value {
    json!({ "origin": DATA_ORIGIN, "data": data })
}

/// Opening message of a chunked buffer transfer.
pub fn buffer_start(name: &str, total_size: usize, format: &str) -> Value {
    json!({ "type": "buffer", "start": name, "size": total_size, "format": format })
}

/// Closing message of a chunked buffer transfer.
pub fn buffer_stop(name: &str) -> Value {
    json!({ "type": "buffer", "stop": name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_wire_shape() {
        let msg = SignalMessage::Offer {
            sdp: "v=0\r\n...".to_string(),
            endpoint: Some("data".to_string()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"offer""#));
        assert!(json.contains(r#""endpoint":"data""#));
        let parsed: SignalMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            SignalMessage::Offer { sdp, endpoint } => {
                assert_eq!(sdp, "v=0\r\n...");
                assert_eq!(endpoint.as_deref(), Some("data"));
            }
            other => panic!("expected Offer, got {other:?}"),
        }
    }

    #[test]
    fn answer_without_endpoint_field() {
        let msg = SignalMessage::Answer {
            sdp: "v=0\r\nanswer".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"answer""#));
        assert!(!json.contains("endpoint"));
    }

    #[test]
    fn ice_candidate_uses_sdp_mline_index_casing() {
        let msg = SignalMessage::IceCandidate {
            candidate: CandidateInit {
                candidate: "candidate:1 1 UDP 2122317823 172.26.15.227 42835 typ host"
                    .to_string(),
                sdp_mid: "0".to_string(),
                sdp_mline_index: 0,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        // Exact field casing the signalling server emits
        assert!(json.contains(r#""type":"iceCandidate""#));
        assert!(json.contains(r#""sdpMid":"0""#));
        assert!(json.contains(r#""sdpMLineIndex":0"#));
    }

    #[test]
    fn ice_candidate_from_server_format() {
        let server_json = r#"{
            "type": "iceCandidate",
            "candidate": {
                "candidate": "candidate:1 1 UDP 2122317823 172.26.15.227 42835 typ host",
                "sdpMLineIndex": 1,
                "sdpMid": "1"
            }
        }"#;
        let msg: SignalMessage = serde_json::from_str(server_json).unwrap();
        match msg {
            SignalMessage::IceCandidate { candidate } => {
                assert!(candidate.candidate.starts_with("candidate:"));
                assert_eq!(candidate.sdp_mid, "1");
                assert_eq!(candidate.sdp_mline_index, 1);
            }
            other => panic!("expected IceCandidate, got {other:?}"),
        }
    }

    #[test]
    fn unit_variants_are_tag_only() {
        let json = serde_json::to_string(&SignalMessage::PlayerConnected).unwrap();
        assert_eq!(json, r#"{"type":"playerConnected"}"#);
        let parsed: SignalMessage =
            serde_json::from_str(r#"{"type":"playerDisconnected"}"#).unwrap();
        assert!(matches!(parsed, SignalMessage::PlayerDisconnected));
    }

    #[test]
    fn id_and_role_roundtrip() {
        let parsed: SignalMessage = serde_json::from_str(r#"{"type":"id","id":7}"#).unwrap();
        assert!(matches!(parsed, SignalMessage::Id { id: 7 }));
        let parsed: SignalMessage =
            serde_json::from_str(r#"{"type":"role","role":"server"}"#).unwrap();
        match parsed {
            SignalMessage::Role { role } => assert_eq!(role, "server"),
            other => panic!("expected Role, got {other:?}"),
        }
    }

    #[test]
    fn config_keeps_peer_connection_options_verbatim() {
        let parsed: SignalMessage = serde_json::from_str(
            r#"{"type":"config","peerConnectionOptions":{"iceServers":[{"urls":["stun:stun.example.com:3478"]}]}}"#,
        )
        .unwrap();
        match parsed {
            SignalMessage::Config {
                peer_connection_options,
            } => {
                assert!(peer_connection_options["iceServers"].is_array());
            }
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let result = serde_json::from_str::<SignalMessage>(r#"{"type":"telemetry","x":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn wrap_text_shape() {
        let value = wrap_text("hello");
        assert_eq!(value["origin"], DATA_ORIGIN);
        assert_eq!(value["data"], "hello");
    }

    #[test]
    fn buffer_control_shapes() {
        let start = buffer_start("points", 40_000, "raw");
        assert_eq!(start["type"], "buffer");
        assert_eq!(start["start"], "points");
        assert_eq!(start["size"], 40_000);
        assert_eq!(start["format"], "raw");

        let stop = buffer_stop("points");
        assert_eq!(stop["type"], "buffer");
        assert_eq!(stop["stop"], "points");
        assert!(stop.get("start").is_none());
    }
}
