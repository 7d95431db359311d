//! Binary envelope framing for the renderer data channel.
//!
//! Every outbound text/JSON payload is wrapped in a small frame the
//! renderer's stream plugin expects, little-endian:
//! ```text
//! [0]      message tag (u8)
//! [1..3]   body length (u16)
//! [3..3+n] UTF-8 body
//! [3+n]    null terminator
//! ```
//! The trailing null counts toward the transmitted size, so a frame is
//! always `body + 4` bytes long.

/// Tag used for application payloads sent towards the renderer.
pub const APPLICATION_TAG: u8 = 0x28;

/// Bytes of framing around the body (tag + length + null terminator).
pub const ENVELOPE_OVERHEAD: usize = 4;

/// Hard cap on a single data-channel message. The 16-bit length field
/// cannot represent more, and the three header bytes plus the null must
/// still fit.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize - 3;

/// Inbound message tags as emitted by the pixel-streaming client protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientMessageTag {
    QualityControlOwnership = 0,
    Response = 1,
    Command = 2,
    FreezeFrame = 3,
    UnfreezeFrame = 4,
    VideoEncoderAvgQp = 5,
    LatencyTest = 6,
    InitialSettings = 7,
    FileExtension = 8,
    FileMimeType = 9,
    FileContents = 10,
    TestEcho = 11,
    InputControlOwnership = 12,
    GamepadResponse = 13,
    Protocol = 255,
}

impl ClientMessageTag {
    pub fn from_u8(byte: u8) -> Option<Self> {
        use ClientMessageTag::*;
        Some(match byte {
            0 => QualityControlOwnership,
            1 => Response,
            2 => Command,
            3 => FreezeFrame,
            4 => UnfreezeFrame,
            5 => VideoEncoderAvgQp,
            6 => LatencyTest,
            7 => InitialSettings,
            8 => FileExtension,
            9 => FileMimeType,
            10 => FileContents,
            11 => TestEcho,
            12 => InputControlOwnership,
            13 => GamepadResponse,
            255 => Protocol,
            _ => return None,
        })
    }

    /// Only `Response`, `InitialSettings`, and `Protocol` carry a JSON
    /// body worth parsing; everything else is status-only.
    pub fn carries_json(self) -> bool {
        matches!(
            self,
            ClientMessageTag::Response
                | ClientMessageTag::InitialSettings
                | ClientMessageTag::Protocol
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("body too large for envelope: {0} bytes (max {max})", max = MAX_MESSAGE_SIZE - ENVELOPE_OVERHEAD)]
    BodyTooLarge(usize),
    #[error("frame too short: {0} bytes (need at least {ENVELOPE_OVERHEAD})")]
    TooShort(usize),
    #[error("frame length {actual} does not match declared body length {declared}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("frame is missing its null terminator")]
    MissingTerminator,
}

/// Frame a body into `[tag][len:u16][body][0]`.
pub fn encode_envelope(tag: u8, body: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    if body.len() > MAX_MESSAGE_SIZE - ENVELOPE_OVERHEAD {
        return Err(EnvelopeError::BodyTooLarge(body.len()));
    }
    let mut frame = vec![0u8; body.len() + ENVELOPE_OVERHEAD];
    frame[0] = tag;
    frame[1..3].copy_from_slice(&(body.len() as u16).to_le_bytes());
    frame[3..3 + body.len()].copy_from_slice(body);
    // last byte already zero: the terminator
    Ok(frame)
}

/// Split a frame back into `(tag, body)`.
pub fn decode_envelope(frame: &[u8]) -> Result<(u8, &[u8]), EnvelopeError> {
    if frame.len() < ENVELOPE_OVERHEAD {
        return Err(EnvelopeError::TooShort(frame.len()));
    }
    let declared = u16::from_le_bytes([frame[1], frame[2]]) as usize;
    if frame.len() != declared + ENVELOPE_OVERHEAD {
        return Err(EnvelopeError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }
    if frame[frame.len() - 1] != 0 {
        return Err(EnvelopeError::MissingTerminator);
    }
    Ok((frame[0], &frame[3..3 + declared]))
}

/// Number of chunks a payload occupies at the given chunk size. A payload
/// always takes at least one chunk, even when empty.
pub fn chunk_count(total_size: usize, chunk_size: usize) -> usize {
    total_size.div_ceil(chunk_size).max(1)
}

/// Length of `raw_len` bytes after standard base64 encoding with padding.
pub fn base64_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}

/// Locate a JSON object inside an inbound frame and return it as a string.
///
/// The renderer occasionally ships UTF-16LE bodies; when the high bytes of
/// the first two characters are zero the frame is narrowed to ASCII before
/// searching. The object is found by naive brace counting starting at the
/// first `{`. Returns `None` when no balanced object exists, in which case
/// the caller should treat the frame as binary data.
pub fn extract_json_payload(frame: &[u8]) -> Option<String> {
    if frame.len() < 5 {
        return None;
    }
    if frame[2] == 0 && frame[4] == 0 {
        let narrowed: String = frame[1..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]) as u8 as char)
            .collect();
        return find_json_span(&narrowed).map(|(start, end)| narrowed[start..=end].to_string());
    }
    let text = String::from_utf8_lossy(&frame[1..]);
    find_json_span(&text).map(|(start, end)| text[start..=end].to_string())
}

/// Byte span of the first balanced `{...}` in `text`, inclusive.
fn find_json_span(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{')?;
    let mut depth = 0usize;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_json_frame_bytes() {
        let frame = encode_envelope(APPLICATION_TAG, br#"{"a":1}"#).unwrap();
        assert_eq!(
            frame,
            vec![0x28, 0x07, 0x00, 0x7B, 0x22, 0x61, 0x22, 0x3A, 0x31, 0x7D, 0x00]
        );
    }

    #[test]
    fn frame_layout_invariants() {
        let body = b"hello renderer";
        let frame = encode_envelope(APPLICATION_TAG, body).unwrap();
        assert_eq!(frame.len(), body.len() + ENVELOPE_OVERHEAD);
        assert_eq!(frame[0], APPLICATION_TAG);
        assert_eq!(
            u16::from_le_bytes([frame[1], frame[2]]) as usize,
            body.len()
        );
        assert_eq!(&frame[3..3 + body.len()], body);
        assert_eq!(*frame.last().unwrap(), 0);
    }

    #[test]
    fn envelope_roundtrip() {
        let frame = encode_envelope(APPLICATION_TAG, br#"{"origin":"dataconnector"}"#).unwrap();
        let (tag, body) = decode_envelope(&frame).unwrap();
        assert_eq!(tag, APPLICATION_TAG);
        assert_eq!(body, br#"{"origin":"dataconnector"}"#);
    }

    #[test]
    fn empty_body_is_a_valid_frame() {
        let frame = encode_envelope(APPLICATION_TAG, b"").unwrap();
        assert_eq!(frame, vec![APPLICATION_TAG, 0, 0, 0]);
        let (_, body) = decode_envelope(&frame).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn oversize_body_is_rejected() {
        let body = vec![b'x'; MAX_MESSAGE_SIZE - ENVELOPE_OVERHEAD + 1];
        assert!(matches!(
            encode_envelope(APPLICATION_TAG, &body),
            Err(EnvelopeError::BodyTooLarge(_))
        ));
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let mut frame = encode_envelope(APPLICATION_TAG, b"abcdef").unwrap();
        frame.pop();
        assert!(matches!(
            decode_envelope(&frame),
            Err(EnvelopeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn decode_rejects_missing_terminator() {
        let mut frame = encode_envelope(APPLICATION_TAG, b"abcdef").unwrap();
        *frame.last_mut().unwrap() = b'!';
        assert!(matches!(
            decode_envelope(&frame),
            Err(EnvelopeError::MissingTerminator)
        ));
    }

    #[test]
    fn chunk_count_uses_ceiling_division() {
        assert_eq!(chunk_count(40_000, 16_380), 3);
        assert_eq!(chunk_count(16_380, 16_380), 1);
        assert_eq!(chunk_count(16_381, 16_380), 2);
        assert_eq!(chunk_count(0, 16_380), 1);
        assert_eq!(chunk_count(1, 16_380), 1);
    }

    #[test]
    fn base64_len_matches_standard_padding() {
        assert_eq!(base64_len(0), 0);
        assert_eq!(base64_len(1), 4);
        assert_eq!(base64_len(3), 4);
        assert_eq!(base64_len(4), 8);
        assert_eq!(base64_len(30_000), 40_000);
    }

    #[test]
    fn tag_mapping() {
        assert_eq!(
            ClientMessageTag::from_u8(1),
            Some(ClientMessageTag::Response)
        );
        assert_eq!(
            ClientMessageTag::from_u8(7),
            Some(ClientMessageTag::InitialSettings)
        );
        assert_eq!(
            ClientMessageTag::from_u8(255),
            Some(ClientMessageTag::Protocol)
        );
        assert_eq!(ClientMessageTag::from_u8(14), None);
        assert_eq!(ClientMessageTag::from_u8(128), None);
    }

    #[test]
    fn only_three_tags_carry_json() {
        for byte in 0u8..=255 {
            if let Some(tag) = ClientMessageTag::from_u8(byte) {
                assert_eq!(tag.carries_json(), matches!(byte, 1 | 7 | 255));
            }
        }
    }

    #[test]
    fn extract_json_from_tagged_frame() {
        let frame = encode_envelope(1, br#"{"type":"buffer","start":"x"}"#).unwrap();
        assert_eq!(
            extract_json_payload(&frame).as_deref(),
            Some(r#"{"type":"buffer","start":"x"}"#)
        );
    }

    #[test]
    fn extract_json_counts_nested_braces() {
        let frame = encode_envelope(1, br#"{"a":{"b":{"c":1}},"d":2} trailing"#).unwrap();
        assert_eq!(
            extract_json_payload(&frame).as_deref(),
            Some(r#"{"a":{"b":{"c":1}},"d":2}"#)
        );
    }

    #[test]
    fn extract_json_handles_utf16le_bodies() {
        let body: Vec<u8> = r#"{"ok":1}"#
            .bytes()
            .flat_map(|b| [b, 0u8])
            .collect();
        let mut frame = vec![1u8];
        frame.extend_from_slice(&body);
        assert_eq!(extract_json_payload(&frame).as_deref(), Some(r#"{"ok":1}"#));
    }

    #[test]
    fn extract_json_none_for_binary_payloads() {
        let frame = [1u8, 0xDE, 0xAD, 0xBE, 0xEF, 0xFF, 0x13];
        assert_eq!(extract_json_payload(&frame), None);
    }

    #[test]
    fn extract_json_none_for_unbalanced_braces() {
        let frame = encode_envelope(1, br#"{"never":"closed""#).unwrap();
        assert_eq!(extract_json_payload(&frame), None);
    }
}
