//! RTP routing extension used on the UDP back-end.
//!
//! Datagrams relayed between the bridge and the renderer carry a small
//! extension block after the fixed RTP header so either side can
//! demultiplex per-endpoint traffic. The block is little-endian
//! throughout, unlike a standard RTP header extension:
//! ```text
//! [0..2]  profile id: 0x0683
//! [2..4]  payload length in bytes: 8
//! [4..6]  player id (endpoint id on the bridge side)
//! [6..8]  streamer id
//! [8..12] meta
//! ```
//! When a foreign standard extension is present, its big-endian word
//! length is used to skip it and the routing block is expected
//! immediately after.

/// Profile identifier of the routing extension block.
pub const ROUTE_PROFILE_ID: u16 = 0x0683;

/// Payload bytes carried by the routing extension.
pub const ROUTE_PAYLOAD_LEN: u16 = 8;

/// Fixed RTP header length (without CSRCs or extensions).
pub const RTP_HEADER_LEN: usize = 12;

/// Byte offset of the `player_id` field when the routing block directly
/// follows a CSRC-free fixed header. The bridge rewrites outbound ids at
/// this position unless told otherwise.
pub const DEFAULT_PLAYER_ID_OFFSET: usize = RTP_HEADER_LEN + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteHeader {
    pub player_id: u16,
    pub streamer_id: u16,
    pub meta: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("packet shorter than the fixed RTP header: {0} bytes")]
    TooShort(usize),
    #[error("no routing extension block found")]
    MissingExtension,
}

impl RouteHeader {
    /// Parse the routing block out of a full RTP packet. Returns the
    /// header and the byte offset of its `player_id` field so callers can
    /// rewrite ids in place.
    pub fn parse(packet: &[u8]) -> Result<(RouteHeader, usize), RouteError> {
        if packet.len() < RTP_HEADER_LEN {
            return Err(RouteError::TooShort(packet.len()));
        }
        let csrc_count = (packet[0] & 0x0F) as usize;
        let mut offset = RTP_HEADER_LEN + 4 * csrc_count;

        if !block_at(packet, offset) {
            // A standard extension may sit between the fixed header and
            // the routing block; skip it by its big-endian word length.
            let has_extension = packet[0] & 0x10 != 0;
            if !has_extension || packet.len() < offset + 4 {
                return Err(RouteError::MissingExtension);
            }
            let words = u16::from_be_bytes([packet[offset + 2], packet[offset + 3]]) as usize;
            offset += 4 + 4 * words;
            if !block_at(packet, offset) {
                return Err(RouteError::MissingExtension);
            }
        }

        let header = RouteHeader {
            player_id: u16::from_le_bytes([packet[offset + 4], packet[offset + 5]]),
            streamer_id: u16::from_le_bytes([packet[offset + 6], packet[offset + 7]]),
            meta: u32::from_le_bytes([
                packet[offset + 8],
                packet[offset + 9],
                packet[offset + 10],
                packet[offset + 11],
            ]),
        };
        Ok((header, offset + 4))
    }

    /// Append this block to a packet under construction.
    pub fn append_to(&self, packet: &mut Vec<u8>) {
        packet.extend_from_slice(&ROUTE_PROFILE_ID.to_le_bytes());
        packet.extend_from_slice(&ROUTE_PAYLOAD_LEN.to_le_bytes());
        packet.extend_from_slice(&self.player_id.to_le_bytes());
        packet.extend_from_slice(&self.streamer_id.to_le_bytes());
        packet.extend_from_slice(&self.meta.to_le_bytes());
    }
}

/// Overwrite the player id at a known field offset, little-endian.
pub fn rewrite_player_id(packet: &mut [u8], field_offset: usize, player_id: u16) {
    if packet.len() >= field_offset + 2 {
        packet[field_offset..field_offset + 2].copy_from_slice(&player_id.to_le_bytes());
    }
}

fn block_at(packet: &[u8], offset: usize) -> bool {
    packet.len() >= offset + 4 + ROUTE_PAYLOAD_LEN as usize
        && u16::from_le_bytes([packet[offset], packet[offset + 1]]) == ROUTE_PROFILE_ID
        && u16::from_le_bytes([packet[offset + 2], packet[offset + 3]]) == ROUTE_PAYLOAD_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(csrc_count: u8, header: RouteHeader) -> Vec<u8> {
        let mut packet = vec![0u8; RTP_HEADER_LEN + 4 * csrc_count as usize];
        packet[0] = 0x80 | csrc_count;
        packet[1] = 96;
        header.append_to(&mut packet);
        packet.extend_from_slice(&[0xAA; 16]); // payload
        packet
    }

    #[test]
    fn parse_after_fixed_header() {
        let header = RouteHeader {
            player_id: 3,
            streamer_id: 1,
            meta: 0xDEAD_BEEF,
        };
        let packet = rtp_packet(0, header);
        let (parsed, field_offset) = RouteHeader::parse(&packet).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(field_offset, DEFAULT_PLAYER_ID_OFFSET);
    }

    #[test]
    fn parse_skips_csrcs() {
        let header = RouteHeader {
            player_id: 42,
            streamer_id: 0,
            meta: 0,
        };
        let packet = rtp_packet(2, header);
        let (parsed, field_offset) = RouteHeader::parse(&packet).unwrap();
        assert_eq!(parsed.player_id, 42);
        assert_eq!(field_offset, RTP_HEADER_LEN + 8 + 4);
    }

    #[test]
    fn parse_skips_foreign_extension() {
        let mut packet = vec![0u8; RTP_HEADER_LEN];
        packet[0] = 0x90; // version 2, extension bit
        // one-word standard extension, big-endian framing
        packet.extend_from_slice(&0xBEDEu16.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes());
        packet.extend_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        let header = RouteHeader {
            player_id: 9,
            streamer_id: 2,
            meta: 7,
        };
        header.append_to(&mut packet);

        let (parsed, field_offset) = RouteHeader::parse(&packet).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(field_offset, RTP_HEADER_LEN + 8 + 4);
    }

    #[test]
    fn short_packet_is_rejected() {
        assert_eq!(
            RouteHeader::parse(&[0x80; 11]),
            Err(RouteError::TooShort(11))
        );
    }

    #[test]
    fn packet_without_block_is_rejected() {
        let mut packet = vec![0u8; RTP_HEADER_LEN + 16];
        packet[0] = 0x80;
        assert_eq!(
            RouteHeader::parse(&packet),
            Err(RouteError::MissingExtension)
        );
    }

    #[test]
    fn rewrite_player_id_in_place() {
        let header = RouteHeader {
            player_id: 1,
            streamer_id: 0,
            meta: 0,
        };
        let mut packet = rtp_packet(0, header);
        let (_, field_offset) = RouteHeader::parse(&packet).unwrap();
        rewrite_player_id(&mut packet, field_offset, 0x1234);
        let (parsed, _) = RouteHeader::parse(&packet).unwrap();
        assert_eq!(parsed.player_id, 0x1234);
        // little-endian on the wire
        assert_eq!(packet[field_offset], 0x34);
        assert_eq!(packet[field_offset + 1], 0x12);
    }

    #[test]
    fn rewrite_out_of_bounds_is_a_no_op() {
        let mut packet = vec![0u8; 10];
        rewrite_player_id(&mut packet, 16, 5);
        assert_eq!(packet, vec![0u8; 10]);
    }
}
