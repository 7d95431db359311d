//! Line-level SDP helpers.
//!
//! The signalling flow only needs two things out of a session
//! description: the MID of every media section (to know which ICE
//! candidates are still outstanding) and the candidate lines of the local
//! description (to trickle them to the peer). Neither warrants a full SDP
//! parser.

use tether_protocol::CandidateInit;

/// MIDs of all media sections, in order of appearance.
pub fn extract_mids(sdp: &str) -> Vec<String> {
    sdp.lines()
        .filter_map(|line| line.strip_prefix("a=mid:"))
        .map(|mid| mid.trim().to_string())
        .collect()
}

/// All candidate lines, attributed to the media section they appear in.
/// Sections without an explicit MID fall back to their index.
pub fn extract_candidates(sdp: &str) -> Vec<CandidateInit> {
    let mut sections: Vec<(Option<String>, Vec<String>)> = Vec::new();
    for line in sdp.lines() {
        if line.starts_with("m=") {
            sections.push((None, Vec::new()));
            continue;
        }
        // session-level lines before the first m= carry no candidates
        let Some((mid, candidates)) = sections.last_mut() else {
            continue;
        };
        if let Some(value) = line.strip_prefix("a=mid:") {
            *mid = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("a=candidate:") {
            candidates.push(format!("candidate:{}", value.trim()));
        }
    }

    let mut result = Vec::new();
    for (index, (mid, candidates)) in sections.into_iter().enumerate() {
        let mid = mid.unwrap_or_else(|| index.to_string());
        for candidate in candidates {
            result.push(CandidateInit {
                candidate,
                sdp_mid: mid.clone(),
                sdp_mline_index: index as u16,
            });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SDP: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=candidate:1 1 UDP 2122317823 172.26.15.227 42835 typ host\r\n\
a=candidate:2 1 UDP 1686052607 93.184.216.34 42835 typ srflx\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=candidate:1 1 UDP 2122317823 172.26.15.227 42836 typ host\r\n";

    #[test]
    fn mids_in_section_order() {
        assert_eq!(extract_mids(SAMPLE_SDP), vec!["0", "1"]);
    }

    #[test]
    fn no_media_sections_no_mids() {
        assert!(extract_mids("v=0\r\ns=-\r\n").is_empty());
    }

    #[test]
    fn candidates_keep_their_section() {
        let candidates = extract_candidates(SAMPLE_SDP);
        assert_eq!(candidates.len(), 3);

        assert_eq!(
            candidates[0].candidate,
            "candidate:1 1 UDP 2122317823 172.26.15.227 42835 typ host"
        );
        assert_eq!(candidates[0].sdp_mid, "0");
        assert_eq!(candidates[0].sdp_mline_index, 0);

        assert_eq!(candidates[1].sdp_mid, "0");
        assert_eq!(candidates[2].sdp_mid, "1");
        assert_eq!(candidates[2].sdp_mline_index, 1);
    }

    #[test]
    fn session_level_candidate_lines_are_ignored() {
        let sdp = "v=0\r\na=candidate:9 1 UDP 1 10.0.0.1 1000 typ host\r\n";
        assert!(extract_candidates(sdp).is_empty());
    }

    #[test]
    fn section_without_mid_uses_index() {
        let sdp = "v=0\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
a=candidate:1 1 UDP 1 10.0.0.1 1000 typ host\r\n";
        let candidates = extract_candidates(sdp);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sdp_mid, "0");
    }
}
