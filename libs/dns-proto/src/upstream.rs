//! Client-to-server fragment codec: each fragment becomes one query name,
//! with the 4-byte header and the payload both base32-encoded into labels
//! ending in a fixed base domain.

use base32::Alphabet;

use crate::header::FragmentHeader;

const STD_ALPHABET: Alphabet = Alphabet::RFC4648 { padding: true };
const MAX_CHUNK_BYTES: usize = 35;
const MAX_NAME_LEN: usize = 255;
const HEADER_LABEL_AND_DOT: usize = 9;

/// Encodes/decodes fragments as DNS query names under a fixed base domain.
#[derive(Debug, Clone)]
pub struct UpstreamCodec {
    domain_with_dot: String,
    max_length: usize,
}

impl UpstreamCodec {
    pub fn new(base: &str) -> Self {
        let domain_with_dot = format!("{base}.");
        let max_length = max_len_per_name(&domain_with_dot);
        Self {
            domain_with_dot,
            max_length,
        }
    }

    /// Largest payload, in bytes, that fits in a single query name.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn encode(&self, payload: &[u8], header: FragmentHeader) -> String {
        let mut name = base32::encode(STD_ALPHABET, &header.encode());
        for chunk in payload.chunks(MAX_CHUNK_BYTES) {
            name.push('.');
            name.push_str(&base32::encode(STD_ALPHABET, chunk));
        }
        name.push('.');
        name.push_str(&self.domain_with_dot);
        name
    }

    pub fn decode(&self, name: &str) -> Option<(Vec<u8>, FragmentHeader)> {
        let trimmed = name.strip_suffix('.').unwrap_or(name);
        let labels: Vec<&str> = trimmed.split('.').collect();

        let domain_label_count = self.domain_with_dot.trim_end_matches('.').split('.').count();
        if labels.len() < 1 + domain_label_count {
            return None;
        }

        let header_bytes = base32::decode(STD_ALPHABET, labels[0])?;
        let header_bytes: [u8; 4] = header_bytes.try_into().ok()?;
        let header = FragmentHeader::decode(header_bytes).ok()?;

        let payload_labels = &labels[1..labels.len() - domain_label_count];
        let mut payload = Vec::new();
        for label in payload_labels {
            if let Some(bytes) = base32::decode(STD_ALPHABET, label) {
                payload.extend(bytes);
            }
        }

        Some((payload, header))
    }
}

fn max_len_per_name(domain_with_dot: &str) -> usize {
    let budget = MAX_NAME_LEN.saturating_sub(domain_with_dot.len() + HEADER_LABEL_AND_DOT);
    let mut len = (budget / 64) * MAX_CHUNK_BYTES;
    let remainder = budget % 64;
    if remainder > 9 {
        len += ((remainder - 1) / 8) * 5;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(seq: u32, fragment_no: u32, more: bool) -> FragmentHeader {
        FragmentHeader {
            seq,
            fragment_no,
            more_fragment: more,
        }
    }

    #[test]
    fn roundtrips_a_short_payload() {
        let codec = UpstreamCodec::new("blahgeek.com");
        let name = codec.encode(b"hello world", header(1, 0, false));
        let (payload, got_header) = codec.decode(&name).unwrap();
        assert_eq!(payload, b"hello world");
        assert_eq!(got_header, header(1, 0, false));
    }

    #[test]
    fn roundtrips_a_payload_spanning_multiple_chunk_labels() {
        let codec = UpstreamCodec::new("blahgeek.com");
        let payload = vec![0xABu8; 100];
        let name = codec.encode(&payload, header(42, 3, true));
        let (got_payload, got_header) = codec.decode(&name).unwrap();
        assert_eq!(got_payload, payload);
        assert_eq!(got_header, header(42, 3, true));
    }

    #[test]
    fn encoded_name_never_exceeds_255_bytes_for_max_length_payload() {
        let codec = UpstreamCodec::new("blahgeek.com");
        let payload = vec![0x42u8; codec.max_length()];
        let name = codec.encode(&payload, header(0, 0, false));
        assert!(name.len() <= 255, "name length {} exceeds 255", name.len());
    }

    #[test]
    fn all_zero_header_still_decodes() {
        let codec = UpstreamCodec::new("blahgeek.com");
        let name = codec.encode(b"x", header(0, 0, false));
        let (_, got_header) = codec.decode(&name).unwrap();
        assert_eq!(got_header, header(0, 0, false));
    }
}
