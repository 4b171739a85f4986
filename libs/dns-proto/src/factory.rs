//! Builds and parses the plain RFC 1035 query/answer messages that carry
//! DNS-tunnel fragments: a single question, and on the answer side a
//! single TXT record pointing back at that question's name.

use crate::name::{encode_name, parse_labels, skip_name, split_into_labels};
use crate::DnsProtoError;

const QTYPE_TXT: u16 = 16;
const QCLASS_IN: u16 = 1;
const ANSWER_NAME_POINTER: [u8; 2] = [0xC0, 0x0C];
const MAX_CHAR_STRING_LEN: usize = 255;

/// Builds and parses messages rooted at a fixed base domain (e.g. the
/// tunnel's own delegated subdomain).
#[derive(Debug, Clone)]
pub struct DnsPacketFactory {
    base: String,
}

impl DnsPacketFactory {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// Builds a query of `data` as the label(s) in front of the base domain.
    pub fn make_dns_query(&self, id: u16, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_header(&mut out, id, false, 1, 0);
        out.extend(encode_name(&split_into_labels(data), &self.base));
        out.extend(QTYPE_TXT.to_be_bytes());
        out.extend(QCLASS_IN.to_be_bytes());
        out
    }

    /// Recovers `(id, data)` from a query built by [`Self::make_dns_query`].
    pub fn parse_dns_query(&self, bytes: &[u8]) -> Result<(u16, Vec<u8>), DnsProtoError> {
        let header = read_header(bytes)?;
        if header.qdcount != 1 {
            return Err(DnsProtoError::UnexpectedQuestionCount(header.qdcount));
        }

        let mut offset = 12;
        let labels = parse_labels(bytes, &mut offset)?;
        let qtype = read_u16(bytes, offset)?;
        let qclass = read_u16(bytes, offset + 2)?;
        if qtype != QTYPE_TXT {
            return Err(DnsProtoError::UnexpectedQtype(qtype));
        }
        if qclass != QCLASS_IN {
            return Err(DnsProtoError::UnexpectedQclass(qclass));
        }

        let suffix_labels = self.base.split('.').filter(|l| !l.is_empty()).count();
        if labels.len() < suffix_labels {
            return Err(DnsProtoError::WrongSuffix);
        }
        let data_labels = &labels[..labels.len() - suffix_labels];
        let suffix = &labels[labels.len() - suffix_labels..];
        for (got, want) in suffix.iter().zip(self.base.split('.').filter(|l| !l.is_empty())) {
            if got != want.as_bytes() {
                return Err(DnsProtoError::WrongSuffix);
            }
        }

        Ok((header.id, data_labels.concat()))
    }

    /// Builds a TXT answer for `domain_data` (joined with the base domain
    /// the same way a query's data is) carrying `txt` as the record's
    /// character-string content.
    pub fn make_dns_result(&self, id: u16, domain_data: &[u8], ttl: u32, txt: &str) -> Vec<u8> {
        let mut out = Vec::new();
        write_header(&mut out, id, true, 1, 1);
        out.extend(encode_name(&split_into_labels(domain_data), &self.base));
        out.extend(QTYPE_TXT.to_be_bytes());
        out.extend(QCLASS_IN.to_be_bytes());

        out.extend(ANSWER_NAME_POINTER);
        out.extend(QTYPE_TXT.to_be_bytes());
        out.extend(QCLASS_IN.to_be_bytes());
        out.extend(ttl.to_be_bytes());

        let rdata = encode_char_strings(txt.as_bytes());
        out.extend((rdata.len() as u16).to_be_bytes());
        out.extend(rdata);

        out
    }

    /// Recovers `(id, payload)` from an answer built by
    /// [`Self::make_dns_result`], concatenating every TXT character-string
    /// in the record back into one payload.
    pub fn parse_dns_answer(&self, bytes: &[u8]) -> Result<(u16, Vec<u8>), DnsProtoError> {
        parse_answer(bytes)
    }
}

/// Recovers `(id, payload)` from a single-question, single-TXT-answer
/// message, without needing to know the question's base domain. Shared by
/// [`DnsPacketFactory::parse_dns_answer`] and the transport layer's own
/// reply parsing.
pub fn parse_answer(bytes: &[u8]) -> Result<(u16, Vec<u8>), DnsProtoError> {
    let header = read_header(bytes)?;
    if header.qdcount != 1 {
        return Err(DnsProtoError::UnexpectedQuestionCount(header.qdcount));
    }
    if header.ancount != 1 {
        return Err(DnsProtoError::UnexpectedAnswerCount(header.ancount));
    }

    let mut offset = 12;
    parse_labels(bytes, &mut offset)?;
    offset += 4; // qtype + qclass

    skip_name(bytes, &mut offset)?;
    let _rtype = read_u16(bytes, offset)?;
    let _rclass = read_u16(bytes, offset + 2)?;
    offset += 8; // type + class + ttl
    let rdlength = read_u16(bytes, offset)? as usize;
    offset += 2;

    let rdata = bytes
        .get(offset..offset + rdlength)
        .ok_or(DnsProtoError::Truncated)?;

    Ok((header.id, decode_char_strings(rdata)?))
}

struct MessageHeader {
    id: u16,
    qdcount: u16,
    ancount: u16,
}

fn write_header(out: &mut Vec<u8>, id: u16, is_response: bool, qdcount: u16, ancount: u16) {
    out.extend(id.to_be_bytes());
    out.extend(if is_response { 0x8000u16 } else { 0x0100u16 }.to_be_bytes());
    out.extend(qdcount.to_be_bytes());
    out.extend(ancount.to_be_bytes());
    out.extend(0u16.to_be_bytes()); // nscount
    out.extend(0u16.to_be_bytes()); // arcount
}

fn read_header(bytes: &[u8]) -> Result<MessageHeader, DnsProtoError> {
    if bytes.len() < 12 {
        return Err(DnsProtoError::Truncated);
    }
    Ok(MessageHeader {
        id: read_u16(bytes, 0)?,
        qdcount: read_u16(bytes, 4)?,
        ancount: read_u16(bytes, 6)?,
    })
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, DnsProtoError> {
    let slice = bytes.get(offset..offset + 2).ok_or(DnsProtoError::Truncated)?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn encode_char_strings(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    if data.is_empty() {
        out.push(0);
        return out;
    }
    for chunk in data.chunks(MAX_CHAR_STRING_LEN) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out
}

fn decode_char_strings(rdata: &[u8]) -> Result<Vec<u8>, DnsProtoError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < rdata.len() {
        let len = rdata[offset] as usize;
        offset += 1;
        let end = offset.checked_add(len).ok_or(DnsProtoError::Truncated)?;
        out.extend_from_slice(rdata.get(offset..end).ok_or(DnsProtoError::Truncated)?);
        offset = end;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_dns_query_matches_reference_vector() {
        let factory = DnsPacketFactory::new("blahgeek.com");
        let msg = factory.make_dns_query(0xDEAD, b"www");

        let mut expected = vec![0xDE, 0xAD, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        expected.extend(b"\x03www\x08blahgeek\x03com\x00");
        expected.extend([0x00, 0x10, 0x00, 0x01]);

        assert_eq!(msg, expected);
    }

    #[test]
    fn parse_dns_query_recovers_id_and_data() {
        let factory = DnsPacketFactory::new("blahgeek.com");
        let msg = factory.make_dns_query(0xDEAD, b"www");
        let (id, data) = factory.parse_dns_query(&msg).unwrap();
        assert_eq!(id, 0xDEAD);
        assert_eq!(data, b"www");
    }

    #[test]
    fn make_dns_result_matches_reference_vector() {
        let factory = DnsPacketFactory::new("com");
        let msg = factory.make_dns_result(0x524d, b"blahgeek", 600, "v=spf1 mx include:zoho.com ~all");

        let mut expected = vec![0x52, 0x4d, 0x80, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
        expected.extend(b"\x08blahgeek\x03com\x00");
        expected.extend([0x00, 0x10, 0x00, 0x01]);
        expected.extend([0xC0, 0x0C]);
        expected.extend([0x00, 0x10, 0x00, 0x01]);
        expected.extend(600u32.to_be_bytes());
        expected.extend([0x00, 0x20]);
        expected.push(0x1f);
        expected.extend(b"v=spf1 mx include:zoho.com ~all");

        assert_eq!(msg, expected);
    }

    #[test]
    fn parse_dns_answer_recovers_id_and_txt_payload() {
        let factory = DnsPacketFactory::new("com");
        let msg = factory.make_dns_result(0x524d, b"blahgeek", 600, "v=spf1 mx include:zoho.com ~all");
        let (id, payload) = factory.parse_dns_answer(&msg).unwrap();
        assert_eq!(id, 0x524d);
        assert_eq!(payload, b"v=spf1 mx include:zoho.com ~all");
    }

    #[test]
    fn parse_dns_answer_rejects_wrong_answer_count() {
        let factory = DnsPacketFactory::new("blahgeek.com");
        let msg = factory.make_dns_query(0xDEAD, b"www");
        let err = factory.parse_dns_answer(&msg).unwrap_err();
        assert!(matches!(err, DnsProtoError::UnexpectedAnswerCount(0)));
    }

    #[test]
    fn char_strings_split_payloads_over_255_bytes() {
        let data = vec![b'x'; 300];
        let encoded = encode_char_strings(&data);
        assert_eq!(encoded[0], 255);
        assert_eq!(encoded.len(), 1 + 255 + 1 + 45);
        assert_eq!(decode_char_strings(&encoded).unwrap(), data);
    }
}
