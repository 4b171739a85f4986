//! Free functions for building/parsing queries and replies whose QNAME is
//! an arbitrary, already fragment-encoded dotted string, as opposed to
//! [`crate::factory::DnsPacketFactory`]'s fixed `<data>.<base>` shape.
//! This is what the transport layer (queries carrying upstream-encoded
//! fragment names, replies echoing the question verbatim) actually needs:
//! it never has to know where the base domain starts inside the name.

use crate::name::{encode_name, parse_labels};
use crate::DnsProtoError;

const QTYPE_TXT: u16 = 16;
const QCLASS_IN: u16 = 1;
const ANSWER_NAME_POINTER: [u8; 2] = [0xC0, 0x0C];
const MAX_CHAR_STRING_LEN: usize = 255;

pub struct ParsedQuery {
    pub id: u16,
    pub is_response: bool,
    pub qname: String,
}

/// Builds a query with transaction id `id`, question name `qname`
/// (a literal dotted string, dots and all), QTYPE=TXT, QCLASS=IN.
pub fn build_query(id: u16, qname: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(id.to_be_bytes());
    out.extend(0x0100u16.to_be_bytes()); // RD=1, everything else clear
    out.extend(1u16.to_be_bytes()); // qdcount
    out.extend(0u16.to_be_bytes()); // ancount
    out.extend(0u16.to_be_bytes()); // nscount
    out.extend(0u16.to_be_bytes()); // arcount
    out.extend(encode_name(&[], qname));
    out.extend(QTYPE_TXT.to_be_bytes());
    out.extend(QCLASS_IN.to_be_bytes());
    out
}

/// Parses a query built by [`build_query`] (or any single-question TXT
/// query in that shape), reconstructing the full QNAME as one dotted
/// string. Does not reject responses; callers that only expect queries
/// check `is_response` themselves.
pub fn parse_query(bytes: &[u8]) -> Result<ParsedQuery, DnsProtoError> {
    if bytes.len() < 12 {
        return Err(DnsProtoError::Truncated);
    }
    let id = u16::from_be_bytes([bytes[0], bytes[1]]);
    let flags = u16::from_be_bytes([bytes[2], bytes[3]]);
    let qdcount = u16::from_be_bytes([bytes[4], bytes[5]]);
    if qdcount != 1 {
        return Err(DnsProtoError::UnexpectedQuestionCount(qdcount));
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

    let qname = labels
        .iter()
        .map(|l| String::from_utf8_lossy(l).into_owned())
        .collect::<Vec<_>>()
        .join(".");

    Ok(ParsedQuery {
        id,
        is_response: flags & 0x8000 != 0,
        qname,
    })
}

/// Builds a reply to `query_bytes`: the question section is copied
/// verbatim, and a single TXT answer carrying `txt` (compressed back to
/// the question name) is appended.
pub fn build_reply(query_bytes: &[u8], ttl: u32, txt: &[u8]) -> Result<Vec<u8>, DnsProtoError> {
    if query_bytes.len() < 12 {
        return Err(DnsProtoError::Truncated);
    }
    let id = u16::from_be_bytes([query_bytes[0], query_bytes[1]]);
    let qdcount = u16::from_be_bytes([query_bytes[4], query_bytes[5]]);
    if qdcount != 1 {
        return Err(DnsProtoError::UnexpectedQuestionCount(qdcount));
    }

    let mut offset = 12;
    parse_labels(query_bytes, &mut offset)?;
    offset += 4; // qtype + qclass
    let question = query_bytes
        .get(12..offset)
        .ok_or(DnsProtoError::Truncated)?;

    let mut out = Vec::new();
    out.extend(id.to_be_bytes());
    out.extend(0x8000u16.to_be_bytes());
    out.extend(1u16.to_be_bytes()); // qdcount
    out.extend(1u16.to_be_bytes()); // ancount
    out.extend(0u16.to_be_bytes());
    out.extend(0u16.to_be_bytes());
    out.extend(question);

    out.extend(ANSWER_NAME_POINTER);
    out.extend(QTYPE_TXT.to_be_bytes());
    out.extend(QCLASS_IN.to_be_bytes());
    out.extend(ttl.to_be_bytes());

    let rdata = encode_char_strings(txt);
    out.extend((rdata.len() as u16).to_be_bytes());
    out.extend(rdata);

    Ok(out)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_parse_query_roundtrip() {
        let qname = "ABCDEFGH.CHUNK1.CHUNK2.blahgeek.com";
        let msg = build_query(0x1234, qname);
        let parsed = parse_query(&msg).unwrap();
        assert_eq!(parsed.id, 0x1234);
        assert!(!parsed.is_response);
        assert_eq!(parsed.qname, qname);
    }

    #[test]
    fn build_reply_echoes_the_question_and_sets_qr() {
        let query = build_query(0xBEEF, "www.blahgeek.com");
        let reply = build_reply(&query, 0, b"hello").unwrap();

        let parsed = parse_query(&reply).unwrap();
        assert_eq!(parsed.id, 0xBEEF);
        assert!(parsed.is_response);
        assert_eq!(parsed.qname, "www.blahgeek.com");

        let ancount = u16::from_be_bytes([reply[6], reply[7]]);
        assert_eq!(ancount, 1);
    }

    #[test]
    fn build_reply_rejects_truncated_query() {
        assert!(build_reply(&[0u8; 4], 0, b"x").is_err());
    }
}
