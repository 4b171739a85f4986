//! Minimal RFC 1035 domain-name label encoding, just enough to build and
//! parse the single-question, single-answer messages this protocol ever
//! sends. No message compression is produced except the one fixed pointer
//! back to the question name used on every answer.

use crate::DnsProtoError;

const MAX_LABEL_LEN: usize = 63;

/// Splits raw bytes into `<=63`-byte chunks, one per label, preserving order.
pub fn split_into_labels(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![data];
    }
    data.chunks(MAX_LABEL_LEN).collect()
}

/// Appends length-prefixed labels for `parts` followed by labels for each
/// dot-separated component of `suffix`, then the terminating root label.
pub fn encode_name(parts: &[&[u8]], suffix: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        push_label(&mut out, part);
    }
    for label in suffix.split('.').filter(|l| !l.is_empty()) {
        push_label(&mut out, label.as_bytes());
    }
    out.push(0);
    out
}

fn push_label(out: &mut Vec<u8>, label: &[u8]) {
    out.push(label.len() as u8);
    out.extend_from_slice(label);
}

/// Reads a sequence of length-prefixed labels starting at `*offset`,
/// stopping at the root label. Does not follow compression pointers: this
/// protocol never emits one inside a name it expects to parse back.
pub fn parse_labels(buf: &[u8], offset: &mut usize) -> Result<Vec<Vec<u8>>, DnsProtoError> {
    let mut labels = Vec::new();
    loop {
        let len = *buf.get(*offset).ok_or(DnsProtoError::Truncated)? as usize;
        *offset += 1;
        if len == 0 {
            break;
        }
        if len > MAX_LABEL_LEN {
            return Err(DnsProtoError::BadLabel);
        }
        let end = offset.checked_add(len).ok_or(DnsProtoError::Truncated)?;
        let label = buf.get(*offset..end).ok_or(DnsProtoError::Truncated)?.to_vec();
        *offset = end;
        labels.push(label);
    }
    Ok(labels)
}

/// Skips over a name starting at `*offset`, following a compression
/// pointer if the name begins with one. Used to walk past the answer
/// record's name without caring about its content.
pub fn skip_name(buf: &[u8], offset: &mut usize) -> Result<(), DnsProtoError> {
    let first = *buf.get(*offset).ok_or(DnsProtoError::Truncated)?;
    if first & 0xC0 == 0xC0 {
        buf.get(*offset..*offset + 2).ok_or(DnsProtoError::Truncated)?;
        *offset += 2;
        return Ok(());
    }
    parse_labels(buf, offset)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_name_joins_parts_and_suffix() {
        let name = encode_name(&[b"www"], "blahgeek.com");
        assert_eq!(name, b"\x03www\x08blahgeek\x03com\x00");
    }

    #[test]
    fn encode_name_with_two_part_suffix_matches_single_concatenation() {
        let name = encode_name(&[b"blahgeek"], "com");
        assert_eq!(name, b"\x08blahgeek\x03com\x00");
    }

    #[test]
    fn parse_labels_reads_back_what_was_encoded() {
        let name = encode_name(&[b"a", b"bb"], "x.y");
        let mut offset = 0;
        let labels = parse_labels(&name, &mut offset).unwrap();
        assert_eq!(labels, vec![b"a".to_vec(), b"bb".to_vec(), b"x".to_vec(), b"y".to_vec()]);
        assert_eq!(offset, name.len());
    }

    #[test]
    fn skip_name_follows_a_compression_pointer() {
        let buf = [0xC0, 0x0C];
        let mut offset = 0;
        skip_name(&buf, &mut offset).unwrap();
        assert_eq!(offset, 2);
    }
}
