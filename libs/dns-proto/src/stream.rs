//! Splits a logical message into fragments on the way out, and reassembles
//! fragments back into logical messages on the way in, tolerant of
//! reordering and duplication on an unordered, lossy transport (DNS
//! queries/answers arriving over UDP resolvers with no ordering guarantee).

use crate::downstream::DownstreamCodec;
use crate::header::FragmentHeader;
use crate::upstream::UpstreamCodec;

/// Concurrently-in-flight sequence numbers the reassembler tracks at once.
const WINDOW_SIZE: usize = 64;
/// A message may never be split into more fragments than this: the
/// fragment index is a 4-bit field.
const MAX_FRAGMENTS: usize = 16;
/// Sequence numbers are a 27-bit field; half the space, used to decide
/// which of two sequence numbers is "more recent" under wraparound.
const SEQ_HALF_SPACE: u32 = 1 << 26;

/// Wraps an [`UpstreamCodec`] or a [`DownstreamCodec`] so callers on either
/// side of the tunnel share one fragmentation/reassembly implementation.
pub trait FragmentCodec {
    fn encode(&self, payload: &[u8], header: FragmentHeader) -> String;
    fn decode(&self, msg: &str) -> Option<(Vec<u8>, FragmentHeader)>;
    fn max_length(&self) -> usize;
}

impl FragmentCodec for UpstreamCodec {
    fn encode(&self, payload: &[u8], header: FragmentHeader) -> String {
        UpstreamCodec::encode(self, payload, header)
    }
    fn decode(&self, msg: &str) -> Option<(Vec<u8>, FragmentHeader)> {
        UpstreamCodec::decode(self, msg)
    }
    fn max_length(&self) -> usize {
        UpstreamCodec::max_length(self)
    }
}

impl FragmentCodec for DownstreamCodec {
    fn encode(&self, payload: &[u8], header: FragmentHeader) -> String {
        DownstreamCodec::encode(self, payload, header)
    }
    fn decode(&self, msg: &str) -> Option<(Vec<u8>, FragmentHeader)> {
        DownstreamCodec::decode(self, msg)
    }
    fn max_length(&self) -> usize {
        DownstreamCodec::max_length(self)
    }
}

#[derive(Debug, Clone, Default)]
struct ReassemblySlot {
    /// Set the first time this slot is ever claimed, and never cleared
    /// again: a completed message still needs to be remembered so a late
    /// straggler of the same message is rejected as a duplicate rather
    /// than starting a bogus new reassembly.
    ever_used: bool,
    seq: u32,
    fragments: [Option<Vec<u8>>; MAX_FRAGMENTS],
    fragments_present: u32,
    fragment_count: u32,
}

/// Fragments outbound messages and reassembles inbound ones, keyed to a
/// single `FragmentCodec`.
pub struct DnsFragmentStream<C> {
    codec: C,
    send_seq: u32,
    recv_window: Vec<ReassemblySlot>,
}

impl<C: FragmentCodec> DnsFragmentStream<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            send_seq: 0,
            recv_window: vec![ReassemblySlot::default(); WINDOW_SIZE],
        }
    }

    /// Splits `payload` into as many wire messages as the codec's
    /// `max_length` requires, all sharing the next sequence number.
    pub fn encode(&mut self, payload: &[u8]) -> Vec<String> {
        let max_len = self.codec.max_length().max(1);
        let seq = self.send_seq;
        self.send_seq = (self.send_seq + 1) & 0x07FF_FFFF;

        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&payload[..0]]
        } else {
            payload.chunks(max_len).collect()
        };

        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let header = FragmentHeader {
                    seq,
                    fragment_no: i as u32,
                    more_fragment: i != last,
                };
                self.codec.encode(chunk, header)
            })
            .collect()
    }

    /// Feeds one wire message into the reassembler. Returns a complete
    /// payload once every fragment of its message has arrived; drops
    /// messages that are malformed, duplicates, or too far behind the
    /// window to still have a slot.
    pub fn decode(&mut self, msg: &str) -> Option<Vec<u8>> {
        let (data, header) = self.codec.decode(msg)?;
        if header.fragment_no as usize >= MAX_FRAGMENTS {
            return None;
        }

        let idx = (header.seq as usize) % WINDOW_SIZE;
        let slot = &mut self.recv_window[idx];

        if slot.ever_used && slot.seq != header.seq && cmp_seq(header.seq, slot.seq) {
            return None;
        }

        if !slot.ever_used || slot.seq != header.seq {
            *slot = ReassemblySlot {
                ever_used: true,
                seq: header.seq,
                ..Default::default()
            };
        }

        let bit = 1u32 << header.fragment_no;
        if slot.fragments_present & bit != 0 {
            return None;
        }
        slot.fragments_present |= bit;
        slot.fragments[header.fragment_no as usize] = Some(data);
        if !header.more_fragment {
            slot.fragment_count = header.fragment_no + 1;
        }

        if slot.fragment_count != 0 && complete_mask(slot.fragment_count) == slot.fragments_present {
            let mut out = Vec::new();
            for fragment in slot.fragments[..slot.fragment_count as usize].iter_mut() {
                out.extend(fragment.take().unwrap());
            }
            return Some(out);
        }

        None
    }
}

fn complete_mask(fragment_count: u32) -> u32 {
    if fragment_count >= 32 {
        u32::MAX
    } else {
        (1u32 << fragment_count) - 1
    }
}

/// True if `x` is the older of the two 27-bit sequence numbers `x`/`y`
/// under half-space wraparound comparison.
pub fn cmp_seq(x: u32, y: u32) -> bool {
    (y > x && y - x < SEQ_HALF_SPACE) || (y < x && x - y > SEQ_HALF_SPACE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmp_seq_matches_reference_vectors() {
        assert!(cmp_seq(1, 2));
        assert!(!cmp_seq(42, 2));
        assert!(cmp_seq(0x07FF_FFFF, 2));
        assert!(!cmp_seq(0x07FF_FFFF, 0x07F0_0090));
    }

    #[test]
    fn single_fragment_message_reassembles_immediately() {
        let mut stream = DnsFragmentStream::new(UpstreamCodec::new("blahgeek.com"));
        let msgs = stream.encode(b"hello");
        assert_eq!(msgs.len(), 1);
        assert_eq!(stream.decode(&msgs[0]).unwrap(), b"hello");
    }

    #[test]
    fn multi_fragment_message_reassembles_out_of_order() {
        let mut stream = DnsFragmentStream::new(DownstreamCodec::new());
        let payload = vec![0xABu8; 1500];
        let msgs = stream.encode(&payload);
        assert!(msgs.len() > 1);

        let mut reordered = msgs.clone();
        reordered.reverse();

        let mut last = None;
        for msg in &reordered {
            last = stream.decode(msg).or(last);
        }
        assert_eq!(last.unwrap(), payload);
    }

    #[test]
    fn duplicate_fragment_is_dropped() {
        let mut stream = DnsFragmentStream::new(DownstreamCodec::new());
        let payload = vec![0x11u8; 500];
        let msgs = stream.encode(&payload);
        assert!(msgs.len() > 1);

        assert!(stream.decode(&msgs[0]).is_none());
        assert!(stream.decode(&msgs[0]).is_none());
        for msg in &msgs[1..] {
            let _ = stream.decode(msg);
        }
        let dup_again = stream.decode(&msgs[0]);
        assert!(dup_again.is_none());
    }

    #[test]
    fn a_fragment_far_behind_the_window_is_dropped() {
        let mut stream = DnsFragmentStream::new(DownstreamCodec::new());
        let old = stream.encode(b"old").remove(0); // seq 0, slot 0

        // Advance the window a full lap so slot 0 is reclaimed by a
        // strictly newer sequence number (seq 64).
        for _ in 0..(WINDOW_SIZE as u32) {
            let msg = stream.encode(b"x").remove(0);
            let _ = stream.decode(&msg);
        }

        assert!(stream.decode(&old).is_none());
    }

    #[test]
    fn malformed_message_is_ignored() {
        let mut stream = DnsFragmentStream::new(UpstreamCodec::new("blahgeek.com"));
        assert!(stream.decode("not a valid fragment name").is_none());
    }
}
