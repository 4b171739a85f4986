//! Declarative bit-field packing into a single 32-bit word.
//!
//! The upstream implementation this crate is modeled on used Go's
//! `reflect` package to read `bits:"N"` struct tags off an arbitrary record
//! type at runtime. Here the schema is a plain, compile-time-constructible
//! list of `(name, width)` pairs instead: no reflection, no macro, just a
//! `Bitcodec::new` call at the point each wire format is defined.
//!
//! Fields are packed MSB-first in declaration order and masked to their
//! width; the sum of widths must not exceed 32.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitcodecError {
    #[error("total field width {total} exceeds 32 bits")]
    TooWide { total: u32 },
    #[error("field count mismatch: schema has {expected} fields, got {got}")]
    FieldCountMismatch { expected: usize, got: usize },
}

/// One named, fixed-width field in a packed word.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub bits: u32,
}

impl Field {
    pub const fn new(name: &'static str, bits: u32) -> Self {
        Self { name, bits }
    }
}

/// A schema describing how to pack/unpack a fixed set of fields into a u32.
#[derive(Debug, Clone)]
pub struct Bitcodec {
    fields: Vec<Field>,
    masks: Vec<u32>,
    remain_bits: u32,
}

impl Bitcodec {
    /// Builds a codec from an ordered list of `(name, width)` fields.
    ///
    /// Fails if the total width exceeds 32 bits.
    pub fn new(fields: &[Field]) -> Result<Self, BitcodecError> {
        let total: u32 = fields.iter().map(|f| f.bits).sum();
        if total > 32 {
            return Err(BitcodecError::TooWide { total });
        }

        let masks = fields
            .iter()
            .map(|f| mask_for(f.bits))
            .collect::<Vec<_>>();

        Ok(Self {
            fields: fields.to_vec(),
            masks,
            remain_bits: 32 - total,
        })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Packs `values` (aligned 1:1 with the schema's field order) into a word.
    pub fn encode(&self, values: &[u32]) -> Result<u32, BitcodecError> {
        self.check_len(values)?;

        let mut ret: u32 = 0;
        let mut shifts: u32 = 32;
        for ((value, mask), field) in values.iter().zip(&self.masks).zip(&self.fields) {
            shifts -= field.bits;
            ret |= (value & mask) << shifts;
        }
        Ok(ret)
    }

    /// Packs `values` into a 4-byte big-endian buffer.
    pub fn encode_to_bytes(&self, values: &[u32]) -> Result<[u8; 4], BitcodecError> {
        Ok(self.encode(values)?.to_be_bytes())
    }

    /// Unpacks a word into field values, in schema declaration order.
    pub fn decode(&self, word: u32) -> Vec<u32> {
        let mut v = word >> self.remain_bits;
        let mut out = vec![0u32; self.fields.len()];

        for i in (0..self.fields.len()).rev() {
            let mask = self.masks[i];
            let bits = self.fields[i].bits;
            out[i] = v & mask;
            v >>= bits;
        }
        out
    }

    /// Unpacks a 4-byte big-endian buffer into field values.
    pub fn decode_from_bytes(&self, bytes: &[u8; 4]) -> Vec<u32> {
        self.decode(u32::from_be_bytes(*bytes))
    }

    fn check_len(&self, values: &[u32]) -> Result<(), BitcodecError> {
        if values.len() != self.fields.len() {
            return Err(BitcodecError::FieldCountMismatch {
                expected: self.fields.len(),
                got: values.len(),
            });
        }
        Ok(())
    }
}

fn mask_for(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> Bitcodec {
        Bitcodec::new(&[Field::new("a", 1), Field::new("b", 7), Field::new("c", 8)]).unwrap()
    }

    #[test]
    fn roundtrip_matches_reference_vector() {
        let codec = abc();

        let word = codec.encode(&[1, 0, 0xFF]).unwrap();
        assert_eq!(word, 0x80FF0000);

        let decoded = codec.decode(word);
        assert_eq!(decoded, vec![1, 0, 0xFF]);
    }

    #[test]
    fn all_zeros_encodes_to_zero() {
        let codec = abc();
        assert_eq!(codec.encode(&[0, 0, 0]).unwrap(), 0);
    }

    #[test]
    fn roundtrip_is_identity_for_arbitrary_values_within_width() {
        let codec = Bitcodec::new(&[Field::new("seq", 27), Field::new("frag", 4), Field::new("more", 1)])
            .unwrap();

        for seq in [0u32, 1, 42, 0x07FF_FFFF] {
            for frag in 0u32..16 {
                for more in 0u32..2 {
                    let word = codec.encode(&[seq, frag, more]).unwrap();
                    assert_eq!(codec.decode(word), vec![seq, frag, more]);
                }
            }
        }
    }

    #[test]
    fn construction_fails_when_total_width_exceeds_32() {
        let err = Bitcodec::new(&[Field::new("a", 20), Field::new("b", 13)]).unwrap_err();
        assert_eq!(err, BitcodecError::TooWide { total: 33 });
    }

    #[test]
    fn encode_rejects_wrong_field_count() {
        let codec = abc();
        let err = codec.encode(&[1, 2]).unwrap_err();
        assert_eq!(
            err,
            BitcodecError::FieldCountMismatch {
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn bytes_wrappers_are_big_endian() {
        let codec = abc();
        let bytes = codec.encode_to_bytes(&[1, 0, 0xFF]).unwrap();
        assert_eq!(bytes, 0x80FF0000u32.to_be_bytes());
        assert_eq!(codec.decode_from_bytes(&bytes), vec![1, 0, 0xFF]);
    }
}
