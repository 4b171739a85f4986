use serde::Deserialize;

use crate::{ObfsError, Obfuscator};

#[derive(Debug, Deserialize)]
struct XorOptions {
    key: String,
}

/// XORs every byte against a repeating key. Trivial, but it breaks
/// fixed-byte-pattern matching on the wire — which is the whole point of
/// an obfuscator sitting below the DNS codec rather than a cipher.
pub struct XorObfuscator {
    key: Vec<u8>,
    max_len: usize,
}

impl XorObfuscator {
    pub(crate) fn open(
        options: &serde_json::value::RawValue,
        max_obfsed_len: usize,
    ) -> Result<Self, ObfsError> {
        let options: XorOptions =
            serde_json::from_str(options.get()).map_err(|source| ObfsError::InvalidOptions {
                name: "xor",
                source,
            })?;

        if options.key.is_empty() {
            return Err(ObfsError::InvalidOptions {
                name: "xor",
                source: serde::de::Error::custom("key must not be empty"),
            });
        }

        tracing::info!(max_len = max_obfsed_len, "xor obfuscator init done");

        Ok(Self {
            key: options.key.into_bytes(),
            max_len: max_obfsed_len,
        })
    }
}

impl Obfuscator for XorObfuscator {
    fn max_plain_length(&self) -> usize {
        self.max_len
    }

    fn encode(&self, src: &[u8], dst: &mut [u8]) -> usize {
        for (i, &b) in src.iter().enumerate() {
            dst[i] = b ^ self.key[i % self.key.len()];
        }
        src.len()
    }

    // XOR decoding is the same operation as encoding.
    fn decode(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, ObfsError> {
        Ok(self.encode(src, dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_with_key(key: &str, max_len: usize) -> XorObfuscator {
        let raw =
            serde_json::value::RawValue::from_string(format!(r#"{{"key":"{key}"}}"#)).unwrap();
        XorObfuscator::open(&raw, max_len).unwrap()
    }

    #[test]
    fn encodes_zeroed_input_to_repeated_key() {
        let xor = open_with_key("ab", 1500);
        let src = [0u8, 0, 0, 0];
        let mut dst = [0u8; 4];

        let n = xor.encode(&src, &mut dst);

        assert_eq!(n, 4);
        assert_eq!(dst, [0x61, 0x62, 0x61, 0x62]);
    }

    #[test]
    fn decode_is_encode_roundtrip() {
        let xor = open_with_key("secretkey", 1500);
        let src: Vec<u8> = (0..64u8).collect();
        let mut encoded = vec![0u8; src.len()];
        let mut decoded = vec![0u8; src.len()];

        xor.encode(&src, &mut encoded);
        xor.decode(&encoded, &mut decoded).unwrap();

        assert_eq!(decoded, src);
    }

    #[test]
    fn rejects_empty_key() {
        let raw = serde_json::value::RawValue::from_string(r#"{"key":""}"#.to_string()).unwrap();
        assert!(XorObfuscator::open(&raw, 1500).is_err());
    }
}
