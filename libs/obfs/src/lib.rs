//! Obfuscators: the thin, optional scrambling step between the DNS/wire
//! codec and whatever sits on top of it. Each obfuscator is opened with a
//! JSON options blob and a plain-length budget, and thereafter only ever
//! needs to encode/decode fixed-size buffers in place.

mod xor;

pub use xor::XorObfuscator;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObfsError {
    #[error("unknown obfuscator: {0}")]
    UnknownName(String),
    #[error("invalid options for obfuscator {name}: {source}")]
    InvalidOptions {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("obfuscator {name} cannot decode input of length {len}: {reason}")]
    Decode {
        name: &'static str,
        len: usize,
        reason: &'static str,
    },
}

/// A packet obfuscator.
///
/// `encode`/`decode` operate on pre-sized buffers (`dst.len() >= src.len()`
/// is the caller's responsibility to arrange via `max_plain_length`); they
/// return the number of bytes written to `dst`.
pub trait Obfuscator: Send + Sync {
    /// The longest plaintext this obfuscator can encode into a buffer no
    /// longer than the wire-level cap it was opened with.
    fn max_plain_length(&self) -> usize;

    /// Encodes `src` into `dst`, returning the number of bytes written.
    fn encode(&self, src: &[u8], dst: &mut [u8]) -> usize;

    /// Decodes `src` into `dst`, returning the number of bytes written.
    fn decode(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, ObfsError>;
}

/// Opens an obfuscator by name, the way the original's `obfs.New` dispatches
/// on a string discriminator. `max_obfsed_len` bounds the longest encoded
/// output the caller will ever pass through the wire transport beneath this
/// obfuscator.
pub fn open(
    name: &str,
    options: &serde_json::value::RawValue,
    max_obfsed_len: usize,
) -> Result<Box<dyn Obfuscator>, ObfsError> {
    tracing::info!(name, max_obfsed_len, "opening obfuscator");

    match name {
        "xor" => Ok(Box::new(XorObfuscator::open(options, max_obfsed_len)?)),
        other => Err(ObfsError::UnknownName(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_is_rejected() {
        let raw = serde_json::value::RawValue::from_string("{}".to_string()).unwrap();
        let err = open("rot13", &raw, 1500).unwrap_err();
        assert!(matches!(err, ObfsError::UnknownName(name) if name == "rot13"));
    }
}
