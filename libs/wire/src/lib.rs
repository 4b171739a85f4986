//! Wire transports: the bottom of the tunnel's packet pipeline, below the
//! obfuscator. Each transport moves opaque, already-obfuscated byte
//! buffers between peers over some underlying medium (a UDP socket, an
//! XMPP chat stream, ...); none of them know anything about IP packets,
//! DNS, or obfuscation.

pub mod udp;
pub mod xmpp;

use std::net::Ipv4Addr;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown wire transport: {0}")]
    UnknownName(String),
    #[error("invalid options for transport {name}: {source}")]
    InvalidOptions {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required option `{0}`")]
    MissingOption(&'static str),
    #[error("no remote address known yet (server has not received a packet)")]
    NoRemoteAddress,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An IPv4 network that should be routed via the host's existing default
/// gateway rather than through the tunnel, because the wire transport
/// itself depends on reaching it (e.g. the VPN server's own address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gateway {
    pub network: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// A wire transport: an opaque, ordered-or-not byte-buffer channel to the
/// remote peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Largest buffer this transport can move in one `send`/`recv`.
    fn mtu(&self) -> usize;

    /// Networks that must stay on the host's default route instead of
    /// going through the tunnel, because reaching them is how this
    /// transport itself works (e.g. the UDP client's server address).
    fn gateways(&self) -> Vec<Gateway>;

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError>;
    async fn send(&self, buf: &[u8]) -> Result<usize, TransportError>;
}

/// Opens a named transport, the way the original's `wire.New` dispatches
/// on a string discriminator to either the UDP or XMPP implementation.
pub async fn open(
    name: &str,
    is_server: bool,
    options: &serde_json::value::RawValue,
) -> Result<Box<dyn Transport>, TransportError> {
    tracing::info!(name, is_server, "opening wire transport");

    match name {
        "udp" => Ok(Box::new(udp::UdpTransport::open(is_server, options).await?)),
        "xmpp" => Ok(Box::new(xmpp::XmppTransport::open(is_server, options).await?)),
        other => Err(TransportError::UnknownName(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_name_is_rejected() {
        let raw = serde_json::value::RawValue::from_string("{}".to_string()).unwrap();
        let err = open("quic", false, &raw).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownName(name) if name == "quic"));
    }
}
