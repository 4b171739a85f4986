//! DNS query/answer transport: a [`wire::Transport`] implementation that
//! hides tunnel traffic inside ordinary-looking TXT-record lookups,
//! answered long-poll style so the server only ever speaks in response to
//! a client's own queries.

mod client;
mod server;

pub use client::DnsClientTransport;
pub use server::DnsServerTransport;

use wire::{Transport, TransportError};

/// A logical message is never split into more than this many fragments
/// (the fragment index is a 4-bit field); mirrors `dns_proto`'s own limit.
const MAX_FRAGMENTS_PER_MESSAGE: usize = 16;

/// Opens either side of the DNS transport, the way [`wire::open`]
/// dispatches on the UDP/XMPP transports. Kept as a separate entry point
/// (rather than folded into `wire::open`) so `wire` never has to depend on
/// this heavier, stateful transport.
pub async fn open(
    is_server: bool,
    options: &serde_json::value::RawValue,
) -> Result<Box<dyn Transport>, TransportError> {
    if is_server {
        Ok(Box::new(DnsServerTransport::open(options).await?))
    } else {
        Ok(Box::new(DnsClientTransport::open(options).await?))
    }
}

/// The largest single logical payload the transport can move in either
/// direction, given its per-fragment length limits and the hard cap of
/// [`MAX_FRAGMENTS_PER_MESSAGE`] fragments per message. Used as the
/// reported `Transport::mtu()` when a config doesn't override it.
fn effective_mtu(base_domain: &str) -> usize {
    let upstream_cap = dns_proto::UpstreamCodec::new(base_domain).max_length() * MAX_FRAGMENTS_PER_MESSAGE;
    let downstream_cap = dns_proto::DownstreamCodec::new().max_length() * MAX_FRAGMENTS_PER_MESSAGE;
    upstream_cap.min(downstream_cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(json: &str) -> Box<serde_json::value::RawValue> {
        serde_json::value::RawValue::from_string(json.to_string()).unwrap()
    }

    #[tokio::test]
    async fn client_and_server_exchange_payloads_end_to_end() {
        let server_opts = options(r#"{"listen_addr":"127.0.0.1:0","base_domain":"blahgeek.com"}"#);
        let server = DnsServerTransport::open(&server_opts).await.unwrap();
        let server_addr = server.local_addr();

        let client_opts = options(&format!(
            r#"{{"server_addr":"127.0.0.1:{}","base_domain":"blahgeek.com","keepalive_interval_ms":5}}"#,
            server_addr.port()
        ));
        let client = DnsClientTransport::open(&client_opts).await.unwrap();

        client.send(b"hello from client").await.unwrap();

        let mut buf = [0u8; 1500];
        let n = tokio::time::timeout(std::time::Duration::from_secs(5), server.recv(&mut buf))
            .await
            .expect("server should receive the upstream payload")
            .unwrap();
        assert_eq!(&buf[..n], b"hello from client");

        server.send(b"hello from server").await.unwrap();
        let n = tokio::time::timeout(std::time::Duration::from_secs(5), client.recv(&mut buf))
            .await
            .expect("client should receive the downstream payload")
            .unwrap();
        assert_eq!(&buf[..n], b"hello from server");
    }

    #[test]
    fn effective_mtu_is_positive_for_a_typical_domain() {
        assert!(effective_mtu("blahgeek.com") > 0);
    }
}
