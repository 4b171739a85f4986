//! Server half of the DNS transport: answers TXT queries with fragments of
//! whatever the pipeline hands it to send, long-poll style — it can only
//! speak when a client query is sitting in the park queue waiting for a
//! reply.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dns_proto::{build_reply, parse_query, DnsFragmentStream, DownstreamCodec, UpstreamCodec};
use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use wire::{Gateway, Transport, TransportError};

use crate::MAX_FRAGMENTS_PER_MESSAGE;

const PARK_QUEUE_CAPACITY: usize = 10240;
const QUERY_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:53";
const RECV_BUF_LEN: usize = 1500;

#[derive(Debug, Deserialize)]
struct ServerOptions {
    listen_addr: Option<String>,
    base_domain: String,
    mtu: Option<usize>,
}

/// A query parked while it waits for a downstream payload to answer with.
/// We keep the whole raw query around so the reply can echo the question
/// section back verbatim.
struct Parked {
    query: Vec<u8>,
    addr: SocketAddr,
    parked_at: Instant,
}

/// The DNS server side of the tunnel, implementing [`wire::Transport`] the
/// same way the UDP and XMPP transports do, so the rest of the pipeline
/// doesn't need to know it's talking DNS underneath.
pub struct DnsServerTransport {
    mtu: usize,
    local_addr: SocketAddr,
    inbox: Mutex<mpsc::Receiver<Vec<u8>>>,
    outbox: mpsc::Sender<Vec<u8>>,
}

impl DnsServerTransport {
    pub async fn open(options: &serde_json::value::RawValue) -> Result<Self, TransportError> {
        let options: ServerOptions =
            serde_json::from_str(options.get()).map_err(|source| TransportError::InvalidOptions {
                name: "dns",
                source,
            })?;

        let listen_addr = options.listen_addr.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR);
        let socket = Arc::new(UdpSocket::bind(listen_addr).await?);
        let local_addr = socket.local_addr()?;
        tracing::info!(addr = %local_addr, "dns transport listening");

        let mtu = options
            .mtu
            .unwrap_or_else(|| crate::effective_mtu(&options.base_domain));

        let (inbox_tx, inbox_rx) = mpsc::channel::<Vec<u8>>(64);
        let (outbox_tx, outbox_rx) = mpsc::channel::<Vec<u8>>(64);
        let (parked_tx, parked_rx) = mpsc::channel::<Parked>(PARK_QUEUE_CAPACITY);

        let upstream = Arc::new(Mutex::new(DnsFragmentStream::new(UpstreamCodec::new(
            &options.base_domain,
        ))));
        let downstream = Arc::new(Mutex::new(DnsFragmentStream::new(DownstreamCodec::new())));

        tokio::spawn(run_ingress(socket.clone(), upstream, parked_tx, inbox_tx));
        tokio::spawn(run_egress(socket, downstream, outbox_rx, parked_rx));

        Ok(Self {
            mtu,
            local_addr,
            inbox: Mutex::new(inbox_rx),
            outbox: outbox_tx,
        })
    }

    /// The address the server actually bound to; useful when `listen_addr`
    /// asked for an ephemeral port (`:0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn run_ingress(
    socket: Arc<UdpSocket>,
    upstream: Arc<Mutex<DnsFragmentStream<UpstreamCodec>>>,
    parked_tx: mpsc::Sender<Parked>,
    inbox_tx: mpsc::Sender<Vec<u8>>,
) {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        let (n, addr) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%err, "dns server recv failed");
                continue;
            }
        };
        let query_bytes = buf[..n].to_vec();

        let parsed = match parse_query(&query_bytes) {
            Ok(p) => p,
            Err(err) => {
                tracing::debug!(%err, "dropping unparsable dns query");
                continue;
            }
        };
        if parsed.is_response {
            continue;
        }

        let parked = Parked {
            query: query_bytes,
            addr,
            parked_at: Instant::now(),
        };
        if parked_tx.send(parked).await.is_err() {
            return;
        }

        let payload = upstream.lock().await.decode(&parsed.qname);
        if let Some(payload) = payload {
            if inbox_tx.send(payload).await.is_err() {
                return;
            }
        }
    }
}

async fn run_egress(
    socket: Arc<UdpSocket>,
    downstream: Arc<Mutex<DnsFragmentStream<DownstreamCodec>>>,
    mut outbox_rx: mpsc::Receiver<Vec<u8>>,
    mut parked_rx: mpsc::Receiver<Parked>,
) {
    while let Some(payload) = outbox_rx.recv().await {
        let fragments = downstream.lock().await.encode(&payload);

        for fragment in fragments {
            let parked = loop {
                match parked_rx.recv().await {
                    Some(p) if p.parked_at.elapsed() > QUERY_TIMEOUT => {
                        tracing::debug!("dropping expired parked query");
                        continue;
                    }
                    Some(p) => break Some(p),
                    None => break None,
                }
            };
            let Some(parked) = parked else { return };

            match build_reply(&parked.query, 0, fragment.as_bytes()) {
                Ok(reply) => {
                    if let Err(err) = socket.send_to(&reply, parked.addr).await {
                        tracing::warn!(%err, "dns server send failed");
                    }
                }
                Err(err) => tracing::warn!(%err, "failed to build dns reply"),
            }
        }
    }
}

#[async_trait]
impl Transport for DnsServerTransport {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn gateways(&self) -> Vec<Gateway> {
        Vec::new()
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            None => Err(TransportError::Io(std::io::Error::other(
                "dns server workers have stopped",
            ))),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.outbox
            .send(buf.to_vec())
            .await
            .map_err(|_| TransportError::Io(std::io::Error::other("dns server workers have stopped")))?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(json: &str) -> Box<serde_json::value::RawValue> {
        serde_json::value::RawValue::from_string(json.to_string()).unwrap()
    }

    #[tokio::test]
    async fn rejects_invalid_options() {
        let opts = options(r#"{"base_domain": 5}"#);
        let err = DnsServerTransport::open(&opts).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidOptions { name: "dns", .. }));
    }
}
