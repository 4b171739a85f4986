//! Client half of the DNS transport: periodically issues TXT queries
//! carrying upstream fragments, falling back to empty-payload keepalive
//! queries so the server always has something parked to answer with.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dns_proto::{build_query, parse_answer, parse_query, DnsFragmentStream, DownstreamCodec, UpstreamCodec};
use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use wire::{Gateway, Transport, TransportError};

const DEFAULT_KEEPALIVE_MS: u64 = 50;
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
const RECV_BUF_LEN: usize = 1500;

#[derive(Debug, Deserialize)]
struct ClientOptions {
    server_addr: String,
    base_domain: String,
    keepalive_interval_ms: Option<u64>,
    mtu: Option<usize>,
}

pub struct DnsClientTransport {
    mtu: usize,
    inbox: Mutex<mpsc::Receiver<Vec<u8>>>,
    outbox: mpsc::Sender<Vec<u8>>,
}

impl DnsClientTransport {
    pub async fn open(options: &serde_json::value::RawValue) -> Result<Self, TransportError> {
        let options: ClientOptions =
            serde_json::from_str(options.get()).map_err(|source| TransportError::InvalidOptions {
                name: "dns",
                source,
            })?;

        let server_addr = resolve(&options.server_addr).await?;
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect(server_addr).await?;
        tracing::info!(server = %server_addr, "dns client dialing");

        let mtu = options
            .mtu
            .unwrap_or_else(|| crate::effective_mtu(&options.base_domain));
        let keepalive = Duration::from_millis(options.keepalive_interval_ms.unwrap_or(DEFAULT_KEEPALIVE_MS));

        let (inbox_tx, inbox_rx) = mpsc::channel::<Vec<u8>>(64);
        let (outbox_tx, outbox_rx) = mpsc::channel::<Vec<u8>>(64);

        tokio::spawn(run_poll_loop(
            socket,
            options.base_domain,
            keepalive,
            inbox_tx,
            outbox_rx,
        ));

        Ok(Self {
            mtu,
            inbox: Mutex::new(inbox_rx),
            outbox: outbox_tx,
        })
    }
}

async fn resolve(addr: &str) -> Result<std::net::SocketAddr, TransportError> {
    tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| TransportError::Io(std::io::Error::other(format!("no address for {addr}"))))
}

async fn run_poll_loop(
    socket: UdpSocket,
    base_domain: String,
    keepalive: Duration,
    inbox_tx: mpsc::Sender<Vec<u8>>,
    mut outbox_rx: mpsc::Receiver<Vec<u8>>,
) {
    let mut upstream = DnsFragmentStream::new(UpstreamCodec::new(&base_domain));
    let mut downstream = DnsFragmentStream::new(DownstreamCodec::new());
    let mut pending: VecDeque<String> = VecDeque::new();
    let mut next_id: u16 = 0;
    let mut buf = vec![0u8; RECV_BUF_LEN];

    let mut ticker = tokio::time::interval(keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if pending.is_empty() {
            match outbox_rx.try_recv() {
                Ok(payload) => pending.extend(upstream.encode(&payload)),
                Err(_) => pending.extend(upstream.encode(&[])),
            }
        }
        let Some(qname) = pending.pop_front() else {
            continue;
        };

        let id = next_id;
        next_id = next_id.wrapping_add(1);
        let query = build_query(id, &qname);

        if let Err(err) = socket.send(&query).await {
            tracing::warn!(%err, "dns client send failed");
            continue;
        }

        match tokio::time::timeout(REPLY_TIMEOUT, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => handle_reply(&buf[..n], &mut downstream, &inbox_tx).await,
            Ok(Err(err)) => tracing::warn!(%err, "dns client recv failed"),
            Err(_) => tracing::debug!(id, "dns client query timed out"),
        }
    }
}

async fn handle_reply(
    bytes: &[u8],
    downstream: &mut DnsFragmentStream<DownstreamCodec>,
    inbox_tx: &mpsc::Sender<Vec<u8>>,
) {
    let is_response = match parse_query(bytes) {
        Ok(parsed) => parsed.is_response,
        Err(_) => return,
    };
    if !is_response {
        return;
    }

    let Ok((_id, txt)) = parse_answer(bytes) else {
        return;
    };
    let Ok(txt) = std::str::from_utf8(&txt) else {
        return;
    };
    if let Some(payload) = downstream.decode(txt) {
        let _ = inbox_tx.send(payload).await;
    }
}

#[async_trait]
impl Transport for DnsClientTransport {
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
                "dns client worker has stopped",
            ))),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.outbox
            .send(buf.to_vec())
            .await
            .map_err(|_| TransportError::Io(std::io::Error::other("dns client worker has stopped")))?;
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
        let opts = options(r#"{"server_addr":"127.0.0.1:5353"}"#);
        let err = DnsClientTransport::open(&opts).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidOptions { name: "dns", .. }));
    }
}
