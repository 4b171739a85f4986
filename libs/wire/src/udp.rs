use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::UdpSocket;

use crate::{Gateway, Transport, TransportError};

const DEFAULT_MTU: usize = 1450;

#[derive(Debug, Deserialize)]
struct UdpOptions {
    mtu: Option<usize>,
    server_addr: String,
    client_addr: Option<String>,
}

/// A plain UDP datagram transport. The server side listens and learns its
/// peer's address from the first datagram it receives; the client side
/// dials out and keeps using the same socket.
pub struct UdpTransport {
    socket: UdpSocket,
    is_server: bool,
    mtu: usize,
    remote_addr: Mutex<Option<SocketAddr>>,
}

impl UdpTransport {
    pub async fn open(
        is_server: bool,
        options: &serde_json::value::RawValue,
    ) -> Result<Self, TransportError> {
        let options: UdpOptions =
            serde_json::from_str(options.get()).map_err(|source| TransportError::InvalidOptions {
                name: "udp",
                source,
            })?;

        let mtu = options.mtu.unwrap_or(DEFAULT_MTU);
        let server_addr = resolve(&options.server_addr).await?;

        if is_server {
            tracing::info!(addr = %server_addr, "listening on address");
            let socket = UdpSocket::bind(server_addr).await?;
            return Ok(Self {
                socket,
                is_server: true,
                mtu,
                remote_addr: Mutex::new(None),
            });
        }

        let client_addr = match options.client_addr {
            Some(addr) => resolve(&addr).await?,
            None => SocketAddr::from(([0, 0, 0, 0], 0)),
        };

        tracing::info!(server = %server_addr, local = %client_addr, "dialing to address");
        let socket = UdpSocket::bind(client_addr).await?;
        socket.connect(server_addr).await?;

        Ok(Self {
            socket,
            is_server: false,
            mtu,
            remote_addr: Mutex::new(Some(server_addr)),
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn gateways(&self) -> Vec<Gateway> {
        if self.is_server {
            return Vec::new();
        }

        let Some(SocketAddr::V4(addr)) = *self.remote_addr.lock().unwrap() else {
            return Vec::new();
        };

        vec![Gateway {
            network: *addr.ip(),
            netmask: Ipv4Addr::new(255, 255, 255, 255),
        }]
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.is_server {
            let (n, from) = self.socket.recv_from(buf).await?;
            *self.remote_addr.lock().unwrap() = Some(from);
            Ok(n)
        } else {
            Ok(self.socket.recv(buf).await?)
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize, TransportError> {
        if self.is_server {
            let remote = self
                .remote_addr
                .lock()
                .unwrap()
                .ok_or(TransportError::NoRemoteAddress)?;
            Ok(self.socket.send_to(buf, remote).await?)
        } else {
            Ok(self.socket.send(buf).await?)
        }
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, TransportError> {
    tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| TransportError::Io(std::io::Error::other(format!("no address for {addr}"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(json: &str) -> Box<serde_json::value::RawValue> {
        serde_json::value::RawValue::from_string(json.to_string()).unwrap()
    }

    #[tokio::test]
    async fn client_and_server_exchange_a_datagram() {
        let server_opts = options(r#"{"server_addr":"127.0.0.1:0"}"#);
        let server = UdpTransport::open(true, &server_opts).await.unwrap();

        let server_addr = server.socket.local_addr().unwrap();
        let client_opts = options(&format!(r#"{{"server_addr":"127.0.0.1:{}"}}"#, server_addr.port()));
        let client = UdpTransport::open(false, &client_opts).await.unwrap();

        client.send(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let n = server.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        server.send(b"world").await.unwrap();
        let n = client.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[tokio::test]
    async fn server_cannot_send_before_it_has_heard_from_a_peer() {
        let opts = options(r#"{"server_addr":"127.0.0.1:0"}"#);
        let server = UdpTransport::open(true, &opts).await.unwrap();

        let err = server.send(b"hi").await.unwrap_err();
        assert!(matches!(err, TransportError::NoRemoteAddress));
    }

    #[tokio::test]
    async fn client_reports_server_as_its_gateway() {
        let server_opts = options(r#"{"server_addr":"127.0.0.1:0"}"#);
        let server = UdpTransport::open(true, &server_opts).await.unwrap();
        let server_addr = server.socket.local_addr().unwrap();

        let client_opts = options(&format!(r#"{{"server_addr":"127.0.0.1:{}"}}"#, server_addr.port()));
        let client = UdpTransport::open(false, &client_opts).await.unwrap();

        let gateways = client.gateways();
        assert_eq!(gateways.len(), 1);
        assert_eq!(gateways[0].netmask, Ipv4Addr::new(255, 255, 255, 255));
    }
}
