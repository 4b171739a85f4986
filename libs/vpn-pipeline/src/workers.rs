//! The six steady-state worker roles: two for the TUN device, one reader
//! and one writer per wire transport, and the obfuscation encoder/decoder
//! sitting between the `from_tun`/`to_wire` and `from_wire`/`to_tun`
//! queues. Each is a cooperative task built around exactly one blocking
//! call, matched to how blocking that call actually is: TUN reads/writes
//! run on a dedicated blocking thread (flume's blocking `send`/`recv_timeout`
//! work from there without bridging back into async), everything else is
//! a plain tokio task selecting between its queue and the shutdown token.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tun::TunDevice;

use crate::pipeline::ERROR_THRESHOLD;

const TUN_WRITER_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub(crate) fn spawn_tun_reader(
    tun_device: Arc<tun::PlatformTun>,
    tun_mtu: usize,
    pool: bufferpool::BufferPool<Vec<u8>>,
    tx: flume::Sender<bufferpool::Buffer<Vec<u8>>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut errors = 0usize;
        while !token.is_cancelled() {
            let mut buffer = pool.pull();
            buffer.resize(tun_mtu, 0);
            match tun_device.read(&mut buffer[..]) {
                Ok(0) => tracing::warn!("read zero bytes from tun, ignore"),
                Ok(n) => {
                    buffer.truncate(n);
                    if tx.send(buffer).is_err() {
                        break;
                    }
                    errors = 0;
                }
                Err(err) => {
                    errors += 1;
                    tracing::warn!(%err, errors, "error reading from tun");
                    if errors > ERROR_THRESHOLD {
                        tracing::warn!("tun reader exceeded error threshold, exiting");
                        break;
                    }
                }
            }
        }
        tracing::warn!("tun reader exited");
    })
}

pub(crate) fn spawn_tun_writer(
    tun_device: Arc<tun::PlatformTun>,
    rx: flume::Receiver<bufferpool::Buffer<Vec<u8>>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        loop {
            match rx.recv_timeout(TUN_WRITER_POLL_INTERVAL) {
                Ok(buffer) => match tun_device.write(&buffer[..]) {
                    Ok(n) if n == buffer.len() => {}
                    Ok(n) => {
                        tracing::warn!(written = n, expected = buffer.len(), "short write to tun, ignore");
                    }
                    Err(err) => {
                        tracing::warn!(%err, "error writing to tun, exit");
                        break;
                    }
                },
                Err(flume::RecvTimeoutError::Timeout) => {
                    if token.is_cancelled() {
                        break;
                    }
                }
                Err(flume::RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::warn!("tun writer exited");
    })
}

pub(crate) fn spawn_wire_reader(
    transport: Arc<dyn wire::Transport>,
    read_mtu: usize,
    pool: bufferpool::BufferPool<Vec<u8>>,
    tx: flume::Sender<bufferpool::Buffer<Vec<u8>>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut errors = 0usize;
        loop {
            let mut buffer = pool.pull();
            buffer.resize(read_mtu, 0);

            let recv = tokio::select! {
                _ = token.cancelled() => break,
                recv = transport.recv(&mut buffer[..]) => recv,
            };

            match recv {
                Ok(0) => tracing::warn!("read zero bytes from wire, ignore"),
                Ok(n) => {
                    buffer.truncate(n);
                    if tx.send_async(buffer).await.is_err() {
                        break;
                    }
                    errors = 0;
                }
                Err(err) => {
                    errors += 1;
                    tracing::warn!(%err, errors, "error reading from wire");
                    if errors > ERROR_THRESHOLD {
                        tracing::warn!("wire reader exceeded error threshold, exiting");
                        break;
                    }
                }
            }
        }
        tracing::warn!("wire reader exited");
    })
}

pub(crate) fn spawn_wire_writer(
    transport: Arc<dyn wire::Transport>,
    rx: flume::Receiver<bufferpool::Buffer<Vec<u8>>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                _ = token.cancelled() => break,
                item = rx.recv_async() => item,
            };

            let buffer = match item {
                Ok(buffer) => buffer,
                Err(_) => break,
            };

            match transport.send(&buffer[..]).await {
                Ok(n) if n == buffer.len() => {}
                Ok(n) => {
                    tracing::warn!(written = n, expected = buffer.len(), "short write to wire, ignore");
                }
                Err(err) => {
                    tracing::warn!(%err, "error writing to wire, exit");
                    break;
                }
            }
        }
        tracing::warn!("wire writer exited");
    })
}

pub(crate) fn spawn_obfs_encoder(
    obfuscators: Arc<Vec<Box<dyn obfs::Obfuscator>>>,
    max_packet_cap: usize,
    pool: bufferpool::BufferPool<Vec<u8>>,
    rx: flume::Receiver<bufferpool::Buffer<Vec<u8>>>,
    tx: flume::Sender<bufferpool::Buffer<Vec<u8>>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut scratch = [vec![0u8; max_packet_cap], vec![0u8; max_packet_cap]];
        loop {
            let item = tokio::select! {
                _ = token.cancelled() => break,
                item = rx.recv_async() => item,
            };

            let data = match item {
                Ok(data) => data,
                Err(_) => break,
            };

            let encoded = encode_chain(&obfuscators, max_packet_cap, &data, &mut scratch);
            if tx.send_async(pool.pull_initialised(&encoded)).await.is_err() {
                break;
            }
        }
        tracing::warn!("obfuscator encoding worker exited");
    })
}

pub(crate) fn spawn_obfs_decoder(
    obfuscators: Arc<Vec<Box<dyn obfs::Obfuscator>>>,
    max_packet_cap: usize,
    pool: bufferpool::BufferPool<Vec<u8>>,
    rx: flume::Receiver<bufferpool::Buffer<Vec<u8>>>,
    tx: flume::Sender<bufferpool::Buffer<Vec<u8>>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut scratch = [vec![0u8; max_packet_cap], vec![0u8; max_packet_cap]];
        loop {
            let item = tokio::select! {
                _ = token.cancelled() => break,
                item = rx.recv_async() => item,
            };

            let data = match item {
                Ok(data) => data,
                Err(_) => break,
            };

            match decode_chain(&obfuscators, max_packet_cap, &data, &mut scratch) {
                Ok(decoded) => {
                    if tx.send_async(pool.pull_initialised(&decoded)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "error decoding, drop it");
                }
            }
        }
        tracing::warn!("obfuscator decoding worker exited");
    })
}

/// Runs `data` forward through the obfuscator chain, ping-ponging between
/// the two scratch buffers the way a single-packet encode/decode pass
/// reuses the same two allocations across every obfuscator hop.
fn encode_chain(
    obfuscators: &[Box<dyn obfs::Obfuscator>],
    max_packet_cap: usize,
    data: &[u8],
    scratch: &mut [Vec<u8>; 2],
) -> Vec<u8> {
    scratch[0].clear();
    scratch[0].extend_from_slice(data);
    let mut current = 0usize;
    let mut len = data.len();

    for obfuscator in obfuscators {
        let next = 1 - current;
        if scratch[next].len() != max_packet_cap {
            scratch[next].resize(max_packet_cap, 0);
        }
        let (a, b) = scratch.split_at_mut(1);
        let n = if current == 0 {
            obfuscator.encode(&a[0][..len], &mut b[0][..])
        } else {
            obfuscator.encode(&b[0][..len], &mut a[0][..])
        };
        current = next;
        len = n;
    }

    scratch[current][..len].to_vec()
}

/// Runs `data` backward through the obfuscator chain. Any single
/// obfuscator returning an error drops the whole packet, matching the
/// original's "decode failure anywhere in the chain discards the packet
/// entirely" behavior.
fn decode_chain(
    obfuscators: &[Box<dyn obfs::Obfuscator>],
    max_packet_cap: usize,
    data: &[u8],
    scratch: &mut [Vec<u8>; 2],
) -> Result<Vec<u8>, obfs::ObfsError> {
    scratch[0].clear();
    scratch[0].extend_from_slice(data);
    let mut current = 0usize;
    let mut len = data.len();

    for obfuscator in obfuscators.iter().rev() {
        let next = 1 - current;
        if scratch[next].len() != max_packet_cap {
            scratch[next].resize(max_packet_cap, 0);
        }
        let (a, b) = scratch.split_at_mut(1);
        let n = if current == 0 {
            obfuscator.decode(&a[0][..len], &mut b[0][..])?
        } else {
            obfuscator.decode(&b[0][..len], &mut a[0][..])?
        };
        current = next;
        len = n;
    }

    Ok(scratch[current][..len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl obfs::Obfuscator for Passthrough {
        fn max_plain_length(&self) -> usize {
            1500
        }
        fn encode(&self, src: &[u8], dst: &mut [u8]) -> usize {
            dst[..src.len()].copy_from_slice(src);
            src.len()
        }
        fn decode(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, obfs::ObfsError> {
            dst[..src.len()].copy_from_slice(src);
            Ok(src.len())
        }
    }

    struct Reject;

    impl obfs::Obfuscator for Reject {
        fn max_plain_length(&self) -> usize {
            1500
        }
        fn encode(&self, src: &[u8], dst: &mut [u8]) -> usize {
            dst[..src.len()].copy_from_slice(src);
            src.len()
        }
        fn decode(&self, _src: &[u8], _dst: &mut [u8]) -> Result<usize, obfs::ObfsError> {
            Err(obfs::ObfsError::Decode { name: "reject", len: 0, reason: "always fails" })
        }
    }

    #[test]
    fn encode_chain_runs_obfuscators_in_forward_order() {
        let obfuscators: Vec<Box<dyn obfs::Obfuscator>> = vec![Box::new(Passthrough)];
        let mut scratch = [vec![0u8; 64], vec![0u8; 64]];
        let out = encode_chain(&obfuscators, 64, b"hello", &mut scratch);
        assert_eq!(out, b"hello");
    }

    #[test]
    fn decode_chain_drops_the_packet_on_any_obfuscator_error() {
        let obfuscators: Vec<Box<dyn obfs::Obfuscator>> = vec![Box::new(Reject)];
        let mut scratch = [vec![0u8; 64], vec![0u8; 64]];
        assert!(decode_chain(&obfuscators, 64, b"hello", &mut scratch).is_err());
    }

    #[test]
    fn encode_then_decode_round_trips_through_a_chain() {
        let obfuscators: Vec<Box<dyn obfs::Obfuscator>> =
            vec![Box::new(Passthrough), Box::new(Passthrough)];
        let mut scratch = [vec![0u8; 64], vec![0u8; 64]];
        let encoded = encode_chain(&obfuscators, 64, b"payload-bytes", &mut scratch);
        let decoded = decode_chain(&obfuscators, 64, &encoded, &mut scratch).unwrap();
        assert_eq!(decoded, b"payload-bytes");
    }
}
