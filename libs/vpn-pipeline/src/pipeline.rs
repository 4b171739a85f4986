use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tun::TunDevice;

use crate::errors::PipelineError;
use crate::workers;

/// A reader (TUN or wire) tolerates this many consecutive I/O errors
/// before giving up and exiting its loop.
pub(crate) const ERROR_THRESHOLD: usize = 32;

/// Capacity of each of the four inter-worker queues.
const QUEUE_CAPACITY: usize = 64;

fn gateway_to_cidr(gateway: wire::Gateway) -> route::Cidr {
    let prefix_len = u32::from(gateway.netmask).count_ones() as u8;
    route::Cidr::new(gateway.network, prefix_len)
}

/// Everything opened and configured during [`Pipeline::init`], not yet
/// running any workers.
pub struct Pipeline {
    wire_transports: Vec<Arc<dyn wire::Transport>>,
    wire_min_mtu: usize,
    obfuscators: Arc<Vec<Box<dyn obfs::Obfuscator>>>,
    tun_device: Arc<tun::PlatformTun>,
    tun_mtu: usize,
    max_packet_cap: usize,
    is_server: bool,
    wire_rules: Vec<route::Cidr>,
    vpn_rules: Vec<route::Cidr>,
    gateways: Option<(Ipv4Addr, Ipv4Addr)>,
}

impl Pipeline {
    /// Performs the mandatory initialization order: open every wire
    /// transport and take the minimum MTU across them; thread that MTU
    /// through the obfuscator chain, each one tightening the payload
    /// envelope further; allocate and address the TUN device at the
    /// resulting MTU; on the client side, install routes; finally compute
    /// the shared packet buffer capacity.
    pub async fn init(is_server: bool, config: &config::Config) -> Result<Self, PipelineError> {
        let mut wire_transports: Vec<Arc<dyn wire::Transport>> = Vec::new();
        let mut wire_min_mtu: Option<usize> = None;

        for item in &config.wires {
            let transport: Box<dyn wire::Transport> = match item {
                config::WireConfig::Udp(_) | config::WireConfig::Xmpp(_) => {
                    let options = item.options_json()?;
                    wire::open(item.name(), is_server, &options).await?
                }
                config::WireConfig::Dns(dns_opts) => {
                    let options = if is_server {
                        dns_opts.server_options_json()?
                    } else {
                        dns_opts.client_options_json()?
                    };
                    dns_transport::open(is_server, &options).await?
                }
            };

            let mtu = transport.mtu();
            wire_min_mtu = Some(wire_min_mtu.map_or(mtu, |current: usize| current.min(mtu)));
            tracing::info!(name = item.name(), mtu, "wire transport opened");
            wire_transports.push(Arc::from(transport));
        }
        let wire_min_mtu = wire_min_mtu.ok_or(PipelineError::NoWireTransports)?;
        tracing::info!(mtu = wire_min_mtu, "MTU for wire transport detected");

        let mut tun_mtu = wire_min_mtu;
        let mut obfuscators: Vec<Box<dyn obfs::Obfuscator>> = Vec::new();
        for item in &config.obfs {
            let options = item.options_json()?;
            let obfuscator = obfs::open(item.name(), &options, tun_mtu)?;
            let new_mtu = obfuscator.max_plain_length();
            tracing::debug!(name = item.name(), old = tun_mtu, new = new_mtu, "updating MTU for obfuscator");
            tun_mtu = new_mtu;
            obfuscators.push(obfuscator);
        }

        let tun_device = tun::open_new()?;
        let (local_addr, peer_addr) = if is_server {
            (config.tunnel.server, config.tunnel.client)
        } else {
            (config.tunnel.client, config.tunnel.server)
        };
        tracing::info!(local = %local_addr, remote = %peer_addr, "setting up TUN IP");
        tun_device.set_ipv4(tun::AddrKind::Address, local_addr)?;
        tun_device.set_ipv4(tun::AddrKind::DstAddress, peer_addr)?;
        tracing::info!(mtu = tun_mtu, "setting MTU for TUN transport");
        tun_device.set_mtu(tun_mtu as i32)?;
        route::apply_interface_route(peer_addr, tun_device.name()).await?;

        let mut wire_rules = Vec::new();
        let mut vpn_rules = Vec::new();
        let mut gateways = None;

        if !is_server {
            let wire_gw = route::get_default_gateway().await?;
            let vpn_gw = peer_addr;

            for transport in &wire_transports {
                for gateway in transport.gateways() {
                    wire_rules.push(gateway_to_cidr(gateway));
                }
            }
            wire_rules.extend(config.wire_rules()?);
            vpn_rules.extend(config.vpn_rules()?);

            tracing::info!(%wire_gw, %vpn_gw, "default gateway for non-VPN and VPN traffic");
            route::apply_routes(&wire_rules, &vpn_rules, wire_gw, vpn_gw, false).await?;
            gateways = Some((wire_gw, vpn_gw));
        }

        let mut max_packet_cap = wire_min_mtu.max(tun_mtu);
        for obfuscator in &obfuscators {
            max_packet_cap = max_packet_cap.max(obfuscator.max_plain_length());
        }
        tracing::debug!(capacity = max_packet_cap, "using max packet capacity");
        tracing::info!(wires = wire_transports.len(), obfs = obfuscators.len(), "pipeline init done");

        Ok(Self {
            wire_transports,
            wire_min_mtu,
            obfuscators: Arc::new(obfuscators),
            tun_device: Arc::new(tun_device),
            tun_mtu,
            max_packet_cap,
            is_server,
            wire_rules,
            vpn_rules,
            gateways,
        })
    }

    /// Spawns the six steady-state worker roles and returns a handle that
    /// can be used to tear the pipeline back down.
    pub fn start(self) -> RunningPipeline {
        let pool = bufferpool::BufferPool::<Vec<u8>>::new(self.max_packet_cap);
        let token = CancellationToken::new();
        let mut handles = Vec::new();

        let (from_tun_tx, from_tun_rx) = flume::bounded(QUEUE_CAPACITY);
        let (to_tun_tx, to_tun_rx) = flume::bounded(QUEUE_CAPACITY);
        let (from_wire_tx, from_wire_rx) = flume::bounded(QUEUE_CAPACITY);
        let (to_wire_tx, to_wire_rx) = flume::bounded(QUEUE_CAPACITY);

        handles.push(workers::spawn_tun_reader(
            self.tun_device.clone(),
            self.tun_mtu,
            pool.clone(),
            from_tun_tx,
            token.clone(),
        ));
        handles.push(workers::spawn_tun_writer(self.tun_device.clone(), to_tun_rx, token.clone()));

        for transport in &self.wire_transports {
            handles.push(workers::spawn_wire_reader(
                transport.clone(),
                self.wire_min_mtu,
                pool.clone(),
                from_wire_tx.clone(),
                token.clone(),
            ));
            handles.push(workers::spawn_wire_writer(
                transport.clone(),
                to_wire_rx.clone(),
                token.clone(),
            ));
        }
        drop(from_wire_tx);
        drop(to_wire_rx);

        handles.push(workers::spawn_obfs_encoder(
            self.obfuscators.clone(),
            self.max_packet_cap,
            pool.clone(),
            from_tun_rx,
            to_wire_tx,
            token.clone(),
        ));
        handles.push(workers::spawn_obfs_decoder(
            self.obfuscators.clone(),
            self.max_packet_cap,
            pool,
            from_wire_rx,
            to_tun_tx,
            token.clone(),
        ));

        RunningPipeline {
            handles,
            token,
            tun_device: self.tun_device,
            wire_transports: self.wire_transports,
            obfuscators: self.obfuscators,
            is_server: self.is_server,
            wire_rules: self.wire_rules,
            vpn_rules: self.vpn_rules,
            gateways: self.gateways,
        }
    }
}

/// Resources kept alive while the steady-state workers run; [`RunningPipeline::destroy`]
/// tears them down in the documented order.
pub struct RunningPipeline {
    handles: Vec<JoinHandle<()>>,
    token: CancellationToken,
    tun_device: Arc<tun::PlatformTun>,
    wire_transports: Vec<Arc<dyn wire::Transport>>,
    obfuscators: Arc<Vec<Box<dyn obfs::Obfuscator>>>,
    is_server: bool,
    wire_rules: Vec<route::Cidr>,
    vpn_rules: Vec<route::Cidr>,
    gateways: Option<(Ipv4Addr, Ipv4Addr)>,
}

impl RunningPipeline {
    /// Shuts the pipeline down: signals every worker to stop pulling from
    /// its queue, removes the routes installed at init (client-side
    /// only), brings the TUN device down, drops the obfuscator chain and
    /// every wire transport, then waits for all workers to finish.
    pub async fn destroy(mut self) {
        tracing::warn!("stopping vpn pipeline");
        self.token.cancel();

        if let Some((wire_gw, vpn_gw)) = self.gateways {
            match route::apply_routes(&self.wire_rules, &self.vpn_rules, wire_gw, vpn_gw, true).await {
                Ok(()) => tracing::info!("route rules deleted"),
                Err(err) => tracing::warn!(%err, "failed to delete route rules"),
            }
        }

        if let Err(err) = self.tun_device.down() {
            tracing::warn!(%err, "failed to bring tun device down");
        }
        tracing::info!("tun device destroyed");

        let obfs_count = self.obfuscators.len();
        drop(std::mem::replace(&mut self.obfuscators, Arc::new(Vec::new())));
        tracing::info!(count = obfs_count, "obfuscators closed");

        let wire_count = self.wire_transports.len();
        self.wire_transports.clear();
        tracing::info!(count = wire_count, "wire transports closed");

        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        tracing::warn!(is_server = self.is_server, "vpn pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_to_cidr_derives_prefix_len_from_netmask() {
        let gateway = wire::Gateway {
            network: Ipv4Addr::new(10, 0, 0, 0),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        };
        let cidr = gateway_to_cidr(gateway);
        assert_eq!(cidr.network, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(cidr.prefix_len, 24);
    }

    #[tokio::test]
    async fn init_fails_without_any_wire_transports() {
        let config: config::Config = serde_json::from_str(
            r#"{"tunnel": {"server": "10.42.0.1", "client": "10.42.0.2"}, "wires": []}"#,
        )
        .unwrap();
        let err = Pipeline::init(true, &config).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoWireTransports));
    }
}
