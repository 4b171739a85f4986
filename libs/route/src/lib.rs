//! OS routing-table manipulation for the tunnel's split-route rules:
//! carving out the VPN server's own address (and any other wire-transport
//! gateway) so its traffic keeps using the default route, while sending
//! everything else named by a VPN route rule through the TUN interface.
//!
//! Shells out to the platform's own `route`/`ip` tool rather than talking
//! netlink or PF_ROUTE directly, the way the original did.

mod cidr;
mod errors;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;

pub use cidr::Cidr;
pub use errors::RouteError;

use std::net::Ipv4Addr;

use futures::stream::{self, StreamExt};

/// Upper bound on concurrently in-flight route mutations, so a large rule
/// set doesn't fork hundreds of `ip`/`route` child processes at once.
const MAX_CONCURRENT_ROUTE_OPS: usize = 25;

#[cfg(target_os = "linux")]
async fn run_route(cidr: &Cidr, gateway: Ipv4Addr, delete: bool) -> Result<(), RouteError> {
    linux::run_route(cidr, gateway, delete).await
}

#[cfg(target_os = "macos")]
async fn run_route(cidr: &Cidr, gateway: Ipv4Addr, delete: bool) -> Result<(), RouteError> {
    macos::run_route(cidr, gateway, delete).await
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
async fn run_route(_cidr: &Cidr, _gateway: Ipv4Addr, _delete: bool) -> Result<(), RouteError> {
    Err(RouteError::NoDefaultRoute("unsupported platform"))
}

/// Returns the current default gateway, the way the original consulted it
/// once at startup to preserve the path to the VPN server itself.
pub async fn get_default_gateway() -> Result<Ipv4Addr, RouteError> {
    #[cfg(target_os = "linux")]
    {
        linux::get_default_gateway().await
    }
    #[cfg(target_os = "macos")]
    {
        macos::get_default_gateway().await
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Err(RouteError::NoDefaultRoute("unsupported platform"))
    }
}

/// Applies (or, if `delete` is set, removes) two sets of route rules: the
/// wire rules, routed via `wire_gateway` (normally the host's pre-existing
/// default gateway, keeping wire-transport traffic off the tunnel), and
/// the VPN rules, routed via `vpn_gateway` (normally the tunnel peer
/// address, sending the rest of the configured destinations through the
/// TUN interface). Mutations for both sets run concurrently, capped at
/// [`MAX_CONCURRENT_ROUTE_OPS`] in flight.
pub async fn apply_routes(
    wire_rules: &[Cidr],
    vpn_rules: &[Cidr],
    wire_gateway: Ipv4Addr,
    vpn_gateway: Ipv4Addr,
    delete: bool,
) -> Result<(), RouteError> {
    let wire_jobs = wire_rules.iter().map(|cidr| (*cidr, wire_gateway));
    let vpn_jobs = vpn_rules.iter().map(|cidr| (*cidr, vpn_gateway));
    let jobs: Vec<(Cidr, Ipv4Addr)> = wire_jobs.chain(vpn_jobs).collect();

    let results: Vec<Result<(), RouteError>> = stream::iter(jobs)
        .map(|(cidr, gateway)| async move { run_route(&cidr, gateway, delete).await })
        .buffer_unordered(MAX_CONCURRENT_ROUTE_OPS)
        .collect()
        .await;

    for result in results {
        result?;
    }
    Ok(())
}

/// Darwin-only: binds a host route for the tunnel peer address to the TUN
/// interface. Not part of the distributed spec's own scenarios, but
/// present in the original so replies to the peer address never escape
/// via the default gateway on a platform where the TUN device doesn't set
/// this up implicitly. A no-op everywhere else.
pub async fn apply_interface_route(peer: Ipv4Addr, interface: &str) -> Result<(), RouteError> {
    #[cfg(target_os = "macos")]
    {
        macos::run_interface_route(peer, interface).await
    }
    #[cfg(not(target_os = "macos"))]
    {
        let _ = (peer, interface);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_routes_with_no_rules_is_a_no_op() {
        let result = apply_routes(
            &[],
            &[],
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(166, 111, 8, 1),
            false,
        )
        .await;
        assert!(result.is_ok());
    }
}
