//! macOS (Darwin) route manipulation via BSD `route`, and default-gateway
//! discovery via `netstat -rn -f inet`.

use std::net::Ipv4Addr;

use tokio::process::Command;

use crate::cidr::Cidr;
use crate::errors::RouteError;

pub fn route_args(cidr: &Cidr, gateway: Ipv4Addr, delete: bool) -> Vec<String> {
    let verb = if delete { "delete" } else { "add" };
    vec![
        verb.to_string(),
        "-net".to_string(),
        cidr.network.to_string(),
        gateway.to_string(),
        cidr.netmask().to_string(),
    ]
}

pub async fn run_route(cidr: &Cidr, gateway: Ipv4Addr, delete: bool) -> Result<(), RouteError> {
    let args = route_args(cidr, gateway, delete);
    let cmd = format!("route {}", args.join(" "));
    tracing::debug!(%cmd, "running route command");

    let status = Command::new("route")
        .args(&args)
        .status()
        .await
        .map_err(|source| RouteError::Spawn { cmd: cmd.clone(), source })?;

    if !status.success() {
        return Err(RouteError::CommandFailed { cmd, status });
    }
    Ok(())
}

/// Binds a host route for the peer VPN address directly to the TUN
/// interface, the way the original pinned the tunnel's own point-to-point
/// peer so replies to it never left via the default gateway. Darwin-only:
/// Linux interfaces pick this up automatically from the TUN device's
/// point-to-point configuration.
pub async fn run_interface_route(peer: Ipv4Addr, interface: &str) -> Result<(), RouteError> {
    let args = vec![
        "add".to_string(),
        "-host".to_string(),
        peer.to_string(),
        "-interface".to_string(),
        interface.to_string(),
    ];
    let cmd = format!("route {}", args.join(" "));
    tracing::debug!(%cmd, "binding interface host route");

    let status = Command::new("route")
        .args(&args)
        .status()
        .await
        .map_err(|source| RouteError::Spawn { cmd: cmd.clone(), source })?;

    if !status.success() {
        return Err(RouteError::CommandFailed { cmd, status });
    }
    Ok(())
}

pub async fn get_default_gateway() -> Result<Ipv4Addr, RouteError> {
    let cmd = "netstat -rn -f inet".to_string();
    let output = Command::new("netstat")
        .args(["-rn", "-f", "inet"])
        .output()
        .await
        .map_err(|source| RouteError::Spawn { cmd: cmd.clone(), source })?;

    if !output.status.success() {
        return Err(RouteError::CommandFailed { cmd, status: output.status });
    }

    let text = String::from_utf8_lossy(&output.stdout);
    parse_default_gateway(&text)
}

fn parse_default_gateway(text: &str) -> Result<Ipv4Addr, RouteError> {
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let Some(dest) = fields.next() else { continue };
        if dest != "default" {
            continue;
        }
        if let Some(gateway) = fields.next() {
            if let Ok(addr) = gateway.parse() {
                return Ok(addr);
            }
        }
    }
    Err(RouteError::NoDefaultRoute("netstat -rn -f inet"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_route_matches_reference_vector() {
        let cidr = Cidr::new(Ipv4Addr::new(10, 0, 0, 0), 32);
        let gateway = Ipv4Addr::new(166, 111, 8, 1);
        let args = route_args(&cidr, gateway, false);
        assert_eq!(
            args.join(" "),
            "add -net 10.0.0.0 166.111.8.1 255.255.255.255"
        );
    }

    #[test]
    fn delete_route_matches_reference_vector() {
        let cidr = Cidr::new(Ipv4Addr::new(10, 0, 0, 0), 32);
        let gateway = Ipv4Addr::new(166, 111, 8, 1);
        let args = route_args(&cidr, gateway, true);
        assert_eq!(
            args.join(" "),
            "delete -net 10.0.0.0 166.111.8.1 255.255.255.255"
        );
    }

    #[test]
    fn parses_default_gateway_from_netstat() {
        let text = "Routing tables\n\nInternet:\nDestination Gateway Flags Refs Use Netif\ndefault 192.168.1.1 UGSc 10 0 en0\n10.0.0/24 link#4 UCS 2 0 en0\n";
        assert_eq!(
            parse_default_gateway(text).unwrap(),
            Ipv4Addr::new(192, 168, 1, 1)
        );
    }
}
