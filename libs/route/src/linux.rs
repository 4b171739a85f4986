//! Linux route manipulation via `ip route`, and default-gateway discovery
//! via `ip -4 route show`. No netlink: the original shelled out to the
//! platform's own route tool, and so do we.

use std::net::Ipv4Addr;

use tokio::process::Command;

use crate::cidr::Cidr;
use crate::errors::RouteError;

pub fn route_args(cidr: &Cidr, gateway: Ipv4Addr, delete: bool) -> Vec<String> {
    let verb = if delete { "del" } else { "add" };
    vec![
        "route".to_string(),
        verb.to_string(),
        cidr.to_string(),
        "via".to_string(),
        gateway.to_string(),
    ]
}

pub async fn run_route(cidr: &Cidr, gateway: Ipv4Addr, delete: bool) -> Result<(), RouteError> {
    let args = route_args(cidr, gateway, delete);
    let cmd = format!("ip {}", args.join(" "));
    tracing::debug!(%cmd, "running route command");

    let status = Command::new("ip")
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
    let cmd = "ip -4 route show".to_string();
    let output = Command::new("ip")
        .args(["-4", "route", "show"])
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
        if fields.next() != Some("default") {
            continue;
        }
        let mut fields = line.split_whitespace();
        while let Some(field) = fields.next() {
            if field == "via" {
                if let Some(addr) = fields.next() {
                    if let Ok(addr) = addr.parse() {
                        return Ok(addr);
                    }
                }
            }
        }
    }
    Err(RouteError::NoDefaultRoute("ip -4 route show"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_route_matches_reference_vector() {
        let cidr = Cidr::new(Ipv4Addr::new(10, 0, 0, 0), 32);
        let gateway = Ipv4Addr::new(166, 111, 8, 1);
        let args = route_args(&cidr, gateway, false);
        assert_eq!(args.join(" "), "route add 10.0.0.0/32 via 166.111.8.1");
    }

    #[test]
    fn delete_route_matches_reference_vector() {
        let cidr = Cidr::new(Ipv4Addr::new(10, 0, 0, 0), 32);
        let gateway = Ipv4Addr::new(166, 111, 8, 1);
        let args = route_args(&cidr, gateway, true);
        assert_eq!(args.join(" "), "route del 10.0.0.0/32 via 166.111.8.1");
    }

    #[test]
    fn parses_default_gateway_from_ip_route_show() {
        let text = "default via 192.168.1.1 dev eth0 \n10.0.0.0/24 dev eth0 proto kernel scope link src 10.0.0.5\n";
        assert_eq!(
            parse_default_gateway(text).unwrap(),
            Ipv4Addr::new(192, 168, 1, 1)
        );
    }

    #[test]
    fn missing_default_route_is_an_error() {
        let text = "10.0.0.0/24 dev eth0 proto kernel scope link src 10.0.0.5\n";
        assert!(matches!(
            parse_default_gateway(text),
            Err(RouteError::NoDefaultRoute(_))
        ));
    }
}
