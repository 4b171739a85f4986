use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in prefix-length form, as read out of a routing rule
/// configuration (e.g. `10.0.0.0/32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Cidr {
    pub const fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        Self { network, prefix_len }
    }

    pub fn netmask(&self) -> Ipv4Addr {
        if self.prefix_len == 0 {
            return Ipv4Addr::new(0, 0, 0, 0);
        }
        let bits = u32::MAX << (32 - self.prefix_len as u32);
        Ipv4Addr::from(bits)
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Cidr {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix_len) = s.split_once('/').ok_or("missing `/prefix_len`")?;
        let network: Ipv4Addr = addr.parse().map_err(|_| "not an IPv4 address")?;
        let prefix_len: u8 = prefix_len.parse().map_err(|_| "prefix length is not a number")?;
        if prefix_len > 32 {
            return Err("prefix length out of range (0-32)");
        }
        Ok(Self { network, prefix_len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netmask_for_a_host_route() {
        let cidr = Cidr::new(Ipv4Addr::new(10, 0, 0, 0), 32);
        assert_eq!(cidr.netmask(), Ipv4Addr::new(255, 255, 255, 255));
    }

    #[test]
    fn netmask_for_a_slash_24() {
        let cidr = Cidr::new(Ipv4Addr::new(10, 0, 0, 0), 24);
        assert_eq!(cidr.netmask(), Ipv4Addr::new(255, 255, 255, 0));
    }

    #[test]
    fn parses_a_valid_cidr_string() {
        let cidr: Cidr = "10.0.0.0/32".parse().unwrap();
        assert_eq!(cidr, Cidr::new(Ipv4Addr::new(10, 0, 0, 0), 32));
    }

    #[test]
    fn rejects_an_out_of_range_prefix() {
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
    }

    #[test]
    fn rejects_a_string_with_no_slash() {
        assert!("10.0.0.0".parse::<Cidr>().is_err());
    }
}
