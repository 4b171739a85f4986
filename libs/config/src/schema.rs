use std::net::Ipv4Addr;

use serde::Deserialize;

use crate::errors::ConfigError;

/// A fully parsed, validated configuration tree. Load via [`crate::load`].
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub tunnel: TunnelConfig,
    pub wires: Vec<WireConfig>,
    #[serde(default)]
    pub obfs: Vec<ObfsConfig>,
    #[serde(default)]
    pub route: RouteConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for wire in &self.wires {
            if let WireConfig::Dns(opts) = wire {
                opts.validate_base_domain()?;
            }
        }
        for rule in self.route.wire.iter().chain(self.route.vpn.iter()) {
            rule.parse::<route::Cidr>()
                .map_err(|reason| ConfigError::InvalidCidr { cidr: rule.clone(), reason })?;
        }
        Ok(())
    }

    pub fn wire_rules(&self) -> Result<Vec<route::Cidr>, ConfigError> {
        parse_cidrs(&self.route.wire)
    }

    pub fn vpn_rules(&self) -> Result<Vec<route::Cidr>, ConfigError> {
        parse_cidrs(&self.route.vpn)
    }
}

fn parse_cidrs(rules: &[String]) -> Result<Vec<route::Cidr>, ConfigError> {
    rules
        .iter()
        .map(|rule| {
            rule.parse::<route::Cidr>()
                .map_err(|reason| ConfigError::InvalidCidr { cidr: rule.clone(), reason })
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    pub server: Ipv4Addr,
    pub client: Ipv4Addr,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteConfig {
    #[serde(default)]
    pub wire: Vec<String>,
    #[serde(default)]
    pub vpn: Vec<String>,
}

/// A single wire transport entry, dispatched by its `name` discriminator.
/// Unlike the original's untyped `(name, json.RawMessage)` pair, an
/// unrecognized `name` is rejected right here at parse time rather than
/// surfacing later as an `unknown transport` error from `wire::open`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", content = "options", rename_all = "lowercase")]
pub enum WireConfig {
    Udp(UdpOptions),
    Xmpp(XmppOptions),
    Dns(DnsOptions),
}

impl WireConfig {
    pub fn name(&self) -> &'static str {
        match self {
            WireConfig::Udp(_) => "udp",
            WireConfig::Xmpp(_) => "xmpp",
            WireConfig::Dns(_) => "dns",
        }
    }

    /// Re-serializes this variant's options back to the `RawValue` shape
    /// `wire::open`/`dns_transport::open` expect, so the typed config layer
    /// and the untyped transport-opening layer can still meet in the
    /// middle without `wire`/`dns-transport` depending on this crate.
    pub fn options_json(&self) -> serde_json::Result<Box<serde_json::value::RawValue>> {
        let text = match self {
            WireConfig::Udp(opts) => serde_json::to_string(opts)?,
            WireConfig::Xmpp(opts) => serde_json::to_string(opts)?,
            WireConfig::Dns(opts) => serde_json::to_string(opts)?,
        };
        serde_json::value::RawValue::from_string(text)
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UdpOptions {
    pub server_addr: String,
    pub client_addr: Option<String>,
    pub mtu: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct XmppOptions {
    pub mtu: Option<usize>,
    pub host: Option<String>,
    pub server_username: Option<String>,
    pub server_password: Option<String>,
    pub client_username: Option<String>,
    pub client_password: Option<String>,
}

/// DNS wire transport options. A single shape covers both client and
/// server roles (the role itself is decided by `is_server` at open time,
/// not by a separate config section), mirroring how the original's
/// untyped options map was read differently depending on which side was
/// starting up.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DnsOptions {
    pub base_domain: String,
    pub port: Option<u16>,
    pub server_addr: Option<String>,
    pub keepalive_interval_ms: Option<u64>,
    pub mtu: Option<usize>,
}

impl DnsOptions {
    /// The original never bounded `base_domain`'s length; a base domain
    /// long enough to leave less than 16 payload bytes per query name
    /// would make every upstream fragment absurdly chatty, so it's
    /// rejected up front instead of silently producing a degenerate MTU.
    fn validate_base_domain(&self) -> Result<(), ConfigError> {
        let codec = dns_proto::UpstreamCodec::new(&self.base_domain);
        if codec.max_length() < 16 {
            return Err(ConfigError::BaseDomainTooLong(self.base_domain.clone()));
        }
        Ok(())
    }

    /// Builds the listen address a server-side open expects, from `port`
    /// (defaulting to 53) bound on all interfaces.
    pub fn server_options_json(&self) -> serde_json::Result<Box<serde_json::value::RawValue>> {
        let listen_addr = format!("0.0.0.0:{}", self.port.unwrap_or(53));
        #[derive(serde::Serialize)]
        struct ServerOptions<'a> {
            listen_addr: String,
            base_domain: &'a str,
            mtu: Option<usize>,
        }
        let text = serde_json::to_string(&ServerOptions {
            listen_addr,
            base_domain: &self.base_domain,
            mtu: self.mtu,
        })?;
        serde_json::value::RawValue::from_string(text)
    }

    pub fn client_options_json(&self) -> serde_json::Result<Box<serde_json::value::RawValue>> {
        serde_json::value::RawValue::from_string(serde_json::to_string(self)?)
    }
}

/// A single obfuscator entry, dispatched by its `name` discriminator.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", content = "options", rename_all = "lowercase")]
pub enum ObfsConfig {
    Xor(XorOptions),
}

impl ObfsConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ObfsConfig::Xor(_) => "xor",
        }
    }

    pub fn options_json(&self) -> serde_json::Result<Box<serde_json::value::RawValue>> {
        let text = match self {
            ObfsConfig::Xor(opts) => serde_json::to_string(opts)?,
        };
        serde_json::value::RawValue::from_string(text)
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct XorOptions {
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_a_full_configuration() {
        let cfg = parse(
            r#"{
                "tunnel": {"server": "10.42.0.1", "client": "10.42.0.2"},
                "wires": [
                    {"name": "udp", "options": {"server_addr": "1.2.3.4:9000"}},
                    {"name": "dns", "options": {"base_domain": "t.example.com"}}
                ],
                "obfs": [{"name": "xor", "options": {"key": "swordfish"}}],
                "route": {"wire": ["10.0.0.0/32"], "vpn": ["0.0.0.0/0"]}
            }"#,
        );
        assert_eq!(cfg.wires.len(), 2);
        assert_eq!(cfg.wires[0].name(), "udp");
        assert_eq!(cfg.wires[1].name(), "dns");
        assert_eq!(cfg.obfs[0].name(), "xor");
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_wire_name_is_rejected_at_parse_time() {
        let result: Result<Config, _> = serde_json::from_str(
            r#"{
                "tunnel": {"server": "10.42.0.1", "client": "10.42.0.2"},
                "wires": [{"name": "quic", "options": {}}]
            }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn route_defaults_to_empty_when_omitted() {
        let cfg = parse(
            r#"{
                "tunnel": {"server": "10.42.0.1", "client": "10.42.0.2"},
                "wires": [{"name": "udp", "options": {"server_addr": "1.2.3.4:9000"}}]
            }"#,
        );
        assert!(cfg.route.wire.is_empty());
        assert!(cfg.route.vpn.is_empty());
    }

    #[test]
    fn invalid_cidr_fails_validation() {
        let cfg = parse(
            r#"{
                "tunnel": {"server": "10.42.0.1", "client": "10.42.0.2"},
                "wires": [{"name": "udp", "options": {"server_addr": "1.2.3.4:9000"}}],
                "route": {"wire": ["not-a-cidr"], "vpn": []}
            }"#,
        );
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidCidr { .. })));
    }

    #[test]
    fn rejects_a_base_domain_with_no_payload_room() {
        let opts = DnsOptions {
            base_domain: "a".repeat(240),
            port: None,
            server_addr: None,
            keepalive_interval_ms: None,
            mtu: None,
        };
        assert!(matches!(
            opts.validate_base_domain(),
            Err(ConfigError::BaseDomainTooLong(_))
        ));
    }
}
