//! Typed configuration for the tunnel: the single JSON document the
//! daemon is started with, covering the tunnel's own addresses, the wire
//! transports and obfuscators to chain, and the route rules to install.
//!
//! Each transport/obfuscator entry is an enumerated, typed variant picked
//! by its `name` field rather than an untyped options blob cast at the
//! point of use, so an unknown name or malformed option set is rejected
//! while parsing the file, before anything has been opened.

mod errors;
mod schema;

pub use errors::ConfigError;
pub use schema::{
    Config, DnsOptions, ObfsConfig, RouteConfig, TunnelConfig, UdpOptions, WireConfig, XmppOptions,
    XorOptions,
};

use std::path::Path;

/// Reads and validates a configuration file from disk.
pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reports_a_read_error_for_a_missing_file() {
        let err = load("/nonexistent/path/to/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_parses_and_validates_a_real_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("config-crate-test-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{
                "tunnel": {"server": "10.42.0.1", "client": "10.42.0.2"},
                "wires": [{"name": "udp", "options": {"server_addr": "1.2.3.4:9000"}}]
            }"#,
        )
        .unwrap();
        let config = load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.tunnel.server, std::net::Ipv4Addr::new(10, 42, 0, 1));
    }
}
