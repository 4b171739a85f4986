use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid tunnel address: {0}")]
    InvalidTunnelAddress(String),
    #[error("invalid route CIDR {cidr:?}: {reason}")]
    InvalidCidr { cidr: String, reason: &'static str },
    #[error("base domain {0:?} cannot carry at least 16 payload bytes per query name")]
    BaseDomainTooLong(String),
}
