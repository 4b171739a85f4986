use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("failed to open wire transport: {0}")]
    Transport(#[from] wire::TransportError),
    #[error("failed to open obfuscator: {0}")]
    Obfs(#[from] obfs::ObfsError),
    #[error("failed to open TUN device: {0}")]
    Tun(#[from] tun::TunError),
    #[error("failed to install routes: {0}")]
    Route(#[from] route::RouteError),
    #[error("failed to serialize transport/obfuscator options: {0}")]
    OptionsJson(#[from] serde_json::Error),
    #[error("at least one wire transport must be configured")]
    NoWireTransports,
}
