use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to run `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{cmd}` exited with {status}")]
    CommandFailed { cmd: String, status: std::process::ExitStatus },
    #[error("could not find a default route in `{0}` output")]
    NoDefaultRoute(&'static str),
}
