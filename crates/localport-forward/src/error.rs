use thiserror::Error;

/// Errors surfaced by adapters and the service manager. Per-service errors
/// are isolated: callers log them and mark the offending service FAILED
/// without tearing anything else down.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("port {port} is already in use")]
    PortUnavailable { port: u16 },

    #[error("failed to spawn {technology} forwarder: {message}")]
    AdapterSpawn {
        technology: &'static str,
        message: String,
    },

    #[error("{technology} forwarder rejected the forward: {message}")]
    AdapterTransport {
        technology: &'static str,
        message: String,
    },

    #[error("invalid connection_info: {0}")]
    InvalidArguments(String),

    #[error("no adapter registered for technology '{0}'")]
    UnknownTechnology(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForwardError {
    /// Short machine-usable kind tag for structured log context.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::PortUnavailable { .. } => "port_unavailable",
            ForwardError::AdapterSpawn { .. } => "adapter_spawn",
            ForwardError::AdapterTransport { .. } => "adapter_transport",
            ForwardError::InvalidArguments(_) => "invalid_arguments",
            ForwardError::UnknownTechnology(_) => "unknown_technology",
            ForwardError::Io(_) => "io",
        }
    }
}
