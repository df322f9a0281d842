//! Error types for configuration and server lifecycle.

/// Error type for configuration resolution.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TRANSPORT_MODE '{0}' (expected stdio, http or streamable-http)")]
    InvalidTransportMode(String),

    #[error("Invalid TRANSPORT_PORT '{0}'")]
    InvalidPort(String),

    #[error("Invalid MCP_SESSION_MODE '{0}' (expected stateful or stateless)")]
    InvalidSessionMode(String),

    #[error("Invalid MCP_CORS_MODE '{0}' (expected strict, development or disabled)")]
    InvalidCorsMode(String),

    #[error("Invalid MCP_ENDPOINT '{0}' (must start with '/')")]
    InvalidEndpoint(String),

    #[error("Invalid {name} '{value}' (expected whole seconds)")]
    InvalidInterval { name: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Error type for the streamable-HTTP server lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read local address: {0}")]
    LocalAddr(std::io::Error),

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

impl ServerError {
    pub(crate) fn bind(addr: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}
