//! Startup configuration errors. All variants are fatal: the process logs
//! and exits rather than attempting to run with an invalid configuration.

#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read or JSON-parse the configuration file.
    Invalid(String),
    /// `ip_sources` was empty.
    EmptyIpSources,
    /// The same resolver address appeared more than once in `resolvers`.
    DuplicateResolver(std::net::SocketAddr),
    /// A `masters` entry wasn't a parseable `host:port` pair.
    MalformedMaster(String),
    /// Neither `dns_on` nor `http_on` was set.
    NoListenerEnabled,
    /// Neither `masters` nor `zk` was configured.
    NoMasterSource,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
            Self::EmptyIpSources => write!(f, "ip_sources must not be empty"),
            Self::DuplicateResolver(addr) => write!(f, "duplicate resolver address: {}", addr),
            Self::MalformedMaster(entry) => write!(f, "malformed master host:port: {}", entry),
            Self::NoListenerEnabled => write!(f, "neither dns_on nor http_on is set"),
            Self::NoMasterSource => write!(f, "neither masters nor zk is configured"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}
