//! Errors from fetching and parsing the cluster controller's state document.

/// Transient failures talking to a master. The master-state loader tries
/// the next candidate on any of these rather than propagating immediately;
/// this type only escapes the loader once every candidate is exhausted.
#[derive(Debug)]
pub enum ClusterError {
    /// The HTTP request itself failed (connect/read/write timeout, refused
    /// connection, TLS error, ...).
    CannotConnect(String),
    /// The body wasn't valid JSON, or didn't match the expected shape.
    MalformedState(String),
    /// Every candidate master (ZK leader plus all fallbacks) failed, or
    /// returned a state document with an empty `leader` field.
    NoMasterReachable,
}

impl std::fmt::Display for ClusterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CannotConnect(msg) => write!(f, "cannot connect: {}", msg),
            Self::MalformedState(msg) => write!(f, "malformed state.json: {}", msg),
            Self::NoMasterReachable => write!(f, "no configured master was reachable"),
        }
    }
}

impl std::error::Error for ClusterError {}

impl From<reqwest::Error> for ClusterError {
    fn from(err: reqwest::Error) -> Self {
        ClusterError::CannotConnect(err.to_string())
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::MalformedState(err.to_string())
    }
}
