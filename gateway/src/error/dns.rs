//! DNS-layer errors. Unlike `ClusterError`, these map directly onto DNS
//! response codes — see `crate::dns::server`'s panic-recovery wrapper.

#[derive(Debug)]
pub enum DnsError {
    /// A handler panicked. Recovered at the outer boundary and turned into
    /// SERVFAIL, per spec.md §7 `ServerInternal`.
    HandlerPanicked(String),
    /// The external recursion pipeline exhausted every resolver without a
    /// usable reply.
    RecursionExhausted,
    /// External resolution was attempted while disabled in configuration.
    ExternalResolutionDisabled,
}

impl std::fmt::Display for DnsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HandlerPanicked(msg) => write!(f, "handler panicked: {}", msg),
            Self::RecursionExhausted => write!(f, "no upstream resolver produced a reply"),
            Self::ExternalResolutionDisabled => write!(f, "external resolution is disabled"),
        }
    }
}

impl std::error::Error for DnsError {}
