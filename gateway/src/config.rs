//! Read-only (post-startup) configuration, loaded from a JSON file and
//! merged with CLI overrides, then validated once at process start.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Deserialize;

use crate::error::config::ConfigError;
use crate::mangle::HostNameSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpSource {
    Host,
    Netinfo,
    Docker,
    Mesos,
    Autoip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSpecKind {
    Rfc952,
    Rfc1123,
}

impl HostSpecKind {
    pub fn spec(self) -> HostNameSpec {
        match self {
            HostSpecKind::Rfc952 => HostNameSpec::rfc952(),
            HostSpecKind::Rfc1123 => HostNameSpec::rfc1123(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SoaConfig {
    pub mname: String,
    pub rname: String,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minttl: u32,
}

impl Default for SoaConfig {
    fn default() -> Self {
        SoaConfig {
            mname: "ns1.mesos.".into(),
            rname: "root.ns1.mesos.".into(),
            refresh: 60,
            retry: 600,
            expire: 86400,
            minttl: 60,
        }
    }
}

/// JSON-file shape. Field names follow spec.md §6's configuration-file list
/// verbatim; `Config::from_file` maps this into the runtime `Config`.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawConfig {
    #[serde(rename = "Masters")]
    masters: Vec<String>,
    #[serde(rename = "Zk")]
    zk: Option<String>,
    #[serde(rename = "RefreshSeconds")]
    refresh_seconds: u64,
    #[serde(rename = "TTL")]
    ttl: u32,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Domain")]
    domain: String,
    #[serde(rename = "Resolvers")]
    resolvers: Vec<SocketAddr>,
    #[serde(rename = "Timeout")]
    timeout_secs: u64,
    #[serde(rename = "SOAMname")]
    soa_mname: Option<String>,
    #[serde(rename = "SOARname")]
    soa_rname: Option<String>,
    #[serde(rename = "SOARefresh")]
    soa_refresh: Option<u32>,
    #[serde(rename = "SOARetry")]
    soa_retry: Option<u32>,
    #[serde(rename = "SOAExpire")]
    soa_expire: Option<u32>,
    #[serde(rename = "SOAMinttl")]
    soa_minttl: Option<u32>,
    #[serde(rename = "Listener")]
    listener: IpAddr,
    #[serde(rename = "HTTPPort")]
    http_port: u16,
    #[serde(rename = "DnsOn")]
    dns_on: bool,
    #[serde(rename = "HttpOn")]
    http_on: bool,
    #[serde(rename = "ExternalOn")]
    external_on: bool,
    #[serde(rename = "RecurseOn")]
    recurse_on: bool,
    #[serde(rename = "EnforceRFC952")]
    enforce_rfc952: bool,
    #[serde(rename = "IPSources")]
    ip_sources: Vec<IpSource>,
    #[serde(rename = "ZkDetectionTimeout")]
    zk_detection_timeout_secs: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        let soa = SoaConfig::default();
        RawConfig {
            masters: Vec::new(),
            zk: None,
            refresh_seconds: 60,
            ttl: 60,
            port: 53,
            domain: "mesos".into(),
            resolvers: Vec::new(),
            timeout_secs: 5,
            soa_mname: Some(soa.mname),
            soa_rname: Some(soa.rname),
            soa_refresh: Some(soa.refresh),
            soa_retry: Some(soa.retry),
            soa_expire: Some(soa.expire),
            soa_minttl: Some(soa.minttl),
            listener: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            http_port: 8123,
            dns_on: true,
            http_on: true,
            external_on: true,
            recurse_on: true,
            enforce_rfc952: true,
            ip_sources: vec![IpSource::Netinfo, IpSource::Mesos, IpSource::Host],
            zk_detection_timeout_secs: 30,
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub domain: String,
    pub listener: IpAddr,
    pub dns_port: u16,
    pub http_port: u16,
    pub ttl: u32,
    pub soa: SoaConfig,
    pub serial: AtomicU32,
    pub refresh_seconds: u64,
    pub resolvers: Vec<SocketAddr>,
    pub masters: Vec<String>,
    pub zk: Option<String>,
    pub ip_sources: Vec<IpSource>,
    pub host_spec: HostSpecKind,
    pub recurse_on: bool,
    pub external_on: bool,
    pub dns_on: bool,
    pub http_on: bool,
    pub timeout: Duration,
    pub zk_detection_timeout: Duration,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let raw: RawConfig = serde_json::from_str(&text)?;
        let config = Config::from_raw(raw);
        config.validate()?;
        Ok(config)
    }

    /// The zone's self-NS name, used for listener records (§4.4 step 5).
    pub fn self_ns_name(&self) -> String {
        format!("ns1.{}.", self.domain)
    }

    fn from_raw(raw: RawConfig) -> Config {
        let soa = SoaConfig {
            mname: raw.soa_mname.unwrap_or_else(|| SoaConfig::default().mname),
            rname: raw.soa_rname.unwrap_or_else(|| SoaConfig::default().rname),
            refresh: raw.soa_refresh.unwrap_or(60),
            retry: raw.soa_retry.unwrap_or(600),
            expire: raw.soa_expire.unwrap_or(86400),
            minttl: raw.soa_minttl.unwrap_or(60),
        };
        Config {
            domain: raw.domain,
            listener: raw.listener,
            dns_port: raw.port,
            http_port: raw.http_port,
            ttl: raw.ttl,
            soa,
            serial: AtomicU32::new(0),
            refresh_seconds: raw.refresh_seconds,
            resolvers: raw.resolvers,
            masters: raw.masters,
            zk: raw.zk,
            ip_sources: raw.ip_sources,
            host_spec: if raw.enforce_rfc952 {
                HostSpecKind::Rfc952
            } else {
                HostSpecKind::Rfc1123
            },
            recurse_on: raw.recurse_on,
            external_on: raw.external_on,
            dns_on: raw.dns_on,
            http_on: raw.http_on,
            timeout: Duration::from_secs(raw.timeout_secs.max(1)),
            zk_detection_timeout: Duration::from_secs(raw.zk_detection_timeout_secs.max(1)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ip_sources.is_empty() {
            return Err(ConfigError::EmptyIpSources);
        }

        let mut seen = HashSet::new();
        for resolver in &self.resolvers {
            if !seen.insert(*resolver) {
                return Err(ConfigError::DuplicateResolver(*resolver));
            }
        }

        for master in &self.masters {
            if parse_host_port(master).is_none() {
                return Err(ConfigError::MalformedMaster(master.clone()));
            }
        }

        if !self.dns_on && !self.http_on {
            return Err(ConfigError::NoListenerEnabled);
        }

        if self.masters.is_empty() && self.zk.is_none() {
            return Err(ConfigError::NoMasterSource);
        }

        Ok(())
    }

    pub fn bump_serial(&self, now_unix: u32) {
        self.serial.store(now_unix, Ordering::SeqCst);
    }

    pub fn current_serial(&self) -> u32 {
        self.serial.load(Ordering::SeqCst)
    }
}

/// Parse a `"host:port"` pair, validating the port and leaving the host
/// unvalidated (it may be a hostname, resolved later).
pub fn parse_host_port(s: &str) -> Option<(String, u16)> {
    let (host, port) = s.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    Some((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::from_raw(RawConfig {
            masters: vec!["8.8.8.8:9".into()],
            ..Default::default()
        })
    }

    #[test]
    fn validates_a_reasonable_default() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_empty_ip_sources() {
        let mut config = base_config();
        config.ip_sources.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyIpSources)
        ));
    }

    #[test]
    fn rejects_duplicate_resolvers() {
        let mut config = base_config();
        let addr: SocketAddr = "1.1.1.1:53".parse().unwrap();
        config.resolvers = vec![addr, addr];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateResolver(_))
        ));
    }

    #[test]
    fn rejects_malformed_master() {
        let mut config = base_config();
        config.masters = vec!["not-a-host-port".into()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MalformedMaster(_))
        ));
    }

    #[test]
    fn rejects_when_neither_dns_nor_http_enabled() {
        let mut config = base_config();
        config.dns_on = false;
        config.http_on = false;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoListenerEnabled)
        ));
    }

    #[test]
    fn rejects_when_no_master_source() {
        let mut config = base_config();
        config.masters.clear();
        config.zk = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoMasterSource)
        ));
    }

    #[test]
    fn parses_host_port() {
        assert_eq!(
            parse_host_port("8.8.8.8:9"),
            Some(("8.8.8.8".into(), 9))
        );
        assert_eq!(parse_host_port("no-port"), None);
    }
}
