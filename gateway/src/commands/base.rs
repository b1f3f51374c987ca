//! CLI entrypoint and the `serve` orchestration that starts every
//! component, mirroring `shelter::commands::base::Cli`'s clap-derived
//! struct plus per-subsystem `handle` methods, collapsed here into one
//! cooperating process instead of independent transports.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::config::{parse_host_port, Config};
use crate::dns::recursion::{
    DefaultRecurser, ErrorLogging, Exchanger, Instrumentation, Recursion, TcpExchanger,
    UdpExchanger, WhilePredicate,
};
use crate::dns::server::GatewayHandler;
use crate::records::RecordSet;

/// Top-level CLI: loads the JSON config file and starts the gateway.
#[derive(Debug, clap::Parser)]
#[command(version, about = "DNS-based service discovery gateway for cluster workloads")]
pub struct Cli {
    /// Path to the gateway's JSON configuration file.
    #[arg(long = "config", short = 'c', default_value = "gateway.json")]
    pub config: PathBuf,
}

impl Cli {
    pub async fn handle(self) -> std::io::Result<()> {
        let config = Config::from_file(&self.config).map_err(|err| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string())
        })?;
        serve(Arc::new(config)).await
    }
}

/// Builds a single `Udp -> Tcp` exchanger against `server`, falling through
/// to TCP when the UDP reply is truncated (RFC 5966), per spec.md §4.9.
fn udp_then_tcp(server: SocketAddr, timeout: Duration) -> Box<dyn Exchanger> {
    Box::new(WhilePredicate {
        exchangers: vec![
            Box::new(UdpExchanger { server, timeout }),
            Box::new(TcpExchanger { server, timeout }),
        ],
        keep_going: crate::dns::recursion::was_truncated,
    })
}

/// Composes the full external-recursion exchanger chain from `config`:
/// `udp_then_tcp` against the first configured resolver, optionally wrapped
/// in bounded SOA-referral recursion, then error logging and instrumentation.
fn build_recursion_pipeline(config: &Config) -> Option<Arc<dyn Exchanger>> {
    let first = *config.resolvers.first()?;

    let base = udp_then_tcp(first, config.timeout);
    let with_recursion: Box<dyn Exchanger> = if config.recurse_on {
        let timeout = config.timeout;
        Box::new(Recursion {
            inner: base,
            max_rounds: 3,
            recurser: Box::new(DefaultRecurser),
            build_exchanger: Box::new(move |addr| udp_then_tcp(addr, timeout)),
            timeout,
        })
    } else {
        base
    };

    let with_logging: Box<dyn Exchanger> = Box::new(ErrorLogging { inner: with_recursion });
    Some(Arc::new(Instrumentation::wrap(with_logging)))
}

/// Starts every component: the refresh driver (which performs the first
/// state fetch and record generation before anything else starts serving),
/// the DNS server, and the HTTP API. Runs until any component exits.
pub async fn serve(config: Arc<Config>) -> std::io::Result<()> {
    log::info!(
        "Starting gateway for domain '{}' (dns:{} http:{})",
        config.domain,
        config.dns_port,
        config.http_port
    );

    let live = Arc::new(ArcSwap::from_pointee(RecordSet::new()));
    let client = reqwest::Client::new();

    // No concrete `CoordinationService` is wired up here (see DESIGN.md's
    // Open Question decisions), so `leader_tx` is dropped immediately and
    // `leader_rx` never fires; `refresh::spawn`'s leader-forwarding task
    // exits on its first poll and the periodic timer alone drives reloads.
    let (leader_tx, leader_rx) = watch::channel(None);
    drop(leader_tx);

    if let Some(zk) = &config.zk {
        log::warn!(
            "Zk coordination service '{}' configured, but no concrete coordination client is \
             wired in this build; falling back to the static masters list for leader discovery.",
            zk
        );
    }

    let (trigger, refresh_handle) =
        crate::refresh::spawn(config.clone(), live.clone(), client, leader_rx);
    trigger.try_reload();

    let recursion = build_recursion_pipeline(&config);
    if config.external_on && recursion.is_none() {
        log::warn!("ExternalOn is set but no resolvers are configured; external queries will be refused");
    }

    let handler = GatewayHandler::new(config.clone(), live.clone(), recursion);

    let dns_task = {
        let config = config.clone();
        tokio::spawn(async move {
            if !config.dns_on {
                log::info!("DnsOn is false, DNS listener disabled");
                return Ok(());
            }
            crate::dns::server::serve(handler, config.listener, config.dns_port, config.timeout)
                .await
        })
    };

    let http_task = {
        let config = config.clone();
        let live = live.clone();
        tokio::spawn(async move {
            if !config.http_on {
                log::info!("HttpOn is false, HTTP API disabled");
                return Ok(());
            }
            crate::http::serve(config, live).await
        })
    };

    let outcome = tokio::select! {
        result = dns_task => result,
        result = http_task => result,
    };
    refresh_handle.abort();

    match outcome {
        Ok(inner) => inner,
        Err(join_err) => Err(std::io::Error::new(std::io::ErrorKind::Other, join_err.to_string())),
    }
}

/// Parses a fallback master list from a comma-separated CLI override,
/// validating each entry the same way `Config::validate` does.
pub fn parse_master_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter(|entry| {
            let valid = parse_host_port(entry).is_some();
            if !valid {
                log::error!("ignoring malformed master override '{}'", entry);
            }
            valid
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_master_list_skips_malformed_entries() {
        let parsed = parse_master_list("8.8.8.8:9, not-a-host-port , 9.9.9.9:10");
        assert_eq!(parsed, vec!["8.8.8.8:9".to_string(), "9.9.9.9:10".to_string()]);
    }
}
