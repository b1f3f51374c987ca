//! Refresh driver (spec.md §4.7): combines leader signals and a periodic
//! timer into a single-inflight reload request, and owns the swap of the
//! live [`RecordSet`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::master;
use crate::records::{self, RecordSet};

/// Request a reload without blocking. A full channel means a reload is
/// already queued, so the request is simply dropped — at most one reload
/// is ever in flight (§4.7, §5).
#[derive(Clone)]
pub struct ReloadTrigger(mpsc::Sender<()>);

impl ReloadTrigger {
    pub fn try_reload(&self) {
        if self.0.try_send(()).is_err() {
            log::debug!("reload already queued, dropping duplicate request");
        }
    }
}

/// Spawn the refresh worker. Returns a [`ReloadTrigger`] for external
/// callers (the periodic timer task and the leader watcher) plus the
/// `JoinHandle` for the worker task itself.
pub fn spawn(
    config: Arc<Config>,
    live: Arc<ArcSwap<RecordSet>>,
    client: reqwest::Client,
    mut leader_changed: watch::Receiver<Option<String>>,
) -> (ReloadTrigger, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(1);
    let trigger = ReloadTrigger(tx);
    let period = Duration::from_secs(config.refresh_seconds.max(1));

    let handle = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            run_reload_cycle(&config, &live, &client).await;
        }
    });

    let periodic_trigger = trigger.clone();
    tokio::spawn(periodic_timer(periodic_trigger, period));

    let leader_trigger = trigger.clone();
    tokio::spawn(async move {
        while leader_changed.changed().await.is_ok() {
            leader_trigger.try_reload();
        }
    });

    (trigger, handle)
}

async fn periodic_timer(trigger: ReloadTrigger, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // first tick fires immediately; skip it
    loop {
        interval.tick().await;
        trigger.try_reload();
    }
}

/// One reload cycle: load state, generate records, swap, bump serial. A
/// panic anywhere in the cycle is caught and logged; the worker keeps
/// running on the next request (§4.7).
async fn run_reload_cycle(config: &Config, live: &ArcSwap<RecordSet>, client: &reqwest::Client) {
    let zk_leader = config.zk.clone();
    let fallbacks = config.masters.clone();
    let timeout = config.timeout;

    let snapshot = match master::load_state(client, zk_leader.as_deref(), &fallbacks, timeout).await
    {
        Ok(snapshot) => snapshot,
        Err(err) => {
            log::warn!("reload cycle: master-state load failed: {}", err);
            return;
        }
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| records::generate(&snapshot, config)));
    let record_set = match outcome {
        Ok(record_set) => record_set,
        Err(_) => {
            log::error!("reload cycle: record generator panicked");
            return;
        }
    };

    live.store(Arc::new(record_set));
    let now_unix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    config.bump_serial(now_unix);
    log::info!("reload cycle complete, serial={}", config.current_serial());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostSpecKind, IpSource, SoaConfig};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicU32;

    fn test_config() -> Config {
        Config {
            domain: "mesos".into(),
            listener: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            dns_port: 53,
            http_port: 8123,
            ttl: 60,
            soa: SoaConfig::default(),
            serial: AtomicU32::new(0),
            refresh_seconds: 60,
            resolvers: Vec::new(),
            masters: vec![],
            zk: None,
            ip_sources: vec![IpSource::Netinfo, IpSource::Mesos, IpSource::Host],
            host_spec: HostSpecKind::Rfc952,
            recurse_on: true,
            external_on: true,
            dns_on: true,
            http_on: true,
            timeout: Duration::from_secs(1),
            zk_detection_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn failed_reload_leaves_live_record_set_untouched() {
        let config = test_config();
        let live = ArcSwap::from_pointee(RecordSet::new());
        let client = reqwest::Client::new();

        // No masters configured and ZK absent -> load_state always fails,
        // so the stored RecordSet pointer must be unchanged.
        let before = live.load_full();
        run_reload_cycle(&config, &live, &client).await;
        let after = live.load_full();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(config.current_serial(), 0);
    }

    #[test]
    fn try_reload_does_not_block_when_already_queued() {
        let (tx, _rx) = mpsc::channel(1);
        let trigger = ReloadTrigger(tx);
        trigger.try_reload();
        trigger.try_reload(); // channel full now; must not panic or block
    }
}
