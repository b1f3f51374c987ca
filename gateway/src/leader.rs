//! Leader watcher (spec.md §4.6): subscribes to a coordination service and
//! pushes non-empty leader-changed signals onto a single-slot channel.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::sync::watch;

/// Coordination-service-reported leader. Mirrors the fields a ZooKeeper
/// group-membership watch typically yields: a hostname when the member
/// advertised one, otherwise a raw big-endian IPv4 address, plus the port
/// to pair it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderInfo {
    pub hostname: Option<String>,
    pub ip: u32,
    pub port: u16,
}

impl LeaderInfo {
    /// `host:port` for this leader: the hostname when present, else the
    /// decoded big-endian IPv4 address.
    pub fn host_port(&self) -> String {
        let host = self
            .hostname
            .clone()
            .unwrap_or_else(|| Ipv4Addr::from(self.ip.to_be_bytes()).to_string());
        format!("{}:{}", host, self.port)
    }
}

/// Abstraction over a cluster coordination service (e.g. ZooKeeper),
/// deliberately external to the core (spec.md §1): a concrete client is
/// out of scope, this trait only names the shape the leader watcher needs.
#[async_trait::async_trait]
pub trait CoordinationService: Send + Sync {
    /// Block until the next leader-membership notification. `None` means
    /// the leader is currently unknown; `Some` carries the new leader info.
    async fn next_notification(&mut self) -> Option<LeaderInfo>;
}

/// Fatal: the coordination service never produced an initial leader within
/// the configured detection window.
#[derive(Debug)]
pub struct InitialDetectionTimeout;

impl std::fmt::Display for InitialDetectionTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no leader detected within the initial detection timeout")
    }
}

impl std::error::Error for InitialDetectionTimeout {}

/// Drive `service`, publishing every non-empty leader onto `tx`. Blocks
/// until the first leader is observed (bounded by `initial_timeout`),
/// returning an error if none arrives in time; afterwards runs until the
/// service's notification stream ends.
pub async fn watch_leader(
    mut service: impl CoordinationService,
    initial_timeout: Duration,
    tx: watch::Sender<Option<String>>,
) -> Result<(), InitialDetectionTimeout> {
    let first = tokio::time::timeout(initial_timeout, next_leader_host_port(&mut service))
        .await
        .map_err(|_| InitialDetectionTimeout)?;

    let Some(host_port) = first else {
        return Err(InitialDetectionTimeout);
    };
    let _ = tx.send(Some(host_port));

    loop {
        match service.next_notification().await {
            Some(info) => {
                let _ = tx.send(Some(info.host_port()));
            }
            None => log::debug!("coordination service reports leader unknown"),
        }
    }
}

/// Poll `service` until it reports a non-nil leader, skipping unknown
/// notifications along the way.
async fn next_leader_host_port(service: &mut impl CoordinationService) -> Option<String> {
    loop {
        match service.next_notification().await {
            Some(info) => return Some(info.host_port()),
            None => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct ScriptedService {
        notifications: Arc<Mutex<Vec<Option<LeaderInfo>>>>,
    }

    #[async_trait::async_trait]
    impl CoordinationService for ScriptedService {
        async fn next_notification(&mut self) -> Option<LeaderInfo> {
            let mut guard = self.notifications.lock().unwrap();
            if guard.is_empty() {
                // Stall forever once the script is exhausted, as a real
                // watch stream would between notifications.
                drop(guard);
                std::future::pending::<()>().await;
                unreachable!()
            } else {
                guard.remove(0)
            }
        }
    }

    #[test]
    fn host_port_prefers_hostname() {
        let info = LeaderInfo {
            hostname: Some("master1.example".into()),
            ip: 0x06060606,
            port: 7,
        };
        assert_eq!(info.host_port(), "master1.example:7");
    }

    #[test]
    fn host_port_falls_back_to_decoded_ipv4() {
        let info = LeaderInfo {
            hostname: None,
            ip: u32::from_be_bytes([6, 6, 6, 6]),
            port: 7,
        };
        assert_eq!(info.host_port(), "6.6.6.6:7");
    }

    #[tokio::test(start_paused = true)]
    async fn initial_timeout_is_fatal_when_no_leader_arrives() {
        let service = ScriptedService {
            notifications: Arc::new(Mutex::new(vec![None, None])),
        };
        let (tx, _rx) = watch::channel(None);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            watch_leader(service, Duration::from_millis(10), tx),
        )
        .await
        .expect("watch_leader itself should resolve, not hang");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn publishes_first_leader_seen() {
        let service = ScriptedService {
            notifications: Arc::new(Mutex::new(vec![Some(LeaderInfo {
                hostname: Some("leader.example".into()),
                ip: 0,
                port: 9,
            })])),
        };
        let (tx, mut rx) = watch::channel(None);
        tokio::spawn(watch_leader(service, Duration::from_secs(5), tx));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().clone(), Some("leader.example:9".to_string()));
    }
}
