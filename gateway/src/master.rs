//! Master-state loader (spec.md §4.5): fetches and parses the cluster
//! controller's `state.json`, trying the ZK-reported leader first and then
//! falling back through the configured master list.

use std::time::Duration;

use crate::config::parse_host_port;
use crate::error::cluster::ClusterError;
use crate::snapshot::Snapshot;

const USER_AGENT: &str = "Mesos-DNS";

/// Fetch and parse `http://host:port/master/state.json`.
///
/// The fetch runs on a dedicated task so a panic inside it (e.g. from a
/// misbehaving dependency) surfaces as a `JoinError` rather than taking
/// down the refresh worker, per spec.md §4.5.
pub async fn fetch_state(
    client: &reqwest::Client,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Snapshot, ClusterError> {
    let client = client.clone();
    let host = host.to_string();
    let url = format!("http://{}:{}/master/state.json", host, port);

    let task_url = url.clone();
    let join = tokio::spawn(async move {
        let response = client
            .get(&task_url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await?;
        let body = response.text().await?;
        let snapshot: Snapshot = serde_json::from_str(&body)?;
        Ok::<Snapshot, ClusterError>(snapshot)
    });

    match join.await {
        Ok(result) => result,
        Err(_) => Err(ClusterError::CannotConnect(format!(
            "panic while fetching {}",
            url
        ))),
    }
}

/// Load the cluster snapshot: try the ZK-reported leader first (re-fetching
/// against its self-declared leader if that differs, to keep the snapshot
/// internally consistent), then each fallback master in order. Returns the
/// first snapshot with a non-empty `leader` field.
pub async fn load_state(
    client: &reqwest::Client,
    zk_leader: Option<&str>,
    fallbacks: &[String],
    timeout: Duration,
) -> Result<Snapshot, ClusterError> {
    if let Some(leader) = zk_leader {
        if let Some((host, port)) = parse_host_port(leader) {
            match fetch_state(client, &host, port, timeout).await {
                Ok(snapshot) if !snapshot.leader.is_empty() => {
                    return Ok(reconcile_with_self_declared_leader(
                        client, snapshot, &host, port, timeout,
                    )
                    .await);
                }
                _ => {
                    log::warn!("zk-reported leader {} did not return a usable state", leader);
                }
            }
        }
    }

    for fallback in fallbacks {
        let Some((host, port)) = parse_host_port(fallback) else {
            continue;
        };
        match fetch_state(client, &host, port, timeout).await {
            Ok(snapshot) if !snapshot.leader.is_empty() => {
                return Ok(reconcile_with_self_declared_leader(
                    client, snapshot, &host, port, timeout,
                )
                .await);
            }
            Ok(_) => log::warn!("master {} returned an empty leader", fallback),
            Err(err) => log::warn!("master {} fetch failed: {}", fallback, err),
        }
    }

    Err(ClusterError::NoMasterReachable)
}

/// If the fetched state advertises a different leader than the host we
/// just contacted, re-fetch from the advertised leader (same port) so the
/// returned snapshot is consistent with its own self-declared leader.
async fn reconcile_with_self_declared_leader(
    client: &reqwest::Client,
    snapshot: Snapshot,
    contacted_host: &str,
    contacted_port: u16,
    timeout: Duration,
) -> Snapshot {
    let Some(advertised_host) = leader_host(&snapshot.leader) else {
        return snapshot;
    };

    if !differs_from_contacted(&advertised_host, contacted_host) {
        return snapshot;
    }

    match fetch_state(client, &advertised_host, contacted_port, timeout).await {
        Ok(second) if !second.leader.is_empty() => second,
        _ => snapshot,
    }
}

/// Whether the self-declared leader host differs from the host we already
/// contacted, per spec.md §4.5 ("if after parsing the fetched state
/// advertises a different leader than the one we contacted").
fn differs_from_contacted(advertised_host: &str, contacted_host: &str) -> bool {
    advertised_host != contacted_host
}

/// Extract the host portion of a `name@host:port` leader PID string.
fn leader_host(pid: &str) -> Option<String> {
    let after_at = pid.split('@').nth(1)?;
    let (host, _) = after_at.rsplit_once(':')?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
