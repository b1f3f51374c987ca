//! Task IP resolver (spec.md §4.3): picks IPs for a task by consulting an
//! ordered list of sources. Later sources in `Config::ip_sources` override
//! earlier ones — the caller is expected to de-duplicate/collapse via
//! `RecordMap`'s idempotent insert (§4.4, §8 property 3).

use std::net::IpAddr;

use crate::config::IpSource;
use crate::mangle::HostNameSpec;
use crate::snapshot::{Slave, Task};

const DOCKER_IP_LABEL: &str = "Docker.NetworkSettings.IPAddress";
const MESOS_IP_LABEL: &str = "MesosContainerizer.NetworkSettings.IPAddress";

/// Sanitize a candidate IP string: parse it as IPv4 or IPv6 and
/// re-stringify. Invalid inputs are dropped.
fn sanitize(candidate: &str) -> Option<String> {
    candidate.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

/// `host` source: the slave's IP, from resolving its hostname. If
/// resolution fails, falls back to a DNS-safe mangled fragment of the
/// hostname (this degrades gracefully rather than producing no record,
/// matching spec.md §4.3's note that the mangler is the fallback).
pub fn resolve_host_source(slave: &Slave, spec: &HostNameSpec) -> Option<String> {
    if let Some(ip) = sanitize(&slave.hostname) {
        return Some(ip);
    }
    use std::net::ToSocketAddrs;
    let lookup = format!("{}:0", slave.hostname);
    if let Ok(mut addrs) = lookup.to_socket_addrs() {
        if let Some(addr) = addrs.find(|a| a.is_ipv4()) {
            return Some(addr.ip().to_string());
        }
    }
    let mangled = spec.as_domain_frag(&slave.hostname);
    if mangled.is_empty() {
        None
    } else {
        Some(mangled)
    }
}

/// `netinfo` source: every `ipAddresses[].ipAddress` (new form) or
/// `ipAddress` (old form) from the latest `TASK_RUNNING` status's
/// `containerStatus.networkInfos`, optionally filtered to a named network.
pub fn resolve_netinfo_source(task: &Task, network_name: &str) -> Vec<String> {
    let Some(status) = task.latest_running_status() else {
        return Vec::new();
    };
    let Some(container) = &status.container_status else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for info in &container.network_infos {
        if !network_name.is_empty() && info.name.as_deref() != Some(network_name) {
            continue;
        }
        if !info.ip_addresses.is_empty() {
            for entry in &info.ip_addresses {
                if let Some(ip) = entry.ip_address.as_deref().and_then(sanitize) {
                    out.push(ip);
                }
            }
        } else if let Some(ip) = info.ip_address.as_deref().and_then(sanitize) {
            out.push(ip);
        }
    }
    out
}

fn resolve_label_source(task: &Task, label_key: &str) -> Vec<String> {
    let Some(status) = task.latest_running_status() else {
        return Vec::new();
    };
    status
        .labels
        .iter()
        .filter(|l| l.key == label_key)
        .filter_map(|l| sanitize(&l.value))
        .collect()
}

pub fn resolve_docker_source(task: &Task) -> Vec<String> {
    resolve_label_source(task, DOCKER_IP_LABEL)
}

pub fn resolve_mesos_source(task: &Task) -> Vec<String> {
    resolve_label_source(task, MESOS_IP_LABEL)
}

/// `autoip` source: inspects the task's first port-discovery info for the
/// `network-scope`/`network-name` label pair and delegates accordingly.
pub fn resolve_autoip_source(task: &Task, slave: &Slave, spec: &HostNameSpec) -> Vec<String> {
    let Some(discovery) = &task.discovery else {
        return Vec::new();
    };
    let Some(port) = discovery.ports.first() else {
        return Vec::new();
    };
    match port.label("network-scope") {
        Some("host") => resolve_host_source(slave, spec).into_iter().collect(),
        Some("container") => {
            let network_name = port.label("network-name").unwrap_or("");
            resolve_netinfo_source(task, network_name)
        }
        _ => Vec::new(),
    }
}

/// Resolve IPs for `task` by walking `sources` in ascending-priority order:
/// a later source that yields any IPs fully overrides an earlier one,
/// rather than merging with it. Returns the empty vector if no source
/// resolved anything.
pub fn resolve_task_ips(
    task: &Task,
    slave: &Slave,
    sources: &[IpSource],
    spec: &HostNameSpec,
) -> Vec<String> {
    let mut chosen = Vec::new();
    for source in sources {
        let ips = match source {
            IpSource::Host => resolve_host_source(slave, spec).into_iter().collect(),
            IpSource::Netinfo => resolve_netinfo_source(task, ""),
            IpSource::Docker => resolve_docker_source(task),
            IpSource::Mesos => resolve_mesos_source(task),
            IpSource::Autoip => resolve_autoip_source(task, slave, spec),
        };
        if !ips.is_empty() {
            chosen = ips;
        }
    }
    chosen
}

/// The single IP used for a task's A-glue records: the first entry of
/// [`resolve_task_ips`], if any source resolved one.
pub fn resolve_primary_ip(
    task: &Task,
    slave: &Slave,
    sources: &[IpSource],
    spec: &HostNameSpec,
) -> Option<String> {
    resolve_task_ips(task, slave, sources, spec).into_iter().next()
}

/// Whether a container-scoped IP is discoverable for `task` (via netinfo or
/// docker/mesos labels), used to decide whether to emit `_container.`
/// records (§4.4 step 3e).
pub fn has_container_ip(task: &Task) -> bool {
    !resolve_netinfo_source(task, "").is_empty()
        || !resolve_docker_source(task).is_empty()
        || !resolve_mesos_source(task).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ContainerStatus, IpAddressEntry, Label, NetworkInfo, Resources, TaskStatus};

    fn slave() -> Slave {
        Slave {
            id: "s1".into(),
            hostname: "1.2.3.11".into(),
            pid: String::new(),
        }
    }

    fn task_with_netinfo(ip: &str) -> Task {
        Task {
            framework_id: String::new(),
            id: "X".into(),
            name: "liquor-store".into(),
            slave_id: "s1-aaaa".into(),
            state: "TASK_RUNNING".into(),
            resources: Resources::default(),
            discovery: None,
            statuses: vec![TaskStatus {
                timestamp: 1.0,
                state: "TASK_RUNNING".into(),
                labels: vec![],
                container_status: Some(ContainerStatus {
                    network_infos: vec![NetworkInfo {
                        ip_addresses: vec![IpAddressEntry {
                            ip_address: Some(ip.to_string()),
                        }],
                        ip_address: None,
                        name: None,
                    }],
                }),
            }],
        }
    }

    #[test]
    fn host_source_uses_parseable_ip_directly() {
        let spec = HostNameSpec::rfc952();
        assert_eq!(
            resolve_host_source(&slave(), &spec),
            Some("1.2.3.11".to_string())
        );
    }

    #[test]
    fn netinfo_source_reads_new_form_addresses() {
        let task = task_with_netinfo("10.0.0.5");
        assert_eq!(
            resolve_netinfo_source(&task, ""),
            vec!["10.0.0.5".to_string()]
        );
    }

    #[test]
    fn netinfo_falls_back_to_old_form() {
        let mut task = task_with_netinfo("unused");
        if let Some(status) = task.statuses.first_mut() {
            let container = status.container_status.as_mut().unwrap();
            container.network_infos[0].ip_addresses.clear();
            container.network_infos[0].ip_address = Some("10.0.0.9".into());
        }
        assert_eq!(
            resolve_netinfo_source(&task, ""),
            vec!["10.0.0.9".to_string()]
        );
    }

    #[test]
    fn docker_label_source_reads_latest_status() {
        let mut task = task_with_netinfo("unused");
        task.statuses[0].labels.push(Label {
            key: DOCKER_IP_LABEL.into(),
            value: "172.17.0.2".into(),
        });
        assert_eq!(
            resolve_docker_source(&task),
            vec!["172.17.0.2".to_string()]
        );
    }

    #[test]
    fn invalid_ip_strings_are_dropped() {
        let task = task_with_netinfo("not-an-ip");
        assert!(resolve_netinfo_source(&task, "").is_empty());
    }

    #[test]
    fn later_source_overrides_earlier_non_empty_result() {
        let task = task_with_netinfo("10.0.0.5");
        let spec = HostNameSpec::rfc952();
        // netinfo resolves, host also resolves (slave ip 1.2.3.11); with
        // [host, netinfo] netinfo (later) should win entirely.
        let ips = resolve_task_ips(&task, &slave(), &[IpSource::Host, IpSource::Netinfo], &spec);
        assert_eq!(ips, vec!["10.0.0.5".to_string()]);
    }

    #[test]
    fn netinfo_filters_by_network_name_when_given() {
        let mut task = task_with_netinfo("10.0.0.5");
        task.statuses[0]
            .container_status
            .as_mut()
            .unwrap()
            .network_infos[0]
            .name = Some("bridge".into());
        assert!(resolve_netinfo_source(&task, "overlay").is_empty());
        assert_eq!(
            resolve_netinfo_source(&task, "bridge"),
            vec!["10.0.0.5".to_string()]
        );
    }
}
