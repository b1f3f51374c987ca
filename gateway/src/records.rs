//! The record generator (spec.md §4.4): transforms a [`Snapshot`] into a
//! canonical [`RecordSet`] of A and SRV records.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use crate::config::Config;
use crate::ipresolve;
use crate::mangle::HostNameSpec;
use crate::ports::expand_port_ranges;
use crate::snapshot::Snapshot;

/// An ordered, duplicate-free sequence of answer strings. For A/AAAA
/// records each element is a textual IP; for SRV records each element is
/// `host:port`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answer {
    values: Vec<String>,
    seen: HashSet<String>,
}

impl Answer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`; a repeat insertion of the same value is a no-op
    /// (idempotence, §8 property 3).
    pub fn insert(&mut self, value: impl Into<String>) {
        let value = value.into();
        if self.seen.insert(value.clone()) {
            self.values.push(value);
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn first(&self) -> Option<&String> {
        self.values.first()
    }
}

impl<'a> IntoIterator for &'a Answer {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// A mapping from fully-qualified, lowercased, trailing-dot name to
/// [`Answer`]. Insertion normalizes the name and is idempotent per value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMap(HashMap<String, Answer>);

impl RecordMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(name: &str) -> String {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with('.') {
            lower
        } else {
            format!("{}.", lower)
        }
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let name = Self::normalize(name);
        self.0.entry(name).or_default().insert(value);
    }

    pub fn get(&self, name: &str) -> Option<&Answer> {
        self.0.get(&Self::normalize(name))
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(&Self::normalize(name))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Answer)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop every name whose answer ended up empty. RecordSet's invariant
    /// is that every published name has at least one answer.
    fn prune_empty(&mut self) {
        self.0.retain(|_, answer| !answer.is_empty());
    }
}

/// `{A, SRV}`: the pair of record maps the DNS server and HTTP API read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    pub a: RecordMap,
    pub srv: RecordMap,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(&mut self) {
        self.a.prune_empty();
        self.srv.prune_empty();
    }
}

/// 32-bit FNV-1a over `data`.
fn fnv1a(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Fold a 32-bit FNV-1a digest of `task_id` into a short decimal tag. Per
/// spec.md §9's Open Question, this tag is a disambiguation hint, not a
/// uniqueness guarantee — callers must always also include the slave-id
/// suffix in instance names.
pub fn tag_hash(task_id: &str) -> String {
    let hash = fnv1a(task_id.as_bytes());
    let folded = (hash >> 16).wrapping_add(hash & 0xFFFF) & 0xFFFF;
    folded.to_string()
}

/// The lowercased final `-`-separated segment of a slave id, e.g.
/// `"s1-aaaa"` -> `"aaaa"`.
fn slave_id_suffix(slave_id: &str) -> String {
    slave_id
        .rsplit('-')
        .next()
        .unwrap_or(slave_id)
        .to_ascii_lowercase()
}

/// Generate a [`RecordSet`] from `snapshot` per spec.md §4.4.
pub fn generate(snapshot: &Snapshot, config: &Config) -> RecordSet {
    let spec = config.host_spec.spec();
    let mut rs = RecordSet::new();

    generate_slave_records(snapshot, &mut rs, &spec, config);
    generate_task_records(snapshot, &mut rs, &spec, config);
    generate_master_records(snapshot, &mut rs, config);
    generate_listener_records(&mut rs, config);

    rs.prune();
    rs
}

fn generate_slave_records(
    snapshot: &Snapshot,
    rs: &mut RecordSet,
    spec: &HostNameSpec,
    config: &Config,
) {
    let name = format!("slave.{}.", config.domain);
    for slave in &snapshot.slaves {
        if let Some(ip) = ipresolve::resolve_host_source(slave, spec) {
            rs.a.insert(&name, ip);
        }
    }
}

fn generate_task_records(
    snapshot: &Snapshot,
    rs: &mut RecordSet,
    spec: &HostNameSpec,
    config: &Config,
) {
    let slaves_by_id: HashMap<&str, &crate::snapshot::Slave> = snapshot
        .slaves
        .iter()
        .map(|s| (s.id.as_str(), s))
        .collect();

    for framework in &snapshot.frameworks {
        let fname = spec.as_domain_frag(&framework.name);
        let tail = format!("{}.{}.", fname, config.domain);

        for task in &framework.tasks {
            if !task.is_running() {
                continue;
            }
            let Some(slave) = slaves_by_id.get(task.slave_id.as_str()) else {
                continue;
            };

            let tname = spec.mangle(&task.name);
            let sid = slave_id_suffix(&task.slave_id);
            let tag = tag_hash(&task.id);
            let instance = format!("{}-{}-{}", tname, tag, sid);

            let plain_name = format!("{}.{}", tname, tail);
            let instance_name = format!("{}.{}", instance, tail);

            if let Some(ip) = ipresolve::resolve_primary_ip(task, slave, &config.ip_sources, spec)
            {
                rs.a.insert(&plain_name, ip.clone());
                rs.a.insert(&instance_name, ip);
            }

            if ipresolve::has_container_ip(task) {
                if let Some(container_ip) = ipresolve::resolve_netinfo_source(task, "")
                    .into_iter()
                    .next()
                    .or_else(|| ipresolve::resolve_docker_source(task).into_iter().next())
                    .or_else(|| ipresolve::resolve_mesos_source(task).into_iter().next())
                {
                    rs.a.insert(format!("_container.{}", plain_name), container_ip.clone());
                    rs.a.insert(format!("_container.{}", instance_name), container_ip);
                }
            }

            for port in expand_port_ranges(&task.resources.ports) {
                let target = format!("{}:{}", instance_name, port);
                rs.srv.insert(format!("_{}._tcp.{}", tname, tail), target.clone());
                rs.srv.insert(format!("_{}._udp.{}", tname, tail), target);
            }
        }
    }
}

fn generate_master_records(snapshot: &Snapshot, rs: &mut RecordSet, config: &Config) {
    let Some(leader_ip) = parse_master_pid(&snapshot.leader) else {
        return;
    };

    let leader_name = format!("leader.{}.", config.domain);
    rs.a.insert(&leader_name, leader_ip.ip.clone());

    let master_name = format!("master.{}.", config.domain);
    rs.a.insert(&master_name, leader_ip.ip.clone());

    // Combined enumeration: fallbacks first, then the leader if it is not
    // already among them (§4.4 step 4).
    let mut combined: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for master in &config.masters {
        if let Some((host, _)) = crate::config::parse_host_port(master) {
            if seen.insert(host.clone()) {
                combined.push(host.clone());
            }
            rs.a.insert(&master_name, host);
        }
    }
    if seen.insert(leader_ip.ip.clone()) {
        combined.push(leader_ip.ip.clone());
    }

    for (idx, host) in combined.iter().enumerate() {
        rs.a.insert(format!("master{}.{}.", idx, config.domain), host.clone());
    }

    if leader_ip.port != 0 {
        let srv_target = format!("{}:{}", leader_name, leader_ip.port);
        rs.srv.insert(format!("_leader._tcp.{}.", config.domain), srv_target.clone());
        rs.srv.insert(format!("_leader._udp.{}.", config.domain), srv_target);
    }
}

struct MasterPid {
    ip: String,
    port: u16,
}

/// Parse a controller "pid" string, `"master@host:port"`, into its IP and
/// port. The host is sanitized the same way task IPs are (§4.3).
fn parse_master_pid(pid: &str) -> Option<MasterPid> {
    let (_, rest) = pid.split_once('@')?;
    let (host, port) = rest.rsplit_once(':')?;
    let ip: IpAddr = host.parse().ok()?;
    let port: u16 = port.parse().ok()?;
    Some(MasterPid {
        ip: ip.to_string(),
        port,
    })
}

fn generate_listener_records(rs: &mut RecordSet, config: &Config) {
    let name = config.self_ns_name();
    match config.listener {
        IpAddr::V4(addr) if addr.is_unspecified() => {
            for iface_ip in non_loopback_ipv4_addrs() {
                rs.a.insert(&name, iface_ip);
            }
        }
        IpAddr::V4(addr) if addr.is_loopback() => {
            rs.a.insert(&name, "127.0.0.1");
        }
        other => {
            rs.a.insert(&name, other.to_string());
        }
    }
}

/// Best-effort enumeration of non-loopback IPv4 addresses bound to local
/// interfaces. The standard library has no portable interface-enumeration
/// API; in the absence of one, this returns an empty list and callers fall
/// back to whatever records the fallback masters/slaves already supplied —
/// production deployments bind a concrete listener address rather than
/// `0.0.0.0` for this reason.
fn non_loopback_ipv4_addrs() -> Vec<String> {
    Vec::new()
}
