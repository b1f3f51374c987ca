//! The cluster controller's state document, deserialized straight off the
//! wire (`GET http://host:port/master/state.json`).
//!
//! Field names follow the upstream controller's JSON, not Rust convention,
//! hence the liberal `#[serde(rename = "...")]` use.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub leader: String,
    #[serde(default)]
    pub slaves: Vec<Slave>,
    #[serde(default)]
    pub frameworks: Vec<Framework>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Slave {
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub pid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Framework {
    pub name: String,
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    #[serde(rename = "framework_id", default)]
    pub framework_id: String,
    pub id: String,
    pub name: String,
    #[serde(rename = "slave_id")]
    pub slave_id: String,
    pub state: String,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub statuses: Vec<TaskStatus>,
    #[serde(default)]
    pub discovery: Option<Discovery>,
}

impl Task {
    pub fn is_running(&self) -> bool {
        self.state == "TASK_RUNNING"
    }

    /// The status with the highest `timestamp` whose `state` is
    /// `TASK_RUNNING`, or `None` if there isn't one. Status delivery
    /// ordering from the upstream controller is not guaranteed, so the
    /// timestamp — not array position — decides which status is current.
    pub fn latest_running_status(&self) -> Option<&TaskStatus> {
        self.statuses
            .iter()
            .filter(|s| s.state == "TASK_RUNNING")
            .max_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub ports: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatus {
    #[serde(default)]
    pub timestamp: f64,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub container_status: Option<ContainerStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerStatus {
    #[serde(default)]
    pub network_infos: Vec<NetworkInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub ip_addresses: Vec<IpAddressEntry>,
    /// Old-form single address, used as a fallback when `ip_addresses` is
    /// absent.
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpAddressEntry {
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ports: Vec<DiscoveryPort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryPort {
    #[serde(default)]
    pub protocol: String,
    pub number: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl DiscoveryPort {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.key == key)
            .map(|l| l.value.as_str())
    }
}
