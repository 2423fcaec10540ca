use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Transport protocol used by a reachability probe.
///
/// # Examples
///
/// ```
/// use oxport_common::types::Protocol;
///
/// let proto: Protocol = "udp".parse().unwrap();
/// assert_eq!(proto, Protocol::Udp);
/// assert_eq!(proto.to_string(), "UDP");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP", alias = "tcp")]
    Tcp,
    #[serde(rename = "UDP", alias = "udp")]
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            _ => Err(format!("unknown protocol: {s}")),
        }
    }
}

/// A configured network endpoint whose reachability is probed each cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
        }
    }

    /// `host:port`, suitable for `lookup_host`/`connect`. IPv6 literals are
    /// bracketed (`[::1]:443`).
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.protocol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachabilityResult {
    pub target: Target,
    pub is_open: bool,
}

/// Process name filter from the process collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessFilter {
    /// Label value reported for this filter.
    pub process: String,
    /// Regular expression matched against the process name.
    pub regex: String,
}

/// A compute resource returned by a provider list API, normalized into the
/// shape shared by all inventory adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntity {
    pub id: String,
    pub display_name: String,
    pub machine_type: String,
    pub zone: String,
    pub region: String,
    pub public_address: Option<IpAddr>,
    pub private_address: Option<IpAddr>,
    /// Provider-specific label values (e.g. `cpu_count`, `private_dns_name`).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl InventoryEntity {
    /// Resolve the value of an inventory label by name.
    ///
    /// Unset addresses and unknown attributes render as an empty string.
    ///
    /// ```
    /// use oxport_common::types::InventoryEntity;
    ///
    /// let entity = InventoryEntity {
    ///     id: "42".into(),
    ///     display_name: "web-1".into(),
    ///     machine_type: "cx22".into(),
    ///     zone: "fsn1-dc14".into(),
    ///     region: "fsn1".into(),
    ///     public_address: Some("192.0.2.10".parse().unwrap()),
    ///     private_address: None,
    ///     attributes: Default::default(),
    /// };
    /// assert_eq!(entity.label_value("ip"), "192.0.2.10");
    /// assert_eq!(entity.label_value("private_ip"), "");
    /// ```
    pub fn label_value(&self, key: &str) -> String {
        match key {
            "id" => self.id.clone(),
            "name" => self.display_name.clone(),
            "type" => self.machine_type.clone(),
            "zone" => self.zone.clone(),
            "region" => self.region.clone(),
            "ip" | "public_ip" => address_label(self.public_address),
            "private_ip" => address_label(self.private_address),
            other => self.attributes.get(other).cloned().unwrap_or_default(),
        }
    }
}

fn address_label(addr: Option<IpAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_default()
}

/// Result of one inventory poll across all accounts of a provider.
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    pub entities: Vec<InventoryEntity>,
    /// `false` when at least one account failed this cycle.
    pub complete: bool,
}

/// How inventory series from previous cycles are reconciled.
///
/// # Examples
///
/// ```
/// use oxport_common::types::InventoryPolicy;
///
/// let policy: InventoryPolicy = "prune_absent".parse().unwrap();
/// assert_eq!(policy, InventoryPolicy::PruneAbsent);
/// assert!(policy.evicts_changed());
/// assert!(!InventoryPolicy::Retain.evicts_changed());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryPolicy {
    /// Add/overwrite only; series of vanished entities remain.
    #[default]
    Retain,
    /// Replace an entity's previous series when its labels change.
    EvictChanged,
    /// `EvictChanged`, plus drop entities missing from a complete cycle.
    PruneAbsent,
}

impl InventoryPolicy {
    pub fn evicts_changed(self) -> bool {
        !matches!(self, InventoryPolicy::Retain)
    }
}

impl std::fmt::Display for InventoryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryPolicy::Retain => write!(f, "retain"),
            InventoryPolicy::EvictChanged => write!(f, "evict_changed"),
            InventoryPolicy::PruneAbsent => write!(f, "prune_absent"),
        }
    }
}

impl std::str::FromStr for InventoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retain" => Ok(InventoryPolicy::Retain),
            "evict_changed" => Ok(InventoryPolicy::EvictChanged),
            "prune_absent" => Ok(InventoryPolicy::PruneAbsent),
            _ => Err(format!("unknown inventory policy: {s}")),
        }
    }
}
