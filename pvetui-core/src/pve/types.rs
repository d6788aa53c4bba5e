//! Wire-adjacent types returned by the PVE client.
//!
//! These are intentionally closer to the PVE API's own shapes than to
//! the cluster model in [`crate::cluster`]; enrichment maps from here
//! into the entities the UI consumes.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// A PVE `UPID` (unique process identifier). Opaque on purpose: the
/// only operations defined on it are `Display`/`AsRef<str>`, never
/// parsing into fields, because no caller needs to decode one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Upid(pub String);

impl fmt::Display for Upid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Upid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Qemu,
    Lxc,
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestKind::Qemu => write!(f, "qemu"),
            GuestKind::Lxc => write!(f, "lxc"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Start,
    Stop,
    Shutdown,
    Reboot,
}

/// One network interface as reported by the QEMU guest agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetInterface {
    pub name: String,
    pub mac: String,
    pub ip_addresses: Vec<IpAddr>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResourceRaw {
    #[serde(rename = "type")]
    pub kind: String,
    pub node: Option<String>,
    pub id: Option<String>,
    pub vmid: Option<u32>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub cpu: Option<f64>,
    pub maxcpu: Option<u64>,
    pub mem: Option<u64>,
    pub maxmem: Option<u64>,
    pub disk: Option<u64>,
    pub maxdisk: Option<u64>,
    pub uptime: Option<u64>,
    pub netin: Option<u64>,
    pub netout: Option<u64>,
    pub diskread: Option<u64>,
    pub diskwrite: Option<u64>,
    pub tags: Option<String>,
    pub storage: Option<String>,
    pub content: Option<String>,
    pub shared: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusRaw {
    pub uptime: Option<u64>,
    pub cpuinfo: Option<CpuInfoRaw>,
    pub memory: Option<MemoryInfoRaw>,
    #[serde(rename = "kversion")]
    pub kernel_version: Option<String>,
    pub pveversion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuInfoRaw {
    pub cpus: Option<u32>,
    pub sockets: Option<u32>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryInfoRaw {
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestAgentNetworkInterfacesRaw {
    pub result: Vec<GuestAgentInterfaceRaw>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestAgentInterfaceRaw {
    pub name: String,
    #[serde(rename = "hardware-address")]
    pub hardware_address: Option<String>,
    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<GuestAgentIpAddressRaw>,
    pub statistics: Option<GuestAgentStatisticsRaw>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestAgentIpAddressRaw {
    #[serde(rename = "ip-address")]
    pub ip_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestAgentStatisticsRaw {
    #[serde(rename = "tx-bytes")]
    pub tx_bytes: Option<u64>,
    #[serde(rename = "rx-bytes")]
    pub rx_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncProxyTicket {
    pub ticket: String,
    pub port: String,
    #[serde(default)]
    pub cert: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VncTarget {
    pub node: String,
    pub vmid: u32,
    pub kind: GuestKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskRaw {
    pub devpath: Option<String>,
    pub size: Option<u64>,
    pub used: Option<u64>,
    pub health: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AptUpdateRaw {
    #[serde(rename = "Package")]
    pub package: String,
    #[serde(rename = "Version")]
    pub new_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageContentRaw {
    pub volid: String,
    pub content: String,
    pub size: Option<u64>,
    pub format: Option<String>,
    pub vmid: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusRaw {
    pub status: String,
    pub exitstatus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestStatusRaw {
    pub status: String,
    pub cpu: Option<f64>,
    pub mem: Option<u64>,
    pub maxmem: Option<u64>,
    pub disk: Option<u64>,
    pub maxdisk: Option<u64>,
    pub uptime: Option<u64>,
    pub netin: Option<u64>,
    pub netout: Option<u64>,
    pub diskread: Option<u64>,
    pub diskwrite: Option<u64>,
    pub agent: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestConfigRaw {
    pub name: Option<String>,
    pub tags: Option<String>,
    pub agent: Option<String>,
}
