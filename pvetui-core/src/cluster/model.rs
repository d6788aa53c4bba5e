use crate::pve::NetInterface;
use crate::search::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestType {
    Qemu,
    Lxc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestStatus {
    Running,
    Stopped,
    Paused,
    Unknown,
}

impl GuestStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => GuestStatus::Running,
            "stopped" => GuestStatus::Stopped,
            "paused" => GuestStatus::Paused,
            _ => GuestStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Guest {
    pub id: u32,
    pub name: String,
    pub node: String,
    pub kind: GuestType,
    pub status: GuestStatus,
    pub cpu: f64,
    pub mem: u64,
    pub max_mem: u64,
    pub disk: u64,
    pub max_disk: u64,
    pub uptime: u64,
    pub net_in: u64,
    pub net_out: u64,
    pub disk_read: u64,
    pub disk_write: u64,
    pub id_display: String,
    pub tags_raw: String,
    pub tags: Vec<String>,
    pub agent_enabled: bool,
    pub agent_running: bool,
    pub net_interfaces: Option<Vec<NetInterface>>,
    pub ip: Option<String>,
    pub enriched: bool,
}

impl Guest {
    /// Splits `tags_raw` on `;` once, at construction time, rather than
    /// re-splitting on every filter pass.
    pub fn with_tags(mut self) -> Self {
        self.tags = self
            .tags_raw
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    pub fn best_effort_ip(&self) -> Option<String> {
        if let Some(ip) = &self.ip {
            return Some(ip.clone());
        }
        self.net_interfaces
            .as_ref()
            .and_then(|ifaces| ifaces.iter().flat_map(|i| i.ip_addresses.iter()).next())
            .map(|addr| addr.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    pub id: String,
    pub node: String,
    pub storage_type: String,
    pub content: String,
    pub disk: u64,
    pub max_disk: u64,
    pub status: String,
    pub shared: bool,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub id: String,
    pub online: bool,
    pub ip: Option<String>,
    pub uptime: u64,
    pub cpu_cores: Option<u32>,
    pub cpu_sockets: Option<u32>,
    pub cpu_model: Option<String>,
    pub max_memory: Option<u64>,
    pub max_disk: Option<u64>,
    pub kernel_version: Option<String>,
    pub pve_version: Option<String>,
    pub guests: Vec<Guest>,
    pub storages: Vec<Storage>,
    pub source_profile: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterAggregates {
    pub online_nodes: u32,
    pub total_cpu: f64,
    pub cpu_usage: f64,
    pub memory_total: u64,
    pub memory_used: u64,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    pub version: String,
    pub nodes: Vec<Node>,
    pub aggregates: ClusterAggregates,
}

impl Cluster {
    pub fn empty(name: String, version: String) -> Self {
        Self { name, version, nodes: Vec::new(), aggregates: ClusterAggregates::default() }
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Pure aggregation recomputed once per swap; never mutated piecemeal.
    pub fn recompute(mut self) -> Self {
        let online_nodes = self.nodes.iter().filter(|n| n.online).count() as u32;
        let total_cpu: f64 = self
            .nodes
            .iter()
            .filter_map(|n| n.cpu_cores)
            .map(f64::from)
            .sum();
        let memory_total: u64 = self.nodes.iter().filter_map(|n| n.max_memory).sum();

        let guest_count: usize = self.nodes.iter().map(|n| n.guests.len()).sum();
        let cpu_usage = if guest_count == 0 {
            0.0
        } else {
            let sum: f64 = self.nodes.iter().flat_map(|n| n.guests.iter()).map(|g| g.cpu).sum();
            sum / guest_count as f64
        };
        let memory_used: u64 =
            self.nodes.iter().flat_map(|n| n.guests.iter()).map(|g| g.mem).sum();

        self.aggregates = ClusterAggregates { online_nodes, total_cpu, cpu_usage, memory_total, memory_used };
        self
    }
}

impl GuestType {
    fn as_str(self) -> &'static str {
        match self {
            GuestType::Qemu => "qemu",
            GuestType::Lxc => "lxc",
        }
    }
}

impl GuestStatus {
    fn as_str(self) -> &'static str {
        match self {
            GuestStatus::Running => "running",
            GuestStatus::Stopped => "stopped",
            GuestStatus::Paused => "paused",
            GuestStatus::Unknown => "unknown",
        }
    }
}

impl Entity for Guest {
    fn identity(&self) -> crate::search::EntityId {
        format!("{}:{}", self.node, self.id)
    }
    fn search_name(&self) -> &str {
        &self.name
    }
    fn search_id(&self) -> &str {
        &self.id_display
    }
    fn search_node(&self) -> &str {
        &self.node
    }
    fn search_type(&self) -> &str {
        self.kind.as_str()
    }
    fn search_status(&self) -> &str {
        self.status.as_str()
    }
    fn search_tags(&self) -> &[String] {
        &self.tags
    }
}

impl Entity for Node {
    fn identity(&self) -> crate::search::EntityId {
        self.name.clone()
    }
    fn search_name(&self) -> &str {
        &self.name
    }
    fn search_id(&self) -> &str {
        &self.id
    }
    fn search_node(&self) -> &str {
        &self.name
    }
    fn search_type(&self) -> &str {
        "node"
    }
    fn search_status(&self) -> &str {
        if self.online { "online" } else { "offline" }
    }
    fn search_tags(&self) -> &[String] {
        &[]
    }
}
