//! Maps raw PVE wire types into the cluster model.
//!
//! `skeleton` builds the coarse snapshot from `cluster/resources`
//! alone (fast, always available); `enrich_node` fills in the fields
//! that need a dedicated per-node or per-guest call and is allowed to
//! fail per-node without aborting the refresh.

use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::pve::types::ClusterResourceRaw;
use crate::pve::{GuestKind, PveClient};
use tokio_util::sync::CancellationToken;

use super::model::{Cluster, Guest, GuestStatus, GuestType, Node, Storage};

const ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn skeleton(name: String, version: String, resources: &[ClusterResourceRaw]) -> Cluster {
    let mut nodes: Vec<Node> = Vec::new();

    for r in resources.iter().filter(|r| r.kind == "node") {
        let Some(node_name) = r.node.clone().or_else(|| r.id.clone()) else { continue };
        nodes.push(Node {
            name: node_name.clone(),
            id: r.id.clone().unwrap_or_else(|| node_name.clone()),
            online: r.status.as_deref() == Some("online"),
            ip: None,
            uptime: r.uptime.unwrap_or(0),
            cpu_cores: r.maxcpu.map(|c| c as u32),
            cpu_sockets: None,
            cpu_model: None,
            max_memory: r.maxmem,
            max_disk: r.maxdisk,
            kernel_version: None,
            pve_version: None,
            guests: Vec::new(),
            storages: Vec::new(),
            source_profile: None,
        });
    }

    for r in resources.iter().filter(|r| r.kind == "qemu" || r.kind == "lxc") {
        let (Some(node_name), Some(vmid)) = (r.node.clone(), r.vmid) else { continue };
        let Some(node) = nodes.iter_mut().find(|n| n.name == node_name) else { continue };
        let kind = if r.kind == "qemu" { GuestType::Qemu } else { GuestType::Lxc };
        let tags_raw = r.tags.clone().unwrap_or_default();
        node.guests.push(
            Guest {
                id: vmid,
                id_display: vmid.to_string(),
                name: r.name.clone().unwrap_or_else(|| vmid.to_string()),
                node: node_name,
                kind,
                status: r.status.as_deref().map(GuestStatus::parse).unwrap_or(GuestStatus::Unknown),
                cpu: r.cpu.unwrap_or(0.0),
                mem: r.mem.unwrap_or(0),
                max_mem: r.maxmem.unwrap_or(0),
                disk: r.disk.unwrap_or(0),
                max_disk: r.maxdisk.unwrap_or(0),
                uptime: r.uptime.unwrap_or(0),
                net_in: r.netin.unwrap_or(0),
                net_out: r.netout.unwrap_or(0),
                disk_read: r.diskread.unwrap_or(0),
                disk_write: r.diskwrite.unwrap_or(0),
                tags_raw,
                tags: Vec::new(),
                agent_enabled: false,
                agent_running: false,
                net_interfaces: None,
                ip: None,
                enriched: false,
            }
            .with_tags(),
        );
    }

    for r in resources.iter().filter(|r| r.kind == "storage") {
        let (Some(node_name), Some(storage_id)) = (r.node.clone(), r.storage.clone()) else {
            continue;
        };
        let Some(node) = nodes.iter_mut().find(|n| n.name == node_name) else { continue };
        node.storages.push(Storage {
            id: storage_id,
            node: node_name,
            storage_type: r.content.clone().unwrap_or_default(),
            content: r.content.clone().unwrap_or_default(),
            disk: r.disk.unwrap_or(0),
            max_disk: r.maxdisk.unwrap_or(0),
            status: r.status.clone().unwrap_or_default(),
            shared: r.shared.unwrap_or(0) != 0,
        });
    }

    Cluster { name, version, nodes, aggregates: super::model::ClusterAggregates::default() }
}

/// Enriches one node in place: node status fields plus each guest's
/// `agent_*`/config/network data. A failed sub-call logs at `warn` and
/// leaves the field at its skeleton default rather than aborting the
/// whole node.
pub async fn enrich_node(pve: &PveClient, node: &mut Node, cancel: &CancellationToken) {
    match tokio::time::timeout(ENRICHMENT_TIMEOUT, pve.node_status(&node.name, true, cancel)).await
    {
        Ok(Ok(status)) => {
            node.uptime = status.uptime.unwrap_or(node.uptime);
            if let Some(cpuinfo) = status.cpuinfo {
                node.cpu_cores = cpuinfo.cpus.or(node.cpu_cores);
                node.cpu_sockets = cpuinfo.sockets;
                node.cpu_model = cpuinfo.model;
            }
            if let Some(memory) = status.memory {
                node.max_memory = memory.total.or(node.max_memory);
            }
            node.kernel_version = status.kernel_version;
            node.pve_version = status.pveversion;
        }
        Ok(Err(err)) => warn!(node = %node.name, %err, "node status enrichment failed"),
        Err(_) => warn!(node = %node.name, "node status enrichment timed out"),
    }

    let semaphore = std::sync::Arc::new(Semaphore::new(enrichment_concurrency()));
    let mut handles = Vec::new();
    for guest in std::mem::take(&mut node.guests) {
        let permit = std::sync::Arc::clone(&semaphore).acquire_owned().await.unwrap();
        let pve = pve.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            enrich_guest(&pve, guest, &cancel).await
        }));
    }
    let mut enriched = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(guest) => enriched.push(guest),
            Err(err) => warn!(%err, "guest enrichment task panicked"),
        }
    }
    node.guests = enriched;
}

async fn enrich_guest(
    pve: &PveClient,
    mut guest: Guest,
    cancel: &CancellationToken,
) -> Guest {
    match tokio::time::timeout(
        ENRICHMENT_TIMEOUT,
        pve.guest_config(&guest.node, guest.id, to_guest_kind(guest.kind), true, cancel),
    )
    .await
    {
        Ok(Ok(config)) => {
            guest.agent_enabled = matches!(config.agent.as_deref(), Some(a) if a.starts_with('1'));
        }
        Ok(Err(err)) => warn!(node = %guest.node, vmid = guest.id, %err, "guest config enrichment failed"),
        Err(_) => warn!(node = %guest.node, vmid = guest.id, "guest config enrichment timed out"),
    }

    if guest.kind == GuestType::Qemu && guest.agent_enabled {
        match tokio::time::timeout(
            ENRICHMENT_TIMEOUT,
            pve.guest_agent_network_interfaces(&guest.node, guest.id, true, cancel),
        )
        .await
        {
            Ok(Ok(interfaces)) => {
                guest.agent_running = true;
                guest.ip = interfaces
                    .iter()
                    .flat_map(|i| i.ip_addresses.iter())
                    .next()
                    .map(|ip| ip.to_string());
                guest.net_interfaces = Some(interfaces);
            }
            Ok(Err(err)) => {
                warn!(node = %guest.node, vmid = guest.id, %err, "guest agent network interfaces unavailable");
            }
            Err(_) => warn!(node = %guest.node, vmid = guest.id, "guest agent query timed out"),
        }
    }

    guest.enriched = true;
    guest
}

fn to_guest_kind(kind: GuestType) -> GuestKind {
    match kind {
        GuestType::Qemu => GuestKind::Qemu,
        GuestType::Lxc => GuestKind::Lxc,
    }
}

fn enrichment_concurrency() -> usize {
    num_cpus::get().min(8).max(1)
}
