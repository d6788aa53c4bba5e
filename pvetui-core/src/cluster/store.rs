//! Holds the current cluster snapshot and runs the two-phase refresh.
//!
//! The whole-`Cluster` replace goes through `arc_swap::ArcSwap`, which
//! satisfies "readers see either the old or new value, never partial"
//! with a single atomic pointer swap rather than a lock a reader could
//! block a writer on. Enrichment still mutates per-`Node` state behind
//! a `parking_lot::RwLock` before that node is folded back into the
//! next published `Cluster`, matching the per-entity swap language
//! literally at the node level while the store itself publishes whole
//! clusters (see DESIGN.md for why both exist).

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::PveError;
use crate::pve::PveClient;

use super::enrich::{enrich_node, skeleton};
use super::model::{Cluster, Node};

/// Upper bound on nodes enriched in parallel during one refresh, mirroring
/// the per-node guest enrichment pool's sizing in `enrich.rs`.
fn node_enrichment_concurrency() -> usize {
    num_cpus::get().min(8).max(1)
}

pub struct ClusterStore {
    pve: PveClient,
    current: ArcSwap<Cluster>,
    staging_nodes: RwLock<HashMap<String, Node>>,
    changed: watch::Sender<()>,
}

impl ClusterStore {
    pub fn new(pve: PveClient) -> Arc<Self> {
        let (changed, _) = watch::channel(());
        Arc::new(Self {
            pve,
            current: ArcSwap::from_pointee(Cluster::empty(String::new(), String::new())),
            staging_nodes: RwLock::new(HashMap::new()),
            changed,
        })
    }

    pub fn snapshot(&self) -> Arc<Cluster> {
        self.current.load_full()
    }

    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.changed.subscribe()
    }

    /// Builds the coarse skeleton, publishes it immediately, then
    /// enriches every node through a bounded worker pool (the same
    /// semaphore-permit idiom `enrich_node` uses for guests within a
    /// node) and republishes as each node's enrichment lands, without
    /// blocking the initial publish — or any other node's enrichment —
    /// on the slowest one.
    pub async fn refresh(self: &Arc<Self>, cancel: &CancellationToken) -> Result<(), PveError> {
        let resources = self.pve.cluster_resources(false, cancel).await?;
        let version = match self.pve.version(true, cancel).await {
            Ok(value) => value.get("version").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
            Err(_) => "unknown".to_string(),
        };

        let skeleton = skeleton("cluster".to_string(), version, &resources).recompute();
        self.publish(skeleton.clone());

        {
            let mut staging = self.staging_nodes.write();
            staging.clear();
            for node in &skeleton.nodes {
                staging.insert(node.name.clone(), node.clone());
            }
        }

        let semaphore = Arc::new(Semaphore::new(node_enrichment_concurrency()));
        let mut handles = Vec::new();
        for node in skeleton.nodes {
            if cancel.is_cancelled() {
                return Err(PveError::Cancelled);
            }
            let permit = Arc::clone(&semaphore).acquire_owned().await.unwrap();
            let store = Arc::clone(self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let mut node = node;
                enrich_node(&store.pve, &mut node, &cancel).await;
                store.staging_nodes.write().insert(node.name.clone(), node);
                store.republish_from_staging();
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(%err, "node enrichment task panicked");
            }
        }

        Ok(())
    }

    fn republish_from_staging(&self) {
        let staging = self.staging_nodes.read();
        let previous = self.current.load();
        let mut nodes: Vec<Node> = staging.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        let cluster = Cluster {
            name: previous.name.clone(),
            version: previous.version.clone(),
            nodes,
            aggregates: previous.aggregates.clone(),
        }
        .recompute();
        drop(previous);
        self.publish(cluster);
    }

    fn publish(&self, cluster: Cluster) {
        self.current.store(Arc::new(cluster));
        let _ = self.changed.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenAuth;
    use crate::cache::CacheFactory;

    fn store_for(server_url: &str) -> Arc<ClusterStore> {
        let auth: Arc<dyn crate::auth::AuthManager> =
            Arc::new(TokenAuth::new("u".into(), "pam".into(), "t".into(), "s".into()));
        let http = crate::http::HttpEngagement::new(
            reqwest::Client::new(),
            auth,
            url::Url::parse(&format!("{server_url}/api2/json/")).unwrap(),
        );
        let cache = CacheFactory::memory(100).namespaced("cluster").unwrap();
        ClusterStore::new(PveClient::new(http, cache))
    }

    #[tokio::test]
    async fn refresh_publishes_skeleton_with_nodes_and_guests() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api2/json/cluster/resources")
            .with_status(200)
            .with_body(
                r#"{"data":[
                    {"type":"node","node":"pve1","id":"node/pve1","status":"online","maxcpu":4,"maxmem":1000,"uptime":100},
                    {"type":"qemu","node":"pve1","vmid":100,"name":"web","status":"running","cpu":0.2,"mem":500,"maxmem":1000}
                ]}"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/api2/json/version")
            .with_status(200)
            .with_body(r#"{"data":{"version":"8.2"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api2/json/nodes/pve1/status")
            .with_status(500)
            .create_async()
            .await;

        let store = store_for(&server.url());
        let cancel = CancellationToken::new();
        store.refresh(&cancel).await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.version, "8.2");
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.nodes[0].guests.len(), 1);
        assert_eq!(snapshot.aggregates.online_nodes, 1);
    }
}
