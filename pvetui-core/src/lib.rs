//! # pvetui-core
//!
//! Runtime library backing `pvetui`, a terminal control plane for
//! Proxmox VE clusters. This crate owns every stateful collaborator
//! the UI layer drives: authentication, the cached/retried HTTP
//! engagement with a cluster's API, the polled cluster model, the
//! lifecycle/migration task manager, and the per-session VNC bridge.
//! It has no rendering code of its own.
//!
//! ## Layout
//!
//! - `config`: shapes for connection/runtime settings, populated by an
//!   external loader.
//! - `error`: the shared `PveError` taxonomy plus retry classification.
//! - `cache`: namespaced two-tier (memory + optional on-disk) cache.
//! - `auth`: ticket and API-token authentication strategies.
//! - `http`: the single retrying/reauthenticating HTTP engagement.
//! - `pve`: typed operations against the PVE API.
//! - `cluster`: the polled model (`ClusterStore`) and its enrichment pipeline.
//! - `tasks`: the lifecycle/migration task manager.
//! - `vnc`: the per-session VNC WebSocket bridge.
//! - `search`: list filter/selection state shared by node and guest pages.
//! - `plugins`: the opt-in action registrar.
//! - `pid_lock`: the single-instance guard.
//! - `format`: vmid parsing and uptime/byte formatting boundary rules.

pub mod auth;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod format;
pub mod http;
pub mod pid_lock;
pub mod plugins;
pub mod pve;
pub mod search;
pub mod tasks;
pub mod vnc;

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cache::CacheFactory;
use cluster::{Cluster, ClusterStore};
use config::Config;
use error::PveError;
use http::HttpEngagement;
use plugins::PluginManager;
use pve::PveClient;
use tasks::{TaskEvent, TaskManager};
use vnc::VncSessionManager;

const DEFAULT_CACHE_NAMESPACE: &str = "default";

/// Everything the UI layer needs handed to it at startup: the shared
/// client, the polled model, the task queue, the VNC bridge, and the
/// plugin registrar, wired together from one validated `Config`.
pub struct Engine {
    pub config: Config,
    pub pve: PveClient,
    pub cluster: Arc<ClusterStore>,
    pub tasks: Arc<TaskManager>,
    pub vnc: Arc<VncSessionManager>,
    pub plugins: Arc<PluginManager>,
    cache_factory: Arc<CacheFactory>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Validates `config`, builds the HTTP client and auth strategy,
    /// and wires every collaborator together. Does not perform any
    /// network I/O itself — the first `cluster.refresh()` call does.
    pub async fn build(config: Config, max_concurrent_tasks: usize) -> Result<Self, PveError> {
        config.validate()?;
        let conn = config.effective_connection();

        let mut client_builder = Client::builder().timeout(http::DEFAULT_TIMEOUT);
        if conn.insecure {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }
        let http_client = client_builder
            .build()
            .map_err(|e| PveError::ConfigInvalid(format!("failed to build HTTP client: {e}")))?;

        let auth = auth::build_auth_manager(&conn, Arc::new(http_client.clone()))?;
        let base_url = base_url(&conn)?;
        let engagement = HttpEngagement::new(http_client, auth, base_url);

        let cache_factory = Arc::new(match &config.runtime.cache_dir {
            Some(dir) => CacheFactory::persistent(dir.clone(), cache::DEFAULT_MAX_MEMORY_ENTRIES),
            None => CacheFactory::memory(cache::DEFAULT_MAX_MEMORY_ENTRIES),
        });
        let cache = cache_factory.namespaced(DEFAULT_CACHE_NAMESPACE)?;

        let pve = PveClient::new(engagement, cache);
        let cluster = ClusterStore::new(pve.clone());
        let tasks = TaskManager::new(pve.clone(), max_concurrent_tasks);
        let vnc = VncSessionManager::new(pve.clone());
        let plugins = Arc::new(PluginManager::new());

        info!(addr = %conn.addr, user = %conn.user, "engine ready");

        Ok(Self {
            config,
            pve,
            cluster,
            tasks,
            vnc,
            plugins,
            cache_factory,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token background refresh loops and long-running calls should
    /// observe so a shutdown can interrupt them promptly.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn cluster_snapshot(&self) -> Arc<Cluster> {
        self.cluster.snapshot()
    }

    pub fn subscribe_cluster_changes(&self) -> watch::Receiver<()> {
        self.cluster.subscribe()
    }

    pub fn subscribe_task_events(&self) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.tasks.subscribe()
    }

    /// Orderly shutdown: cancels outstanding refreshes, closes every
    /// VNC session, runs plugin teardown, and flushes caches to disk.
    pub async fn shutdown(&self) -> Result<(), PveError> {
        self.shutdown.cancel();
        self.vnc.shutdown();
        self.plugins.shutdown_all();
        self.cache_factory.close_all()?;
        Ok(())
    }
}

fn base_url(conn: &config::ConnectionConfig) -> Result<url::Url, PveError> {
    let mut url = url::Url::parse(&conn.addr)
        .map_err(|e| PveError::ConfigInvalid(format!("invalid addr '{}': {e}", conn.addr)))?;
    let path = format!("{}/", conn.api_path.trim_end_matches('/').trim_start_matches('/'));
    url.set_path(&path);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{ConnectionConfig, Credentials, RuntimeConfig};
    use std::collections::HashMap;

    fn config_with_addr(addr: &str) -> Config {
        Config {
            connection: ConnectionConfig {
                addr: addr.into(),
                user: "root".into(),
                realm: "pam".into(),
                credentials: Credentials::ApiToken {
                    token_id: "automation".into(),
                    token_secret: "secret".into(),
                },
                insecure: false,
                api_path: "/api2/json".into(),
            },
            runtime: RuntimeConfig::default(),
            profiles: HashMap::new(),
            active_profile: None,
        }
    }

    #[tokio::test]
    async fn build_wires_every_collaborator_without_network_io() {
        let engine = Engine::build(config_with_addr("https://pve.example:8006"), 4)
            .await
            .unwrap();
        assert_eq!(engine.cluster.snapshot().nodes.len(), 0);
        assert_eq!(engine.vnc.count(), 0);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn build_rejects_invalid_config_before_any_io() {
        let mut config = config_with_addr("https://pve.example:8006");
        config.connection.user.clear();
        let result = Engine::build(config, 4).await;
        assert!(matches!(result, Err(PveError::ConfigInvalid(_))));
    }

    #[test]
    fn base_url_normalizes_api_path_with_trailing_slash() {
        let conn = ConnectionConfig {
            addr: "https://pve.example:8006".into(),
            user: "root".into(),
            realm: "pam".into(),
            credentials: Credentials::Password("x".into()),
            insecure: false,
            api_path: "/api2/json".into(),
        };
        let url = base_url(&conn).unwrap();
        assert_eq!(url.as_str(), "https://pve.example:8006/api2/json/");
    }
}
