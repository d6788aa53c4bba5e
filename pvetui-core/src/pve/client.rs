//! Typed facade over the cache, auth, and HTTP engagement layers.
//!
//! Every read follows one rule: `stale_ok=false` blocks for a fresh
//! value; `stale_ok=true` returns whatever is cached (even expired)
//! and kicks a detached background refresh if it was stale, so the
//! *next* caller gets a fresh value without this one paying for it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::Cache;
use crate::error::PveError;
use crate::http::HttpEngagement;

use super::types::*;

const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct PveClient {
    http: HttpEngagement,
    cache: Arc<dyn Cache>,
}

impl PveClient {
    pub fn new(http: HttpEngagement, cache: Arc<dyn Cache>) -> Self {
        Self { http, cache }
    }

    /// The API base URL this client was configured against. Used by the
    /// VNC session manager to derive a node's console address with the
    /// same scheme/port rather than assuming a fixed default.
    pub fn base_url(&self) -> &url::Url {
        self.http.base_url()
    }

    async fn fetch_cached<T>(
        &self,
        path: String,
        cache_key: String,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<T, PveError>
    where
        T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
    {
        if stale_ok {
            if let Some((bytes, fresh)) = self.cache.get_stale(&cache_key)? {
                let value: T =
                    serde_json::from_slice(&bytes).map_err(|e| PveError::Decode(e.to_string()))?;
                if !fresh {
                    self.spawn_background_refresh::<T>(path, cache_key);
                }
                return Ok(value);
            }
            return self.fetch_and_store(&path, &cache_key, cancel).await;
        }

        if let Some(bytes) = self.cache.get(&cache_key)? {
            let value: T =
                serde_json::from_slice(&bytes).map_err(|e| PveError::Decode(e.to_string()))?;
            return Ok(value);
        }
        self.fetch_and_store(&path, &cache_key, cancel).await
    }

    async fn fetch_and_store<T>(
        &self,
        path: &str,
        cache_key: &str,
        cancel: &CancellationToken,
    ) -> Result<T, PveError>
    where
        T: DeserializeOwned + Serialize + Clone,
    {
        let value: T = tokio::select! {
            result = self.http.get_json(path) => result?,
            () = cancel.cancelled() => return Err(PveError::Cancelled),
        };
        let bytes = serde_json::to_vec(&value).map_err(|e| PveError::Decode(e.to_string()))?;
        self.cache.set(cache_key, bytes, DEFAULT_TTL)?;
        Ok(value)
    }

    fn spawn_background_refresh<T>(&self, path: String, cache_key: String)
    where
        T: DeserializeOwned + Serialize + Send + 'static,
    {
        let http = self.http.clone();
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            match http.get_json::<T>(&path).await {
                Ok(value) => match serde_json::to_vec(&value) {
                    Ok(bytes) => {
                        if let Err(err) = cache.set(&cache_key, bytes, DEFAULT_TTL) {
                            warn!(%cache_key, %err, "failed to store background refresh");
                        }
                    }
                    Err(err) => warn!(%cache_key, %err, "failed to encode background refresh"),
                },
                Err(err) => warn!(%cache_key, %err, "background refresh failed"),
            }
        });
    }

    pub async fn cluster_resources(
        &self,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<ClusterResourceRaw>, PveError> {
        self.fetch_cached(
            "cluster/resources".into(),
            "cluster_resources".into(),
            stale_ok,
            cancel,
        )
        .await
    }

    pub async fn cluster_status(
        &self,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, PveError> {
        self.fetch_cached("cluster/status".into(), "cluster_status".into(), stale_ok, cancel)
            .await
    }

    pub async fn version(
        &self,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, PveError> {
        self.fetch_cached("version".into(), "version".into(), stale_ok, cancel).await
    }

    pub async fn node_status(
        &self,
        node: &str,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<NodeStatusRaw, PveError> {
        self.fetch_cached(
            format!("nodes/{node}/status"),
            format!("node_status:{node}"),
            stale_ok,
            cancel,
        )
        .await
    }

    pub async fn node_disks(
        &self,
        node: &str,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiskRaw>, PveError> {
        self.fetch_cached(
            format!("nodes/{node}/disks/list"),
            format!("node_disks:{node}"),
            stale_ok,
            cancel,
        )
        .await
    }

    pub async fn node_updates(
        &self,
        node: &str,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<AptUpdateRaw>, PveError> {
        self.fetch_cached(
            format!("nodes/{node}/apt/update"),
            format!("node_updates:{node}"),
            stale_ok,
            cancel,
        )
        .await
    }

    pub async fn guest_status_current(
        &self,
        node: &str,
        vmid: u32,
        kind: GuestKind,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<GuestStatusRaw, PveError> {
        self.fetch_cached(
            format!("nodes/{node}/{kind}/{vmid}/status/current"),
            format!("guest_status:{node}:{vmid}"),
            stale_ok,
            cancel,
        )
        .await
    }

    pub async fn guest_config(
        &self,
        node: &str,
        vmid: u32,
        kind: GuestKind,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<GuestConfigRaw, PveError> {
        self.fetch_cached(
            format!("nodes/{node}/{kind}/{vmid}/config"),
            format!("guest_config:{node}:{vmid}"),
            stale_ok,
            cancel,
        )
        .await
    }

    /// Guest agent network interfaces. QEMU only — callers must not
    /// invoke this for LXC guests.
    pub async fn guest_agent_network_interfaces(
        &self,
        node: &str,
        vmid: u32,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<NetInterface>, PveError> {
        let raw: GuestAgentNetworkInterfacesRaw = self
            .fetch_cached(
                format!("nodes/{node}/qemu/{vmid}/agent/network-get-interfaces"),
                format!("guest_net_ifaces:{node}:{vmid}"),
                stale_ok,
                cancel,
            )
            .await?;
        Ok(raw
            .result
            .into_iter()
            .filter(|iface| iface.name != "lo")
            .map(|iface| NetInterface {
                name: iface.name,
                mac: iface.hardware_address.unwrap_or_default(),
                ip_addresses: iface
                    .ip_addresses
                    .iter()
                    .filter_map(|a| a.ip_address.parse().ok())
                    .collect(),
                tx_bytes: iface.statistics.as_ref().and_then(|s| s.tx_bytes).unwrap_or(0),
                rx_bytes: iface.statistics.as_ref().and_then(|s| s.rx_bytes).unwrap_or(0),
            })
            .collect())
    }

    pub async fn lifecycle(
        &self,
        node: &str,
        vmid: u32,
        kind: GuestKind,
        action: LifecycleAction,
    ) -> Result<Upid, PveError> {
        let verb = match action {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Shutdown => "shutdown",
            LifecycleAction::Reboot => "reboot",
        };
        let path = format!("nodes/{node}/{kind}/{vmid}/status/{verb}");
        let upid: String = self.http.post_json(&path, &[]).await?;
        Ok(Upid(upid))
    }

    pub async fn migrate(
        &self,
        node: &str,
        vmid: u32,
        kind: GuestKind,
        target_node: &str,
        online: bool,
    ) -> Result<Upid, PveError> {
        let path = format!("nodes/{node}/{kind}/{vmid}/migrate");
        let online_str = if online { "1" } else { "0" };
        let upid: String =
            self.http.post_json(&path, &[("target", target_node), ("online", online_str)]).await?;
        Ok(Upid(upid))
    }

    pub async fn destroy(
        &self,
        node: &str,
        vmid: u32,
        kind: GuestKind,
    ) -> Result<Upid, PveError> {
        let path = format!("nodes/{node}/{kind}/{vmid}");
        let upid: String = self.http.delete_json(&path).await?;
        Ok(Upid(upid))
    }

    pub async fn task_status(&self, node: &str, upid: &Upid) -> Result<TaskStatusRaw, PveError> {
        let path = format!("nodes/{node}/tasks/{}/status", upid.0);
        self.http.get_json(&path).await
    }

    pub async fn stop_task(&self, node: &str, upid: &Upid) -> Result<(), PveError> {
        let path = format!("nodes/{node}/tasks/{}", upid.0);
        let _: serde_json::Value = self.http.delete_json(&path).await?;
        Ok(())
    }

    pub async fn storage_content(
        &self,
        node: &str,
        storage_id: &str,
        stale_ok: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<StorageContentRaw>, PveError> {
        self.fetch_cached(
            format!("nodes/{node}/storage/{storage_id}/content"),
            format!("storage_content:{node}:{storage_id}"),
            stale_ok,
            cancel,
        )
        .await
    }

    pub async fn backup_create(
        &self,
        node: &str,
        vmid: u32,
        kind: GuestKind,
        storage_id: &str,
    ) -> Result<Upid, PveError> {
        let path = format!("nodes/{node}/vzdump");
        let vmid_str = vmid.to_string();
        let kind_str = kind.to_string();
        let upid: String = self
            .http
            .post_json(
                &path,
                &[("vmid", vmid_str.as_str()), ("storage", storage_id), ("mode", "snapshot")],
            )
            .await?;
        let _ = kind_str;
        Ok(Upid(upid))
    }

    pub async fn backup_restore(
        &self,
        node: &str,
        storage_id: &str,
        volume: &str,
        target_vmid: u32,
    ) -> Result<Upid, PveError> {
        let path = format!("nodes/{node}/qemu");
        let target_vmid_str = target_vmid.to_string();
        let archive = format!("{storage_id}:backup/{volume}");
        let upid: String = self
            .http
            .post_json(
                &path,
                &[("vmid", target_vmid_str.as_str()), ("archive", archive.as_str())],
            )
            .await?;
        Ok(Upid(upid))
    }

    pub async fn vnc_ticket(&self, target: &VncTarget) -> Result<VncProxyTicket, PveError> {
        let path = format!(
            "nodes/{}/{}/{}/vncproxy",
            target.node, target.kind, target.vmid
        );
        self.http.post_json(&path, &[("websocket", "1")]).await
    }

    /// Node-shell variant of `vnc_ticket`: hits `vncshell` instead of a
    /// guest's `vncproxy`, and never sends `generate-password` — the
    /// returned ticket itself doubles as the VNC password for a shell
    /// session.
    pub async fn vnc_ticket_node_shell(&self, node: &str) -> Result<VncProxyTicket, PveError> {
        let path = format!("nodes/{node}/vncshell");
        self.http.post_json(&path, &[("websocket", "1")]).await
    }

    pub fn vnc_websocket_url(
        &self,
        base: &url::Url,
        target: &VncTarget,
        ticket: &VncProxyTicket,
    ) -> Result<url::Url, PveError> {
        let path = format!(
            "api2/json/nodes/{}/{}/{}/vncwebsocket",
            target.node, target.kind, target.vmid
        );
        self.websocket_url(base, &path, ticket)
    }

    pub fn vnc_websocket_url_node_shell(
        &self,
        base: &url::Url,
        node: &str,
        ticket: &VncProxyTicket,
    ) -> Result<url::Url, PveError> {
        let path = format!("api2/json/nodes/{node}/vncwebsocket");
        self.websocket_url(base, &path, ticket)
    }

    fn websocket_url(
        &self,
        base: &url::Url,
        path: &str,
        ticket: &VncProxyTicket,
    ) -> Result<url::Url, PveError> {
        let mut url = base
            .join(path)
            .map_err(|e| PveError::Internal(format!("invalid vnc websocket url: {e}")))?;
        let ws_scheme = if base.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(ws_scheme)
            .map_err(|()| PveError::Internal("failed to set websocket scheme".into()))?;
        url.query_pairs_mut()
            .append_pair("port", &ticket.port)
            .append_pair("vncticket", &ticket.ticket);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenAuth;
    use crate::cache::CacheFactory;

    fn client(server_url: &str) -> PveClient {
        let auth: Arc<dyn crate::auth::AuthManager> =
            Arc::new(TokenAuth::new("u".into(), "pam".into(), "t".into(), "s".into()));
        let http = HttpEngagement::new(
            reqwest::Client::new(),
            auth,
            url::Url::parse(&format!("{server_url}/api2/json/")).unwrap(),
        );
        let factory = CacheFactory::memory(100);
        let cache = factory.namespaced("pve").unwrap();
        PveClient::new(http, cache)
    }

    #[tokio::test]
    async fn fresh_fetch_is_served_from_cache_on_second_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api2/json/version")
            .with_status(200)
            .with_body(r#"{"data":{"version":"8.2"}}"#)
            .expect(1)
            .create_async()
            .await;

        let pve = client(&server.url());
        let cancel = CancellationToken::new();
        let first = pve.version(false, &cancel).await.unwrap();
        let second = pve.version(false, &cancel).await.unwrap();
        assert_eq!(first, second);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_cache_miss() {
        let server = mockito::Server::new_async().await;
        let pve = client(&server.url());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = pve.version(false, &cancel).await;
        assert!(matches!(result, Err(PveError::Cancelled)));
    }

    #[tokio::test]
    async fn guest_agent_network_interfaces_filters_loopback() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api2/json/nodes/pve1/qemu/100/agent/network-get-interfaces")
            .with_status(200)
            .with_body(
                r#"{"data":{"result":[
                    {"name":"lo","hardware-address":"00:00:00:00:00:00","ip-addresses":[],"statistics":{"tx-bytes":0,"rx-bytes":0}},
                    {"name":"eth0","hardware-address":"aa:bb:cc:dd:ee:ff","ip-addresses":[{"ip-address":"10.0.0.5"}],"statistics":{"tx-bytes":10,"rx-bytes":20}}
                ]}}"#,
            )
            .create_async()
            .await;

        let pve = client(&server.url());
        let cancel = CancellationToken::new();
        let interfaces =
            pve.guest_agent_network_interfaces("pve1", 100, false, &cancel).await.unwrap();
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0].name, "eth0");
        assert_eq!(interfaces[0].tx_bytes, 10);
    }

    #[tokio::test]
    async fn node_shell_ticket_hits_vncshell_not_vncproxy() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api2/json/nodes/pve1/vncshell")
            .with_status(200)
            .with_body(r#"{"data":{"ticket":"shell-ticket","port":"5901"}}"#)
            .create_async()
            .await;

        let pve = client(&server.url());
        let ticket = pve.vnc_ticket_node_shell("pve1").await.unwrap();
        assert_eq!(ticket.ticket, "shell-ticket");
        mock.assert_async().await;
    }

    #[test]
    fn node_shell_websocket_url_has_no_guest_segment() {
        let pve = client("https://pve.example:8006");
        let base = url::Url::parse("https://pve1.example:8006/").unwrap();
        let ticket = VncProxyTicket { ticket: "shell-ticket".into(), port: "5901".into(), cert: None };
        let url = pve.vnc_websocket_url_node_shell(&base, "pve1", &ticket).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/api2/json/nodes/pve1/vncwebsocket");
        assert!(url.query().unwrap().contains("vncticket=shell-ticket"));
    }
}
