//! Multi-session WebSocket reverse proxy bridging a locally served
//! client to PVE's authenticated VNC WebSocket endpoint.

mod server;
mod session;

pub use session::{ConsoleTarget, SessionState, VncSession, VncSessionId};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::warn;
use url::Url;

use crate::error::PveError;
use crate::pve::{GuestKind, PveClient};

const REAP_INTERVAL: Duration = Duration::from_secs(30 * 60);

pub struct VncSessionManager {
    pve: PveClient,
    sessions: RwLock<std::collections::HashMap<VncSessionId, Arc<VncSession>>>,
    reaper: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl VncSessionManager {
    pub fn new(pve: PveClient) -> Arc<Self> {
        let manager = Arc::new(Self {
            pve,
            sessions: RwLock::new(std::collections::HashMap::new()),
            reaper: std::sync::Mutex::new(None),
        });
        let reaper_handle = spawn_reaper(Arc::clone(&manager));
        *manager.reaper.lock().unwrap() = Some(reaper_handle);
        manager
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns an existing healthy session for `target` if one
    /// exists, otherwise opens a fresh one with a new upstream ticket.
    pub async fn open(&self, target: ConsoleTarget) -> Result<Url, PveError> {
        let id = session::session_id_for(&target);

        if let Some(existing) = self.sessions.read().get(&id).cloned()
            && existing.is_healthy_for_reuse()
        {
            existing.cancel_pending_disconnect();
            return Ok(local_url(&existing));
        }

        let (ticket, upstream_url) = self.obtain_ticket(&target).await?;
        let (port, listener) = server::bind_ephemeral().await?;

        let session = Arc::new(VncSession::new(
            id.clone(),
            target,
            port,
            ticket.clone(),
            ticket,
            upstream_url,
        ));
        server::serve(listener, Arc::clone(&session));

        let url = local_url(&session);
        self.sessions.write().insert(id, session);
        Ok(url)
    }

    async fn obtain_ticket(&self, target: &ConsoleTarget) -> Result<(String, Url), PveError> {
        // Same scheme/port as the configured PVE endpoint, but addressed
        // at this target's own node rather than the (possibly different)
        // cluster entry point the client was built against.
        let mut base = self.pve.base_url().clone();
        base.set_path("/");
        base.set_query(None);
        base.set_host(Some(target.node()))
            .map_err(|e| PveError::Internal(format!("invalid node address: {e}")))?;

        match target {
            // Node shells authenticate with the proxy ticket itself and
            // must not request a generated VNC password; `vnc_ticket_node_shell`
            // never sends `generate-password`, matching the guest path's
            // fixed `[("websocket", "1")]` body.
            ConsoleTarget::NodeShell { node } => {
                let ticket = self.pve.vnc_ticket_node_shell(node).await?;
                let ws_url = self.pve.vnc_websocket_url_node_shell(&base, node, &ticket)?;
                Ok((ticket.ticket, ws_url))
            }
            ConsoleTarget::Guest(vnc_target) => {
                let ticket = self.pve.vnc_ticket(vnc_target).await?;
                let ws_url = self.pve.vnc_websocket_url(&base, vnc_target, &ticket)?;
                Ok((ticket.ticket, ws_url))
            }
        }
    }

    pub fn close(&self, id: &VncSessionId) {
        if let Some(session) = self.sessions.write().remove(id) {
            session.mark_closed();
        }
    }

    pub fn reap(&self) {
        let to_evict: Vec<VncSessionId> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, s)| s.should_reap() || s.should_close_after_grace())
            .map(|(id, _)| id.clone())
            .collect();
        for id in to_evict {
            self.close(&id);
        }
    }

    pub fn shutdown(&self) {
        let ids: Vec<VncSessionId> = self.sessions.read().keys().cloned().collect();
        for id in ids {
            self.close(&id);
        }
        if let Some(handle) = self.reaper.lock().unwrap().take() {
            handle.abort();
        }
    }
}

fn local_url(session: &VncSession) -> Url {
    let mut url = Url::parse(&format!("http://127.0.0.1:{}/vnc.html", session.local_port))
        .expect("loopback url is always valid");
    url.query_pairs_mut().append_pair("ticket", &session.ticket);
    url
}

fn spawn_reaper(manager: Arc<VncSessionManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        loop {
            interval.tick().await;
            manager.reap();
        }
    })
}

pub fn guest_console_target(node: String, vmid: u32, kind: GuestKind) -> ConsoleTarget {
    session::guest_target(node, vmid, kind)
}

pub fn node_shell_target(node: String) -> ConsoleTarget {
    ConsoleTarget::NodeShell { node }
}

impl Drop for VncSessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.lock().unwrap().take() {
            handle.abort();
        } else {
            warn!("VncSessionManager dropped without shutdown() being called first");
        }
    }
}
