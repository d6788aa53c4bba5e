use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use parking_lot::Mutex;

use crate::pve::{GuestKind, VncTarget};

/// Stable identifier derived from the target, so re-opening a console
/// for the same `(node, target)` reuses the existing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VncSessionId(pub u64);

#[derive(Debug, Clone)]
pub enum ConsoleTarget {
    NodeShell { node: String },
    Guest(VncTarget),
}

impl fmt::Display for ConsoleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleTarget::NodeShell { node } => write!(f, "node-shell:{node}"),
            ConsoleTarget::Guest(t) => write!(f, "{}:{}:{}", t.kind, t.node, t.vmid),
        }
    }
}

impl ConsoleTarget {
    pub fn session_id(&self) -> VncSessionId {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.to_string().hash(&mut hasher);
        VncSessionId(hasher.finish())
    }

    pub fn node(&self) -> &str {
        match self {
            ConsoleTarget::NodeShell { node } => node,
            ConsoleTarget::Guest(t) => &t.node,
        }
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Connected,
    Disconnected,
    Closed,
}

pub struct VncSession {
    pub id: VncSessionId,
    pub target: ConsoleTarget,
    pub local_port: u16,
    pub ticket: String,
    pub token: String,
    pub upstream_url: url::Url,
    pub created_at: Instant,
    state: Mutex<SessionStateInner>,
}

struct SessionStateInner {
    state: SessionState,
    last_activity: Instant,
    client_count: u32,
    disconnected_at: Option<Instant>,
}

/// A reconnect during this window returns a `Disconnected` session to
/// `Connected` rather than retiring it.
pub const DISCONNECT_GRACE: std::time::Duration = std::time::Duration::from_secs(5);
pub const IDLE_EVICTION_AGE: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

impl VncSession {
    pub fn new(
        id: VncSessionId,
        target: ConsoleTarget,
        local_port: u16,
        ticket: String,
        token: String,
        upstream_url: url::Url,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            target,
            local_port,
            ticket,
            token,
            upstream_url,
            created_at: now,
            state: Mutex::new(SessionStateInner {
                state: SessionState::Active,
                last_activity: now,
                client_count: 0,
                disconnected_at: None,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().state
    }

    pub fn last_activity(&self) -> Instant {
        self.state.lock().last_activity
    }

    pub fn client_count(&self) -> u32 {
        self.state.lock().client_count
    }

    pub fn touch(&self) {
        self.state.lock().last_activity = Instant::now();
    }

    pub fn on_client_connected(&self) {
        let mut guard = self.state.lock();
        guard.client_count += 1;
        guard.state = SessionState::Connected;
        guard.disconnected_at = None;
        guard.last_activity = Instant::now();
    }

    /// Called when a client socket closes. Transitions to
    /// `Disconnected` once no clients remain; the grace window is
    /// consumed by `should_close_after_grace`, called by the reaper.
    pub fn on_client_disconnected(&self) {
        let mut guard = self.state.lock();
        guard.client_count = guard.client_count.saturating_sub(1);
        if guard.client_count == 0 {
            guard.state = SessionState::Disconnected;
            guard.disconnected_at = Some(Instant::now());
        }
    }

    pub fn should_close_after_grace(&self) -> bool {
        let guard = self.state.lock();
        guard.state == SessionState::Disconnected
            && guard.disconnected_at.is_some_and(|t| t.elapsed() >= DISCONNECT_GRACE)
    }

    pub fn is_healthy_for_reuse(&self) -> bool {
        !matches!(self.state(), SessionState::Closed)
    }

    /// Called when a reopen request reuses a `Disconnected` session
    /// before a real client has connected. Cancels the pending grace
    /// eviction without touching `client_count`, which only a real
    /// `on_client_connected`/`on_client_disconnected` pair should move.
    pub fn cancel_pending_disconnect(&self) {
        let mut guard = self.state.lock();
        if guard.state == SessionState::Disconnected {
            guard.state = SessionState::Active;
            guard.disconnected_at = None;
        }
    }

    pub fn mark_closed(&self) {
        self.state.lock().state = SessionState::Closed;
    }

    pub fn should_reap(&self) -> bool {
        let guard = self.state.lock();
        guard.state == SessionState::Closed || guard.last_activity.elapsed() >= IDLE_EVICTION_AGE
    }
}

pub fn session_id_for(target: &ConsoleTarget) -> VncSessionId {
    target.session_id()
}

pub fn guest_target(node: String, vmid: u32, kind: GuestKind) -> ConsoleTarget {
    ConsoleTarget::Guest(VncTarget { node, vmid, kind })
}
