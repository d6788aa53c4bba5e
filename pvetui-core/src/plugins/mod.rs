//! Registration contract for node/guest actions contributed by
//! optional features. Plugin bodies are not this crate's concern —
//! only the registrar they publish into.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::cluster::{Guest, Node};
use crate::error::PveError;

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), PveError>> + Send>>;

/// Whatever state a plugin's action handler needs to reach the PVE
/// client, task manager, etc. Left opaque here; the host binary
/// defines the concrete type and threads it through.
pub trait ActionCtx: Send + Sync {}

pub struct NodeAction {
    pub id: &'static str,
    pub label: &'static str,
    pub is_available: Arc<dyn Fn(&Node) -> bool + Send + Sync>,
    pub handler: Arc<dyn Fn(&dyn ActionCtx, &Node) -> ActionFuture + Send + Sync>,
}

pub struct GuestAction {
    pub id: &'static str,
    pub label: &'static str,
    pub is_available: Arc<dyn Fn(&Guest) -> bool + Send + Sync>,
    pub handler: Arc<dyn Fn(&dyn ActionCtx, &Guest) -> ActionFuture + Send + Sync>,
}

impl fmt::Debug for NodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeAction").field("id", &self.id).field("label", &self.label).finish()
    }
}

impl fmt::Debug for GuestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestAction").field("id", &self.id).field("label", &self.label).finish()
    }
}

#[derive(Default)]
pub struct Registrar {
    node_actions: Vec<NodeAction>,
    guest_actions: Vec<GuestAction>,
}

impl Registrar {
    pub fn register_node_action(&mut self, action: NodeAction) {
        self.node_actions.push(action);
    }

    pub fn register_guest_action(&mut self, action: GuestAction) {
        self.guest_actions.push(action);
    }

    pub fn node_actions_for(&self, node: &Node) -> Vec<&NodeAction> {
        self.node_actions.iter().filter(|a| (a.is_available)(node)).collect()
    }

    pub fn guest_actions_for(&self, guest: &Guest) -> Vec<&GuestAction> {
        self.guest_actions.iter().filter(|a| (a.is_available)(guest)).collect()
    }
}

pub trait Plugin: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn initialize(&self, registrar: &mut Registrar) -> Result<(), PveError>;
    fn shutdown(&self) {}
    fn modal_page_names(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Starts empty; the host is the only caller that populates it by
/// calling `install`. `shutdown_all` must run before process exit —
/// enforced by a debug-time `Drop` check rather than silently ignoring
/// a missed call.
pub struct PluginManager {
    plugins: Mutex<Vec<Arc<dyn Plugin>>>,
    registrar: Mutex<Registrar>,
    shut_down: std::sync::atomic::AtomicBool,
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            plugins: Mutex::new(Vec::new()),
            registrar: Mutex::new(Registrar::default()),
            shut_down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn install(&self, plugin: Arc<dyn Plugin>) -> Result<(), PveError> {
        {
            let mut registrar = self.registrar.lock();
            plugin.initialize(&mut registrar)?;
        }
        self.plugins.lock().push(plugin);
        Ok(())
    }

    pub fn node_actions_for(&self, node: &Node) -> Vec<&'static str> {
        self.registrar.lock().node_actions_for(node).iter().map(|a| a.id).collect()
    }

    pub fn guest_actions_for(&self, guest: &Guest) -> Vec<&'static str> {
        self.registrar.lock().guest_actions_for(guest).iter().map(|a| a.id).collect()
    }

    pub fn shutdown_all(&self) {
        for plugin in self.plugins.lock().drain(..) {
            plugin.shutdown();
        }
        self.shut_down.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        if !self.shut_down.load(std::sync::atomic::Ordering::SeqCst) {
            error!("PluginManager dropped without shutdown_all() being called");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NoopPlugin;
    impl Plugin for NoopPlugin {
        fn id(&self) -> &'static str {
            "noop"
        }
        fn name(&self) -> &'static str {
            "Noop"
        }
        fn description(&self) -> &'static str {
            "does nothing"
        }
        fn initialize(&self, registrar: &mut Registrar) -> Result<(), PveError> {
            registrar.register_node_action(NodeAction {
                id: "noop.reboot",
                label: "Reboot",
                is_available: Arc::new(|n| n.online),
                handler: Arc::new(|_ctx, _node| Box::pin(async { Ok(()) })),
            });
            Ok(())
        }
    }

    fn node(online: bool) -> Node {
        Node {
            name: "pve1".into(),
            id: "node/pve1".into(),
            online,
            ip: None,
            uptime: 0,
            cpu_cores: None,
            cpu_sockets: None,
            cpu_model: None,
            max_memory: None,
            max_disk: None,
            kernel_version: None,
            pve_version: None,
            guests: Vec::new(),
            storages: Vec::new(),
            source_profile: None,
        }
    }

    #[test]
    fn plugin_starts_empty_and_only_host_populates_it() {
        let mgr = PluginManager::new();
        assert!(mgr.node_actions_for(&node(true)).is_empty());
        mgr.shutdown_all();
    }

    #[test]
    fn installed_action_is_available_only_when_predicate_holds() {
        let mgr = PluginManager::new();
        mgr.install(Arc::new(NoopPlugin)).unwrap();
        assert_eq!(mgr.node_actions_for(&node(true)), vec!["noop.reboot"]);
        assert!(mgr.node_actions_for(&node(false)).is_empty());
        mgr.shutdown_all();
    }

    #[test]
    fn shutdown_all_invokes_every_plugin_shutdown() {
        struct TrackedPlugin(Arc<AtomicBool>);
        impl Plugin for TrackedPlugin {
            fn id(&self) -> &'static str {
                "tracked"
            }
            fn name(&self) -> &'static str {
                "Tracked"
            }
            fn description(&self) -> &'static str {
                "tracks shutdown"
            }
            fn initialize(&self, _registrar: &mut Registrar) -> Result<(), PveError> {
                Ok(())
            }
            fn shutdown(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let flag = Arc::new(AtomicBool::new(false));
        let mgr = PluginManager::new();
        mgr.install(Arc::new(TrackedPlugin(Arc::clone(&flag)))).unwrap();
        mgr.shutdown_all();
        assert!(flag.load(Ordering::SeqCst));
    }
}
