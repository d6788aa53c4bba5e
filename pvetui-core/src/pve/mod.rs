//! Typed PVE API surface: wire types plus the caching client built on
//! top of the cache/auth/http layers.

mod client;
pub mod types;

pub use client::PveClient;
pub use types::{GuestKind, LifecycleAction, NetInterface, Upid, VncProxyTicket, VncTarget};
