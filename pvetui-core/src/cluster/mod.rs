//! Cluster entities and the store that holds the latest refreshed
//! snapshot, enriched asynchronously and observable by the UI.

mod enrich;
mod model;
mod store;

pub use model::{Cluster, ClusterAggregates, Guest, GuestStatus, GuestType, Node, Storage};
pub use store::ClusterStore;
