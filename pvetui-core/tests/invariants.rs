//! Property tests for the crate's cross-cutting invariants: cache TTL
//! expiry, cache namespace isolation, and selection preservation across
//! a `PageFilterState` snapshot swap.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use pvetui_core::cache::CacheFactory;
use pvetui_core::search::{Entity, EntityId, PageFilterState};

#[derive(Debug, Clone)]
struct Item {
    id: String,
    name: String,
}

impl Entity for Item {
    fn identity(&self) -> EntityId {
        self.id.clone()
    }
    fn search_name(&self) -> &str {
        &self.name
    }
    fn search_id(&self) -> &str {
        &self.id
    }
    fn search_node(&self) -> &str {
        "pve"
    }
    fn search_type(&self) -> &str {
        "qemu"
    }
    fn search_status(&self) -> &str {
        "running"
    }
    fn search_tags(&self) -> &[String] {
        &[]
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Invariant 3: for any non-negative TTL `d`, after `Set(k, v, d)`
    /// and a wall-clock sleep past `d`, `Get(k)` reports not-found.
    #[test]
    fn ttl_expiry_always_hides_an_expired_value(ttl_ms in 0u64..25, key in "[a-z]{1,8}") {
        let factory = CacheFactory::memory(100);
        let cache = factory.namespaced("default").unwrap();
        cache.set(&key, b"v".to_vec(), Duration::from_millis(ttl_ms)).unwrap();
        std::thread::sleep(Duration::from_millis(ttl_ms + 20));
        prop_assert_eq!(cache.get(&key).unwrap(), None);
    }

    /// Invariant 5: clearing the default-namespace cache never evicts a
    /// value set in a different namespace.
    #[test]
    fn clearing_default_namespace_never_evicts_other_namespaces(
        key in "[a-z]{1,8}",
        value in "[a-z0-9]{1,16}",
    ) {
        let factory = CacheFactory::memory(100);
        let default_cache = factory.namespaced("default").unwrap();
        let plugin_cache = factory.namespaced("plugin:x").unwrap();

        default_cache.set(&key, b"unrelated".to_vec(), Duration::from_secs(60)).unwrap();
        plugin_cache.set(&key, value.as_bytes().to_vec(), Duration::from_secs(60)).unwrap();

        default_cache.clear().unwrap();

        prop_assert_eq!(plugin_cache.get(&key).unwrap(), Some(value.into_bytes()));
    }

    /// Invariant 6: after a snapshot swap, an entity that existed in
    /// both the original and filtered view and still matches the
    /// current (empty) filter keeps its selection.
    #[test]
    fn selection_survives_swap_when_identity_persists_and_still_matches(
        ids in prop::collection::hash_set("[a-z]{1,6}", 2..8),
        reorder_seed in 0u64..1000,
    ) {
        let ids: Vec<String> = ids.into_iter().collect();
        let original: Vec<Item> =
            ids.iter().map(|id| Item { id: id.clone(), name: id.clone() }).collect();

        let mut state: PageFilterState<Item> = PageFilterState::new();
        state.rebuild(Arc::new(original));

        let selected_pos = (reorder_seed as usize) % ids.len();
        state.select(selected_pos);
        let selected_identity = state.selected().unwrap().identity();

        // Reorder deterministically (rotate) to simulate a later snapshot
        // with the same entities in a different order.
        let mut rotated = ids.clone();
        rotated.rotate_left((reorder_seed as usize) % ids.len().max(1));
        let new_snapshot: Vec<Item> =
            rotated.iter().map(|id| Item { id: id.clone(), name: id.clone() }).collect();

        state.rebuild(Arc::new(new_snapshot));

        prop_assert_eq!(state.selected().unwrap().identity(), selected_identity);
    }
}
