//! List/filter/selection state that keeps a UI page consistent across
//! live snapshot swaps and concurrent user filtering.

use std::sync::Arc;

pub type EntityId = String;

/// Shared search surface for `Node` and `Guest`: both expose the same
/// fixed set of filterable fields.
pub trait Entity {
    fn identity(&self) -> EntityId;
    fn search_name(&self) -> &str;
    fn search_id(&self) -> &str;
    fn search_node(&self) -> &str;
    fn search_type(&self) -> &str;
    fn search_status(&self) -> &str;
    fn search_tags(&self) -> &[String];
}

#[derive(Debug, Clone, Default)]
pub struct AdvancedFilter {
    pub status: Option<String>,
    pub guest_type: Option<String>,
    pub node: Option<String>,
    pub tag_contains: Option<String>,
}

impl AdvancedFilter {
    fn matches<T: Entity>(&self, entity: &T) -> bool {
        if let Some(status) = &self.status
            && !entity.search_status().eq_ignore_ascii_case(status)
        {
            return false;
        }
        if let Some(guest_type) = &self.guest_type
            && !entity.search_type().eq_ignore_ascii_case(guest_type)
        {
            return false;
        }
        if let Some(node) = &self.node
            && !entity.search_node().eq_ignore_ascii_case(node)
        {
            return false;
        }
        if let Some(tag) = &self.tag_contains
            && !entity.search_tags().iter().any(|t| t.eq_ignore_ascii_case(tag))
        {
            return false;
        }
        true
    }
}

/// `filtered` holds indices into `original` rather than cloned
/// entities, so filtering never copies the underlying list.
pub struct PageFilterState<T: Entity> {
    original: Arc<Vec<T>>,
    filtered: Vec<usize>,
    filter_text: String,
    advanced: AdvancedFilter,
    selected_index: usize,
}

impl<T: Entity> PageFilterState<T> {
    pub fn new() -> Self {
        Self {
            original: Arc::new(Vec::new()),
            filtered: Vec::new(),
            filter_text: String::new(),
            advanced: AdvancedFilter::default(),
            selected_index: 0,
        }
    }

    pub fn filtered_len(&self) -> usize {
        self.filtered.len()
    }

    pub fn selected_index(&self) -> usize {
        self.selected_index
    }

    pub fn selected(&self) -> Option<&T> {
        self.filtered.get(self.selected_index).map(|&i| &self.original[i])
    }

    pub fn visible(&self) -> impl Iterator<Item = &T> {
        self.filtered.iter().map(move |&i| &self.original[i])
    }

    pub fn set_filter_text(&mut self, text: String) {
        self.filter_text = text;
        self.reapply_filter();
    }

    pub fn set_advanced(&mut self, advanced: AdvancedFilter) {
        self.advanced = advanced;
        self.reapply_filter();
    }

    pub fn select(&mut self, index: usize) {
        if index < self.filtered.len() {
            self.selected_index = index;
        }
    }

    /// Rebuilds `original` from a fresh snapshot, re-applies the
    /// current filter, and preserves selection by entity identity —
    /// not by index, which would drift under insertions/removals.
    pub fn rebuild(&mut self, new_original: Arc<Vec<T>>) {
        let previous_identity = self.selected().map(|e| e.identity());
        self.original = new_original;
        self.reapply_filter();

        if let Some(identity) = previous_identity {
            if let Some(new_pos) =
                self.filtered.iter().position(|&i| self.original[i].identity() == identity)
            {
                self.selected_index = new_pos;
                return;
            }
        }
        self.selected_index = 0;
    }

    fn reapply_filter(&mut self) {
        let needle = self.filter_text.to_ascii_lowercase();
        self.filtered = self
            .original
            .iter()
            .enumerate()
            .filter(|(_, e)| matches_text(*e, &needle) && self.advanced.matches(*e))
            .map(|(i, _)| i)
            .collect();
        if self.selected_index >= self.filtered.len() {
            self.selected_index = self.filtered.len().saturating_sub(1).min(self.selected_index);
        }
    }
}

impl<T: Entity> Default for PageFilterState<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_text<T: Entity>(entity: &T, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    entity.search_name().to_ascii_lowercase().contains(needle)
        || entity.search_id().to_ascii_lowercase().contains(needle)
        || entity.search_node().to_ascii_lowercase().contains(needle)
        || entity.search_type().to_ascii_lowercase().contains(needle)
        || entity.search_tags().iter().any(|t| t.to_ascii_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Item {
        id: String,
        name: String,
        node: String,
        kind: String,
        tags: Vec<String>,
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
            &self.node
        }
        fn search_type(&self) -> &str {
            &self.kind
        }
        fn search_status(&self) -> &str {
            "running"
        }
        fn search_tags(&self) -> &[String] {
            &self.tags
        }
    }

    fn item(id: &str, name: &str) -> Item {
        Item { id: id.into(), name: name.into(), node: "pve".into(), kind: "qemu".into(), tags: vec![] }
    }

    #[test]
    fn filter_text_matches_case_insensitively_across_fields() {
        let mut state = PageFilterState::new();
        state.rebuild(Arc::new(vec![item("100", "Web"), item("101", "db")]));
        state.set_filter_text("WEB".into());
        assert_eq!(state.filtered_len(), 1);
        assert_eq!(state.selected().unwrap().id, "100");
    }

    #[test]
    fn selection_survives_snapshot_swap_by_identity_not_index() {
        let mut state = PageFilterState::new();
        state.rebuild(Arc::new(vec![item("100", "web"), item("101", "db")]));
        state.select(1);
        assert_eq!(state.selected().unwrap().id, "101");

        // new snapshot reorders and adds an entry ahead of the selection
        state.rebuild(Arc::new(vec![item("099", "new"), item("101", "db"), item("100", "web")]));
        assert_eq!(state.selected().unwrap().id, "101");
    }

    #[test]
    fn selection_clamps_to_zero_when_previous_entity_is_gone() {
        let mut state = PageFilterState::new();
        state.rebuild(Arc::new(vec![item("100", "web"), item("101", "db")]));
        state.select(1);
        state.rebuild(Arc::new(vec![item("200", "new")]));
        assert_eq!(state.selected_index(), 0);
    }
}
