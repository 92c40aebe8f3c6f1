use crate::value::Node;
use std::collections::HashMap;

/// Absolute id → materialized node.
///
/// Owned by the caller and passed to every resolve call that should see the
/// same objects, which is what makes references between messages work.
/// Single writer: calls sharing one index must not overlap.
#[derive(Debug, Default)]
pub struct Index {
    entries: HashMap<String, Node>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.entries.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Stores `node` under `id`, returning the entry it replaced.
    pub fn insert(&mut self, id: impl Into<String>, node: Node) -> Option<Node> {
        self.entries.insert(id.into(), node)
    }

    pub fn remove(&mut self, id: &str) -> Option<Node> {
        self.entries.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries still waiting for the object their reference names.
    pub fn lazy_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, node)| node.is_lazy())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
