use crate::value::{Node, Value};

/// Receives the notifications a resolve call produces.
///
/// `on_update` fires once per key whose value changed while merging into an
/// existing entry; removals report `Value::Undefined` as the new value and
/// additions report it as the old one. `on_load` fires once a newly
/// materialized node is fully populated.
pub trait ChangeSink {
    fn on_update(&mut self, _target: &Node, _key: &str, _old: &Value, _new: &Value) {}

    fn on_load(&mut self, _target: &Node) {}
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ChangeSink for NoopSink {}

#[derive(Debug, Clone)]
pub enum Change {
    Update {
        target: Node,
        key: String,
        old: Value,
        new: Value,
    },
    Load {
        target: Node,
    },
}

/// Records notifications in arrival order.
#[derive(Debug, Default, Clone)]
pub struct ChangeLog {
    pub changes: Vec<Change>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(key, old, new)` for every update, in order.
    pub fn updates(&self) -> Vec<(String, Value, Value)> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                Change::Update { key, old, new, .. } => {
                    Some((key.clone(), old.clone(), new.clone()))
                }
                Change::Load { .. } => None,
            })
            .collect()
    }

    pub fn loads(&self) -> Vec<Node> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                Change::Load { target } => Some(target.clone()),
                Change::Update { .. } => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

impl ChangeSink for ChangeLog {
    fn on_update(&mut self, target: &Node, key: &str, old: &Value, new: &Value) {
        self.changes.push(Change::Update {
            target: target.clone(),
            key: key.to_string(),
            old: old.clone(),
            new: new.clone(),
        });
    }

    fn on_load(&mut self, target: &Node) {
        self.changes.push(Change::Load {
            target: target.clone(),
        });
    }
}
