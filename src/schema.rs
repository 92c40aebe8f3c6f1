use crate::error::ConfigError;
use crate::value::{Node, Prototype};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

/// Schema for a record (or for the value under one property of a record).
///
/// Only two things are taken from a schema: which property strings are
/// `date-time` formatted, and how new records are constructed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Schema {
    pub properties: BTreeMap<String, Schema>,
    pub format: Option<String>,
    #[serde(skip)]
    pub constructor: Constructor,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// A property schema marking its value as an ISO-8601 timestamp.
    pub fn date_time() -> Self {
        Schema {
            format: Some("date-time".to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    #[must_use]
    pub fn with_prototype(mut self, prototype: Rc<Prototype>) -> Self {
        self.constructor = Constructor::Typed(prototype);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Schema> {
        self.properties.get(name)
    }

    pub fn is_date_time(&self) -> bool {
        self.format.as_deref() == Some("date-time")
    }
}

/// How the resolver allocates a record that is not yet in the index.
#[derive(Debug, Clone, Default)]
pub enum Constructor {
    /// Keep the decoded node as the record.
    #[default]
    Plain,
    /// Allocate a fresh node inheriting from the prototype and copy the
    /// decoded properties into it.
    Typed(Rc<Prototype>),
}

impl Constructor {
    /// A new target node, or `None` when the decoded node should be kept.
    pub fn construct(&self) -> Option<Node> {
        match self {
            Constructor::Plain => None,
            Constructor::Typed(prototype) => Some(Node::with_prototype(prototype.clone())),
        }
    }
}

/// Schemas keyed by the id prefix of the table they describe, e.g. `/User/`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, prefix: impl Into<String>, schema: Schema) {
        self.schemas.insert(prefix.into(), schema);
    }

    #[must_use]
    pub fn with(mut self, prefix: impl Into<String>, schema: Schema) -> Self {
        self.insert(prefix, schema);
        self
    }

    pub fn get(&self, prefix: &str) -> Option<&Schema> {
        self.schemas.get(prefix)
    }

    pub fn get_mut(&mut self, prefix: &str) -> Option<&mut Schema> {
        self.schemas.get_mut(prefix)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// The schema for a record with this absolute id. Only direct table ids
    /// qualify: `<prefix>/<local>` where `<local>` has no path steps.
    pub fn for_id(&self, id: &str) -> Option<&Schema> {
        table_prefix(id).and_then(|prefix| self.get(prefix))
    }

    /// # Errors
    /// Returns a `ConfigError` if the text is not a JSON map of schemas.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    /// Returns a `ConfigError` if the text is not a YAML map of schemas.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Loads a registry from a `.yaml`/`.yml` or JSON file.
    ///
    /// # Errors
    /// Returns a `ConfigError` if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            _ => Self::from_json_str(&text),
        }
    }
}

fn table_prefix(id: &str) -> Option<&str> {
    let slash = id.rfind('/')?;
    if slash == 0 || id[slash + 1..].contains(['.', '[', '#']) {
        return None;
    }
    Some(&id[..=slash])
}
