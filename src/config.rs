use crate::error::ConfigError;
use crate::resolver::ResolveOptions;
use crate::schema::SchemaRegistry;
use crate::serializer::SerializeOptions;
use serde::Deserialize;
use std::path::Path;

/// Host-facing settings, as read from a JSON or YAML file.
///
/// Keys are camelCase (`idAttribute`, `prettyPrint`, ...). Anything left
/// out takes the same default as the option structs it produces. Loaders
/// and fetchers are code, so they are attached to the produced
/// [`ResolveOptions`] by the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub id_attribute: String,
    pub id_prefix: String,
    pub assign_absolute_ids: bool,
    pub default_id: Option<String>,
    pub schemas: SchemaRegistry,
    pub pretty_print: bool,
    pub use_refs: bool,
    pub serialize_functions: bool,
    pub keep_generated_ids: bool,
    pub indent: String,
}

impl Default for Config {
    fn default() -> Self {
        let resolve = ResolveOptions::default();
        let serialize = SerializeOptions::default();
        Config {
            id_attribute: resolve.id_attribute,
            id_prefix: resolve.id_prefix,
            assign_absolute_ids: resolve.assign_absolute_ids,
            default_id: resolve.default_id,
            schemas: SchemaRegistry::default(),
            pretty_print: serialize.pretty_print,
            use_refs: serialize.use_refs,
            serialize_functions: serialize.serialize_functions,
            keep_generated_ids: serialize.keep_generated_ids,
            indent: serialize.indent,
        }
    }
}

impl Config {
    /// # Errors
    /// Returns a `ConfigError` if the text is not a valid JSON config.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    /// Returns a `ConfigError` if the text is not a valid YAML config.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reads a `.yaml`/`.yml` or JSON config file.
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

    pub fn resolve_options(&self) -> ResolveOptions {
        let mut options = ResolveOptions::new()
            .with_id_attribute(self.id_attribute.clone())
            .with_id_prefix(self.id_prefix.clone())
            .assign_absolute_ids(self.assign_absolute_ids);
        if !self.schemas.is_empty() {
            options = options.with_schemas(self.schemas.clone());
        }
        options.default_id.clone_from(&self.default_id);
        options
    }

    /// Output settings; the id prefix is shared with resolution so that
    /// references written back out are relative to the same context.
    pub fn serialize_options(&self) -> SerializeOptions {
        SerializeOptions::new()
            .pretty(self.pretty_print)
            .with_id_prefix(self.id_prefix.clone())
            .use_refs(self.use_refs)
            .serialize_functions(self.serialize_functions)
            .keep_generated_ids(self.keep_generated_ids)
            .with_indent(self.indent.clone())
    }
}
