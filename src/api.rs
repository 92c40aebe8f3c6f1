use crate::codec;
use crate::error::RefError;
use crate::events::{ChangeLog, ChangeSink};
use crate::index::Index;
use crate::resolver::{self, ResolveOptions};
use crate::serializer::{self, SerializeOptions};
use crate::value::Value;

/// A single JSON text resolved on its own, with the index it built and the
/// notifications it produced.
#[derive(Debug)]
pub struct Document {
    pub root: Value,
    pub index: Index,
    pub changes: ChangeLog,
}

impl Document {
    /// Serializes the resolved graph back to reference-aware JSON text.
    #[must_use]
    pub fn to_json(&self, options: &SerializeOptions) -> String {
        serializer::serialize(&self.root, options)
    }

    /// The graph as plain `serde_json`, or `None` if it contains a cycle.
    /// Shared nodes are written out once per holder.
    #[must_use]
    pub fn to_value(&self) -> Option<serde_json::Value> {
        codec::to_json(&self.root)
    }

    /// References that are still lazy stubs in the index, sorted.
    #[must_use]
    pub fn unresolved(&self) -> Vec<String> {
        self.index.lazy_ids()
    }
}

/// Decodes and resolves a JSON text against a fresh index.
///
/// This is the entry point for one-off documents. Use [`from_json`] with a
/// long-lived [`Index`] to merge a stream of messages into the same objects.
///
/// # Errors
/// Returns a `RefError` if the text is not JSON, or if a cross-document
/// reference cannot be fetched or decoded.
pub fn parse(source: &str, file_name: &str, options: &ResolveOptions) -> Result<Document, RefError> {
    let mut index = Index::new();
    let mut changes = ChangeLog::new();
    let root = from_json(source, file_name, options, &mut index, &mut changes)?;
    Ok(Document {
        root,
        index,
        changes,
    })
}

/// Decodes `source` and resolves it into `index`, reporting merges to `sink`.
///
/// # Errors
/// Returns a `RefError` if the text is not JSON, or if a cross-document
/// reference cannot be fetched or decoded.
pub fn from_json<S: ChangeSink + ?Sized>(
    source: &str,
    file_name: &str,
    options: &ResolveOptions,
    index: &mut Index,
    sink: &mut S,
) -> Result<Value, RefError> {
    let tree = codec::decode(source, file_name)?;
    Ok(resolver::resolve(tree, options, index, sink)?)
}

/// Serializes `value` to reference-aware JSON text.
#[must_use]
pub fn to_json(value: &Value, options: &SerializeOptions) -> String {
    serializer::serialize(value, options)
}
