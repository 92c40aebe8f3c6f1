use crate::codec::{self, REF_KEY};
use crate::path::{self, ROOT};
use crate::value::{Node, Value};
use std::collections::HashSet;

/// Placeholder written for array slots holding a value that cannot be
/// serialized, so later elements keep their indices.
pub const UNDEFINED: &str = "undefined";

/// Settings for one serialize call.
#[derive(Debug, Clone)]
pub struct SerializeOptions {
    /// Indent nested values, one `indent` per level.
    pub pretty_print: bool,
    /// Prefix the ids in this graph were indexed under. Stripped from
    /// references that point inside the same context.
    pub id_prefix: String,
    /// Leave the path ids given to unidentified nodes in place after the
    /// call, e.g. to build an index from the output.
    pub keep_generated_ids: bool,
    /// Write every node that carries an id of its own as a reference,
    /// except the top-level one.
    pub use_refs: bool,
    /// Write `Value::Function` text verbatim instead of eliding it.
    pub serialize_functions: bool,
    pub indent: String,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        SerializeOptions {
            pretty_print: false,
            id_prefix: String::new(),
            keep_generated_ids: false,
            use_refs: false,
            serialize_functions: false,
            indent: "\t".to_string(),
        }
    }
}

impl SerializeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    #[must_use]
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn keep_generated_ids(mut self, keep: bool) -> Self {
        self.keep_generated_ids = keep;
        self
    }

    #[must_use]
    pub fn use_refs(mut self, use_refs: bool) -> Self {
        self.use_refs = use_refs;
        self
    }

    #[must_use]
    pub fn serialize_functions(mut self, serialize: bool) -> Self {
        self.serialize_functions = serialize;
        self
    }

    #[must_use]
    pub fn with_indent(mut self, indent: impl Into<String>) -> Self {
        self.indent = indent.into();
        self
    }
}

/// Writes `value` as JSON text with `$ref` markers for shared and cyclic
/// nodes.
///
/// Nodes without an id are given their path (`#`, `#a`, `#a.b[0]`, ...)
/// as a temporary id while the call runs; a node met again under any path
/// is written as a reference to the first one. Unless `keep_generated_ids`
/// is set, those temporary ids are removed before returning.
pub fn serialize(value: &Value, options: &SerializeOptions) -> String {
    let mut serializer = Serializer {
        options,
        visited: HashSet::new(),
        generated: Vec::new(),
    };
    let text = serializer
        .value(value, ROOT, "", true)
        .unwrap_or_else(|| UNDEFINED.to_string());
    if !options.keep_generated_ids {
        for node in &serializer.generated {
            node.clear_id();
        }
    }
    text
}

struct Serializer<'a> {
    options: &'a SerializeOptions,
    visited: HashSet<String>,
    generated: Vec<Node>,
}

impl Serializer<'_> {
    /// `None` for values that have no JSON form.
    fn value(&mut self, value: &Value, path: &str, indent: &str, top: bool) -> Option<String> {
        match value {
            Value::Undefined => None,
            Value::Function(text) => self.options.serialize_functions.then(|| text.clone()),
            Value::Null => Some("null".to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(codec::encode_number(*n)),
            Value::String(s) => Some(codec::quote(s)),
            Value::Date(date) => Some(codec::quote(&codec::format_iso_date(date))),
            Value::Reference(reference) => Some(self.marker(reference, indent)),
            Value::Node(node) => Some(self.node(node, path, indent, top)),
        }
    }

    fn node(&mut self, node: &Node, path: &str, indent: &str, top: bool) -> String {
        if let Some(stub) = node.lazy_stub() {
            return self.marker(&stub.reference, indent);
        }
        let path = match node.id() {
            Some(id) => {
                let persistent = self.options.use_refs && !id.contains('#');
                if !top && (persistent || self.visited.contains(&id)) {
                    let reference = self.reference_to(node, &id);
                    return self.marker(&reference, indent);
                }
                id
            }
            None => {
                node.set_id(path);
                self.generated.push(node.clone());
                path.to_string()
            }
        };
        // recorded before the children so a cycle back here becomes a reference
        self.visited.insert(path.clone());

        let pretty = self.options.pretty_print;
        let next_indent = if pretty {
            format!("{indent}{}", self.options.indent)
        } else {
            String::new()
        };
        let newline = if pretty { "\n" } else { "" };
        let sep = if pretty { " " } else { "" };

        let mut parts = Vec::new();
        let is_array = node.is_array();
        for (step, item) in node.entries() {
            let child_path = path::join(&path, &step);
            if is_array {
                let text = self
                    .value(&item, &child_path, &next_indent, false)
                    .unwrap_or_else(|| UNDEFINED.to_string());
                parts.push(format!("{newline}{next_indent}{text}"));
            } else {
                let key = step.key();
                if key.starts_with("__") {
                    continue;
                }
                let Some(text) = self.value(&item, &child_path, &next_indent, false) else {
                    continue;
                };
                parts.push(format!("{newline}{next_indent}{}:{sep}{text}", codec::quote(&key)));
            }
        }

        let (open, close) = if is_array { ('[', ']') } else { ('{', '}') };
        if parts.is_empty() {
            return format!("{open}{close}");
        }
        format!("{open}{}{newline}{indent}{close}", parts.join(","))
    }

    fn reference_to(&self, node: &Node, id: &str) -> String {
        if id.starts_with('#') {
            return id.to_string();
        }
        if node.client_id().as_deref() == Some(id) {
            return format!("cid:{id}");
        }
        id.strip_prefix(self.options.id_prefix.as_str())
            .unwrap_or(id)
            .to_string()
    }

    fn marker(&self, reference: &str, indent: &str) -> String {
        let key = codec::quote(REF_KEY);
        let reference = codec::quote(reference);
        if self.options.pretty_print {
            format!("{{\n{indent}{}{key}: {reference}\n{indent}}}", self.options.indent)
        } else {
            format!("{{{key}:{reference}}}")
        }
    }
}
