use crate::error::ResolveError;
use crate::fetch::Loader;
use crate::path::Step;
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A value in a reference graph.
///
/// Scalars are plain data. Objects and arrays live behind [`Node`], which is
/// shared: two slots holding the same node see each other's mutations, which
/// is how cycles, shared references and in-place merges are expressed.
#[derive(Clone)]
pub enum Value {
    /// An absent value. Never produced by decoding; used for missing slots
    /// and as the "old" side of an addition notification.
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    /// A host callable, carried as its source text.
    Function(String),
    /// A raw `{"$ref": ...}` marker that has not been through the resolver.
    Reference(String),
    Node(Node),
}

impl Value {
    pub fn object<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Node(Node::from_entries(entries))
    }

    pub fn array<I: IntoIterator<Item = Value>>(items: I) -> Value {
        Value::Node(Node::from_values(items))
    }

    pub fn reference(reference: impl Into<String>) -> Value {
        Value::Reference(reference.into())
    }

    #[must_use]
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// The lazy stub carried by this value, if it is an unresolved placeholder node.
    #[must_use]
    pub fn lazy_stub(&self) -> Option<LazyStub> {
        self.as_node().and_then(Node::lazy_stub)
    }

    /// Follows a key on an object node or an index on an array node.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.as_node().and_then(|node| node.get(key))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Function(_) => "function",
            Value::Reference(_) => "reference",
            Value::Node(node) if node.is_array() => "array",
            Value::Node(_) => "object",
        }
    }
}

/// Equality as the merge diff sees it: nodes compare by identity, dates by
/// instant, functions by their text, everything else by value.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Reference(a), Value::Reference(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Date(d) => write!(f, "Date({})", d.to_rfc3339()),
            Value::Function(text) => write!(f, "Function({text:?})"),
            Value::Reference(r) => write!(f, "Reference({r:?})"),
            Value::Node(node) => fmt::Debug::fmt(node, f),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Value::Node(node)
    }
}

/// Array vs. non-array discriminator compared before an index entry is
/// reused as a merge target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Object,
    Array,
}

#[derive(Debug, Clone)]
pub(crate) enum Body {
    Object(BTreeMap<String, Value>),
    Array(Vec<Value>),
}

#[derive(Default)]
struct Meta {
    absolute_id: Option<String>,
    client_id: Option<String>,
    dirty: bool,
    prototype: Option<Rc<Prototype>>,
    stub: Option<LazyStub>,
}

struct NodeData {
    body: Body,
    meta: Meta,
}

/// A shared, mutable object or array.
///
/// Cloning a `Node` clones the handle, not the contents. Bookkeeping that
/// the wire format reserves (`__id`, `__clientId`, the dirty flag, the lazy
/// loader) is kept beside the data and never appears among its keys.
#[derive(Clone)]
pub struct Node(Rc<RefCell<NodeData>>);

impl Node {
    fn with_body(body: Body) -> Self {
        Node(Rc::new(RefCell::new(NodeData {
            body,
            meta: Meta::default(),
        })))
    }

    pub fn object() -> Self {
        Self::with_body(Body::Object(BTreeMap::new()))
    }

    pub fn array() -> Self {
        Self::with_body(Body::Array(Vec::new()))
    }

    pub fn new(shape: Shape) -> Self {
        match shape {
            Shape::Object => Self::object(),
            Shape::Array => Self::array(),
        }
    }

    pub fn from_entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::with_body(Body::Object(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn from_values<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Self::with_body(Body::Array(items.into_iter().collect()))
    }

    /// A fresh object whose missing keys fall back to `prototype`.
    pub fn with_prototype(prototype: Rc<Prototype>) -> Self {
        let node = Self::object();
        node.0.borrow_mut().meta.prototype = Some(prototype);
        node
    }

    /// A placeholder standing in for a reference that could not be resolved yet.
    pub fn stub(stub: LazyStub) -> Self {
        let node = Self::object();
        node.0.borrow_mut().meta.stub = Some(stub);
        node
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Stable address used to key per-call visited sets.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn shape(&self) -> Shape {
        match self.0.borrow().body {
            Body::Object(_) => Shape::Object,
            Body::Array(_) => Shape::Array,
        }
    }

    pub fn is_array(&self) -> bool {
        self.shape() == Shape::Array
    }

    pub fn len(&self) -> usize {
        match &self.0.borrow().body {
            Body::Object(map) => map.len(),
            Body::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Own value under `key`. Array nodes accept decimal indices.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        match &self.0.borrow().body {
            Body::Object(map) => map.get(key).cloned(),
            Body::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .filter(|v| !v.is_undefined())
                .cloned(),
        }
    }

    #[must_use]
    pub fn get_step(&self, step: &Step) -> Option<Value> {
        match step {
            Step::Key(key) => self.get(key),
            Step::Index(i) => match &self.0.borrow().body {
                Body::Array(items) => items.get(*i).filter(|v| !v.is_undefined()).cloned(),
                Body::Object(map) => map.get(&i.to_string()).cloned(),
            },
        }
    }

    /// Own value, falling back to the prototype's inherited data.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.get(key).or_else(|| {
            self.prototype()
                .and_then(|proto| proto.inherited.get(key).cloned())
        })
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Stores `value` under `key`, returning the previous value. Array nodes
    /// grow with undefined slots when the index is past the end; non-numeric
    /// keys on arrays are ignored.
    pub fn set(&self, key: &str, value: Value) -> Option<Value> {
        match &mut self.0.borrow_mut().body {
            Body::Object(map) => map.insert(key.to_string(), value),
            Body::Array(items) => {
                let i = key.parse::<usize>().ok()?;
                if i >= items.len() {
                    items.resize(i + 1, Value::Undefined);
                }
                Some(std::mem::replace(&mut items[i], value)).filter(|v| !v.is_undefined())
            }
        }
    }

    pub fn push(&self, value: Value) {
        match &mut self.0.borrow_mut().body {
            Body::Array(items) => items.push(value),
            Body::Object(map) => {
                let key = map.len().to_string();
                map.insert(key, value);
            }
        }
    }

    /// Detaches the value under `key`. Array slots become undefined so that
    /// later indices keep their positions.
    pub fn remove(&self, key: &str) -> Option<Value> {
        match &mut self.0.borrow_mut().body {
            Body::Object(map) => map.remove(key),
            Body::Array(items) => {
                let slot = key.parse::<usize>().ok().and_then(|i| items.get_mut(i))?;
                Some(std::mem::replace(slot, Value::Undefined)).filter(|v| !v.is_undefined())
            }
        }
    }

    /// Own keys in iteration order; array nodes yield their indices.
    pub fn keys(&self) -> Vec<String> {
        match &self.0.borrow().body {
            Body::Object(map) => map.keys().cloned().collect(),
            Body::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// Snapshot of the own entries. The node is not borrowed afterwards, so
    /// callers may mutate it (or anything reachable from it) while iterating.
    pub fn entries(&self) -> Vec<(Step, Value)> {
        match &self.0.borrow().body {
            Body::Object(map) => map
                .iter()
                .map(|(k, v)| (Step::Key(k.clone()), v.clone()))
                .collect(),
            Body::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Step::Index(i), v.clone()))
                .collect(),
        }
    }

    /// Drops trailing undefined slots from an array node.
    pub fn shrink(&self) {
        if let Body::Array(items) = &mut self.0.borrow_mut().body {
            while matches!(items.last(), Some(Value::Undefined)) {
                items.pop();
            }
        }
    }

    pub fn id(&self) -> Option<String> {
        self.0.borrow().meta.absolute_id.clone()
    }

    pub fn set_id(&self, id: impl Into<String>) {
        self.0.borrow_mut().meta.absolute_id = Some(id.into());
    }

    pub fn clear_id(&self) {
        self.0.borrow_mut().meta.absolute_id = None;
    }

    pub fn client_id(&self) -> Option<String> {
        self.0.borrow().meta.client_id.clone()
    }

    pub fn set_client_id(&self, id: impl Into<String>) {
        self.0.borrow_mut().meta.client_id = Some(id.into());
    }

    /// Dirty nodes hold local edits the caller has not committed; merges
    /// still land but raise no update notifications.
    pub fn is_dirty(&self) -> bool {
        self.0.borrow().meta.dirty
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.0.borrow_mut().meta.dirty = dirty;
    }

    pub fn prototype(&self) -> Option<Rc<Prototype>> {
        self.0.borrow().meta.prototype.clone()
    }

    pub fn lazy_stub(&self) -> Option<LazyStub> {
        self.0.borrow().meta.stub.clone()
    }

    pub fn is_lazy(&self) -> bool {
        self.0.borrow().meta.stub.is_some()
    }

    pub(crate) fn attach_loader(&self, loader: Option<Rc<dyn Loader>>) {
        if let Some(stub) = &mut self.0.borrow_mut().meta.stub {
            stub.loader = loader;
        }
    }

    pub(crate) fn clear_stub(&self) {
        self.0.borrow_mut().meta.stub = None;
    }

    /// Runs the lazy stub's loader, if any, returning what it produced.
    /// Nodes that are not stubs, and stubs without a loader, yield `None`.
    ///
    /// # Errors
    /// Propagates the loader's failure.
    pub fn materialize(&self) -> Result<Option<Value>, ResolveError> {
        let Some(stub) = self.lazy_stub() else {
            return Ok(None);
        };
        match &stub.loader {
            Some(loader) => loader.load(&stub.reference).map(Some),
            None => Ok(None),
        }
    }
}

/// Identity, not contents.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: graphs may be cyclic.
        let data = self.0.borrow();
        let mut dbg = f.debug_struct("Node");
        dbg.field("shape", &self.shape());
        if let Some(id) = &data.meta.absolute_id {
            dbg.field("id", id);
        }
        if let Some(stub) = &data.meta.stub {
            dbg.field("ref", &stub.reference);
        }
        dbg.field("keys", &self.keys()).finish()
    }
}

/// Placeholder data for a reference that stayed unresolved after the
/// second pass. Holds the loader configured at resolve time, if any.
#[derive(Clone)]
pub struct LazyStub {
    pub reference: String,
    pub loader: Option<Rc<dyn Loader>>,
}

impl LazyStub {
    pub fn new(reference: impl Into<String>) -> Self {
        LazyStub {
            reference: reference.into(),
            loader: None,
        }
    }

    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }
}

impl fmt::Debug for LazyStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyStub")
            .field("reference", &self.reference)
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

/// Shared data a typed record inherits without owning it.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub name: String,
    pub inherited: BTreeMap<String, Value>,
}

impl Prototype {
    pub fn new(name: impl Into<String>) -> Self {
        Prototype {
            name: name.into(),
            inherited: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inherited.insert(key.into(), value);
        self
    }
}
