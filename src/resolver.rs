use crate::codec;
use crate::error::ResolveError;
use crate::events::ChangeSink;
use crate::fetch::{DocumentFetcher, Loader};
use crate::index::Index;
use crate::path::{self, Base, Step};
use crate::schema::{Schema, SchemaRegistry};
use crate::value::{LazyStub, Node, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Settings for one resolve call.
#[derive(Clone)]
pub struct ResolveOptions {
    /// Property holding an object's id. Defaults to `id`.
    pub id_attribute: String,
    /// Prepended to every id before it enters the index, so that several
    /// tables can share one index without colliding, e.g. `/User/`.
    pub id_prefix: String,
    /// Record each node's absolute id on the node as it is resolved.
    pub assign_absolute_ids: bool,
    pub schemas: Option<SchemaRegistry>,
    /// Attached to lazy stubs left behind by references that never resolved.
    pub loader: Option<Rc<dyn Loader>>,
    /// Id for the root when it carries none of its own.
    pub default_id: Option<String>,
    /// Source of documents named by cross-document references.
    pub fetcher: Option<Rc<dyn DocumentFetcher>>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            id_attribute: "id".to_string(),
            id_prefix: String::new(),
            assign_absolute_ids: false,
            schemas: None,
            loader: None,
            default_id: None,
            fetcher: None,
        }
    }
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = attribute.into();
        self
    }

    #[must_use]
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn assign_absolute_ids(mut self, assign: bool) -> Self {
        self.assign_absolute_ids = assign;
        self
    }

    #[must_use]
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = Some(schemas);
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Rc::new(loader));
        self
    }

    #[must_use]
    pub fn with_default_id(mut self, id: impl Into<String>) -> Self {
        self.default_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: impl DocumentFetcher + 'static) -> Self {
        self.fetcher = Some(Rc::new(fetcher));
        self
    }
}

impl fmt::Debug for ResolveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("id_attribute", &self.id_attribute)
            .field("id_prefix", &self.id_prefix)
            .field("assign_absolute_ids", &self.assign_absolute_ids)
            .field("schemas", &self.schemas)
            .field("loader", &self.loader.is_some())
            .field("default_id", &self.default_id)
            .field("fetcher", &self.fetcher.is_some())
            .finish()
    }
}

/// Resolves `tree` against `index`, reporting merges and loads to `sink`.
///
/// # Errors
/// Only cross-document references can fail: a fetch error or an undecodable
/// fetched document aborts the call.
pub fn resolve<S: ChangeSink + ?Sized>(
    tree: Value,
    options: &ResolveOptions,
    index: &mut Index,
    sink: &mut S,
) -> Result<Value, ResolveError> {
    Resolver::new(options, index, sink).resolve(tree)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    First,
    Rewalk,
}

/// One resolve call's worth of state over a caller-owned index.
pub struct Resolver<'a, S: ChangeSink + ?Sized> {
    options: &'a ResolveOptions,
    index: &'a mut Index,
    sink: &'a mut S,
    root: Value,
    pass: Pass,
    // Owners of references that did not resolve in the first pass.
    rewalk: Vec<Node>,
    // Decoded node address -> the target it was merged into.
    visited: HashMap<usize, Node>,
    // Placeholders declared during this call.
    declared: HashSet<usize>,
    // Targets the first pass has walked; paths may only land on these.
    walked: HashSet<usize>,
    // External documents being resolved by the calls enclosing this one.
    resolving_stack: Vec<String>,
}

impl<'a, S: ChangeSink + ?Sized> Resolver<'a, S> {
    pub fn new(options: &'a ResolveOptions, index: &'a mut Index, sink: &'a mut S) -> Self {
        Resolver {
            options,
            index,
            sink,
            root: Value::Undefined,
            pass: Pass::First,
            rewalk: Vec::new(),
            visited: HashMap::new(),
            declared: HashSet::new(),
            walked: HashSet::new(),
            resolving_stack: Vec::new(),
        }
    }

    /// Walks `tree` once, then re-walks exactly the nodes whose references
    /// pointed at parts of the graph not reached yet. Whatever is still
    /// missing after that becomes a lazy stub.
    ///
    /// # Errors
    /// See [`resolve`].
    pub fn resolve(mut self, tree: Value) -> Result<Value, ResolveError> {
        let root = match tree {
            Value::Node(root) => root,
            Value::Reference(reference) => return self.resolve_detached(reference),
            other => return Ok(other),
        };

        self.root = Value::Node(root.clone());
        self.pass = Pass::First;
        let resolved = self.walk(&root, self.options.default_id.clone(), None, None)?;

        self.pass = Pass::Rewalk;
        let deferred = std::mem::take(&mut self.rewalk);
        log::debug!("re-walking {} node(s) with forward references", deferred.len());
        for node in &deferred {
            self.walk(node, None, None, None)?;
        }
        Ok(Value::Node(resolved))
    }

    /// A message that is nothing but a reference.
    fn resolve_detached(mut self, reference: String) -> Result<Value, ResolveError> {
        self.pass = Pass::Rewalk;
        match self.resolve_reference(&reference)? {
            Some(found) => Ok(found),
            None => Ok(Value::Node(self.stub(reference))),
        }
    }

    fn walk(
        &mut self,
        it: &Node,
        default_id: Option<String>,
        schema: Option<&'a Schema>,
        anchor: Option<Node>,
    ) -> Result<Node, ResolveError> {
        let stop = self.pass == Pass::Rewalk;
        if !stop {
            if let Some(target) = self.visited.get(&it.addr()) {
                return Ok(target.clone());
            }
        }
        let options = self.options;
        let id = self
            .read_id(it)
            .or(default_id)
            .map(|id| path::absolute_id(&options.id_prefix, &id));

        let mut target = anchor
            .filter(|anchor| anchor.shape() == it.shape())
            .unwrap_or_else(|| it.clone());
        let mut schema = schema;
        let mut update = false;
        let mut filling = false;

        if let Some(id) = &id {
            if let Some(found) = options
                .schemas
                .as_ref()
                .filter(|_| !it.is_array())
                .and_then(|registry| registry.for_id(id))
            {
                schema = Some(found);
            }
            match self.index.get(id) {
                Some(existing) if existing.shape() == it.shape() => {
                    filling = existing.is_lazy();
                    existing.clear_stub();
                    target = existing;
                    update = true;
                }
                existing => {
                    if existing.is_some() {
                        log::debug!("`{id}` changed between array and object; replacing its entry");
                    }
                    if let Some(constructed) = schema
                        .filter(|_| !it.is_array())
                        .and_then(|s| s.constructor.construct())
                    {
                        target = constructed;
                    }
                }
            }
            if options.assign_absolute_ids {
                it.set_id(id.clone());
                target.set_id(id.clone());
            }
            self.index.insert(id.clone(), target.clone());
        }

        if let Value::Node(root) = &self.root {
            if root.ptr_eq(it) && !target.ptr_eq(it) {
                self.root = Value::Node(target.clone());
            }
        }
        if !stop {
            self.visited.insert(it.addr(), target.clone());
            self.walked.insert(target.addr());
        }

        let mut deferred = false;
        for (step, raw) in it.entries() {
            let key = step.key();
            let property = schema.and_then(|s| s.property(&key));
            let value = match raw {
                Value::String(text) if property.is_some_and(Schema::is_date_time) => {
                    match codec::parse_iso_date(&text) {
                        Some(date) => Value::Date(date),
                        None => {
                            log::warn!("`{key}` is declared date-time but `{text}` is not a timestamp");
                            Value::String(text)
                        }
                    }
                }
                Value::Reference(reference) => {
                    // detach so a path through this node cannot find the marker itself
                    it.remove(&key);
                    match self.resolve_reference(&reference)? {
                        Some(found) => found,
                        None if stop => Value::Node(self.stub(reference)),
                        None => {
                            if !deferred {
                                self.rewalk.push(target.clone());
                                deferred = true;
                            }
                            Value::Node(self.forward_declare(&reference))
                        }
                    }
                }
                Value::Node(child) if child.is_lazy() => {
                    if stop {
                        self.retry(child)?
                    } else {
                        Value::Node(child)
                    }
                }
                Value::Node(child) => {
                    if stop {
                        Value::Node(child)
                    } else {
                        let child_id = id.as_deref().map(|id| path::join(id, &step));
                        let anchor = if target.ptr_eq(it) {
                            None
                        } else {
                            target.get(&key).and_then(|old| old.as_node().cloned())
                        };
                        Value::Node(self.walk(&child, child_id, property, anchor)?)
                    }
                }
                other => other,
            };

            it.set(&key, value.clone());
            if !target.ptr_eq(it) {
                let old = target.set(&key, value.clone()).unwrap_or(Value::Undefined);
                if update && !filling && !target.is_dirty() && old != value {
                    self.sink.on_update(&target, &key, &old, &value);
                }
            }
        }

        if update && !target.ptr_eq(it) && !target.is_dirty() {
            self.remove_stale_keys(it, &target, filling);
        }
        if (!update && !stop) || filling {
            self.sink.on_load(&target);
        }
        Ok(target)
    }

    /// Drops keys the new shape no longer has, then trims array targets.
    fn remove_stale_keys(&mut self, it: &Node, target: &Node, quiet: bool) {
        let kept: HashSet<String> = it.keys().into_iter().collect();
        for key in target.keys() {
            if kept.contains(&key) {
                continue;
            }
            let old = target.remove(&key).unwrap_or(Value::Undefined);
            if !quiet {
                self.sink.on_update(target, &key, &old, &Value::Undefined);
            }
        }
        target.shrink();
    }

    fn read_id(&self, it: &Node) -> Option<String> {
        if it.is_array() {
            return None;
        }
        match it.get(&self.options.id_attribute)? {
            Value::String(id) => Some(id),
            Value::Number(n) => Some(codec::encode_number(n)),
            _ => None,
        }
    }

    /// The value `reference` denotes, or `None` if some part of it is not
    /// available (yet).
    fn resolve_reference(&mut self, reference: &str) -> Result<Option<Value>, ResolveError> {
        let expr = path::parse(reference);
        let base = match (&expr.document, &expr.base) {
            (Some(document), _) => match self.live_entry(document) {
                Some(node) => Some(Value::Node(node)),
                None if self.pass == Pass::Rewalk => {
                    return self.resolve_external(document, &expr.steps);
                }
                None => None,
            },
            (None, Base::Root) => return Ok(self.from_root(self.root.clone(), &expr.steps)),
            (None, Base::Id(id)) => self.live_entry(id).map(Value::Node),
            (None, Base::Named(name)) => match self.root.get(name) {
                Some(property) => return Ok(self.from_root(property, &expr.steps)),
                None => self.live_entry(name).map(Value::Node),
            },
        };
        Ok(base.and_then(|base| follow(base, &expr.steps)))
    }

    /// Follows a root-relative path. In the first pass a node the walk has
    /// not reached yet may still be merged elsewhere, so it counts as missing.
    fn from_root(&self, base: Value, steps: &[Step]) -> Option<Value> {
        match follow(base, steps)? {
            Value::Node(node) if self.pass == Pass::First && !self.walked.contains(&node.addr()) => None,
            found => Some(found),
        }
    }

    fn live_entry(&self, id: &str) -> Option<Node> {
        self.index
            .get(&path::absolute_id(&self.options.id_prefix, id))
            .filter(|node| !node.is_lazy())
    }

    /// Fetches `url`, resolves it completely against the same index, and
    /// follows `steps` from its root.
    fn resolve_external(&mut self, url: &str, steps: &[Step]) -> Result<Option<Value>, ResolveError> {
        let Some(fetcher) = self.options.fetcher.clone() else {
            return Ok(None);
        };
        if self.resolving_stack.iter().any(|open| open == url) {
            log::warn!(
                "circular document reference {} -> {url}; leaving it unresolved",
                self.resolving_stack.join(" -> ")
            );
            return Ok(None);
        }
        log::debug!("fetching external document `{url}`");
        let text = fetcher.fetch(url).map_err(|source| ResolveError::ExternalFetch {
            url: url.to_string(),
            source,
        })?;
        let tree = codec::decode(&text, url).map_err(|source| ResolveError::ExternalDecode {
            url: url.to_string(),
            source,
        })?;
        let mut nested = Resolver::new(self.options, &mut *self.index, &mut *self.sink);
        nested.resolving_stack = self.resolving_stack.clone();
        nested.resolving_stack.push(url.to_string());
        let root = nested.resolve(tree)?;
        Ok(follow(root, steps))
    }

    fn declared_id(&self, reference: &str) -> String {
        let expr = path::parse(reference);
        let id = match &expr.base {
            // a root property, not a record: keep it apart from index ids
            Base::Named(name) if self.root.get(name).is_some() => reference,
            _ => expr.bare_id().unwrap_or(reference),
        };
        path::absolute_id(&self.options.id_prefix, id)
    }

    /// Indexes a placeholder under the id `reference` names, so that an
    /// object arriving later with that id is merged into it and every
    /// holder of the placeholder sees the real thing.
    fn forward_declare(&mut self, reference: &str) -> Node {
        let id = self.declared_id(reference);
        if let Some(existing) = self.index.get(&id) {
            return existing;
        }
        log::trace!("forward-declaring `{id}` for `{reference}`");
        let node = Node::stub(LazyStub::new(reference));
        if self.options.assign_absolute_ids {
            node.set_id(id.clone());
        }
        self.declared.insert(node.addr());
        self.index.insert(id, node.clone());
        node
    }

    /// Second chance for a placeholder left by the first pass.
    fn retry(&mut self, placeholder: Node) -> Result<Value, ResolveError> {
        let Some(stub) = placeholder.lazy_stub() else {
            return Ok(Value::Node(placeholder));
        };
        match self.resolve_reference(&stub.reference)? {
            Some(found) => {
                if self.declared.contains(&placeholder.addr()) {
                    let id = self.declared_id(&stub.reference);
                    if self.index.get(&id).is_some_and(|entry| entry.ptr_eq(&placeholder)) {
                        self.index.remove(&id);
                    }
                }
                Ok(found)
            }
            None => {
                log::trace!("`{}` is unresolved; leaving a lazy stub", stub.reference);
                placeholder.attach_loader(self.options.loader.clone());
                Ok(Value::Node(placeholder))
            }
        }
    }

    fn stub(&self, reference: String) -> Node {
        Node::stub(LazyStub {
            reference,
            loader: self.options.loader.clone(),
        })
    }
}

/// Walks `steps` down from `current`. Unresolved markers and stubs along
/// the way count as missing.
fn follow(mut current: Value, steps: &[Step]) -> Option<Value> {
    for step in steps {
        let node = current.as_node()?;
        if node.is_lazy() {
            return None;
        }
        current = node.get_step(step)?;
    }
    match current {
        Value::Undefined | Value::Reference(_) => None,
        Value::Node(node) if node.is_lazy() => None,
        found => Some(found),
    }
}
