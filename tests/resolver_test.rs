use json_ref_core::codec::decode;
use json_ref_core::error::ResolveError;
use json_ref_core::fetch::FileFetcher;
use json_ref_core::schema::{Schema, SchemaRegistry};
use json_ref_core::{resolve, ChangeLog, Index, NoopSink, Prototype, ResolveOptions, Value};
use miette::Report;
use std::cell::Cell;
use std::fs;
use std::rc::Rc;

fn resolve_ok(source: &str, options: &ResolveOptions, index: &mut Index, log: &mut ChangeLog) -> Value {
    let tree = decode(source, "test.json").unwrap();
    match resolve(tree, options, index, log) {
        Ok(value) => value,
        Err(err) => {
            let report = Report::from(err);
            panic!("{:#}", report);
        }
    }
}

fn resolve_fresh(source: &str) -> (Value, Index) {
    let mut index = Index::new();
    let value = resolve_ok(source, &ResolveOptions::new(), &mut index, &mut ChangeLog::new());
    (value, index)
}

fn resolve_err(source: &str, options: &ResolveOptions) -> ResolveError {
    let tree = decode(source, "test.json").unwrap();
    match resolve(tree, options, &mut Index::new(), &mut NoopSink) {
        Ok(_) => panic!("Expected a ResolveError, but got Ok"),
        Err(err) => err,
    }
}

#[test]
fn test_backward_and_forward_references_share_identity() {
    let (root, _) = resolve_fresh(
        r#"{
            "a": { "$ref": "n" },
            "b": { "id": "n", "v": 1 },
            "c": { "$ref": "n" }
        }"#,
    );
    let a = root.get("a").unwrap();
    assert_eq!(Some(a.clone()), root.get("b"));
    assert_eq!(Some(a.clone()), root.get("c"));
    assert_eq!(a.get("v"), Some(Value::from(1)));
    assert!(a.lazy_stub().is_none());
}

#[test]
fn test_forward_placeholder_leaves_the_index() {
    let (root, index) = resolve_fresh(
        r##"{ "a": { "$ref": "#b.x" }, "b": { "x": { "$ref": "#c" } }, "c": 7 }"##,
    );
    assert_eq!(root.get("a"), Some(Value::from(7)));
    assert!(index.lazy_ids().is_empty());
    assert!(!index.contains("#b.x"));
}

#[test]
fn test_cycle_through_ids() {
    let (root, _) = resolve_fresh(r#"{ "id": "n", "next": { "id": "m", "back": { "$ref": "n" } } }"#);
    let back = root.get("next").unwrap().get("back").unwrap();
    assert_eq!(back, root);
}

#[test]
fn test_root_relative_paths() {
    let (root, _) = resolve_fresh(
        r##"{
            "a": [ { "id": "A", "child": { "x": 5 } } ],
            "byId": { "$ref": "#A.child.x" },
            "byIdFragment": { "$ref": "A#child" },
            "byPath": { "$ref": "#a[0].child" },
            "self": { "$ref": "#" },
            "zero": { "$ref": "#flag" },
            "flag": 0
        }"##,
    );
    assert_eq!(root.get("byId"), Some(Value::from(5)));
    let child = root.get("a").unwrap().get("0").unwrap().get("child").unwrap();
    assert_eq!(root.get("byIdFragment"), Some(child.clone()));
    assert_eq!(root.get("byPath"), Some(child));
    assert_eq!(root.get("self"), Some(root.clone()));
    // falsy values still count as resolved
    assert_eq!(root.get("zero"), Some(Value::from(0)));
}

#[test]
fn test_reference_cannot_resolve_to_itself() {
    let (root, _) = resolve_fresh(r##"{ "loop": { "$ref": "#loop" } }"##);
    let stub = root.get("loop").unwrap().lazy_stub().unwrap();
    assert_eq!(stub.reference, "#loop");
}

#[test]
fn test_unresolved_reference_becomes_lazy_stub() {
    let (root, index) = resolve_fresh(r#"{ "a": { "$ref": "missing" }, "b": { "$ref": "missing" } }"#);
    let a = root.get("a").unwrap();
    let stub = a.lazy_stub().unwrap();
    assert_eq!(stub.reference, "missing");
    assert!(!stub.has_loader());
    assert_eq!(root.get("b"), Some(a));
    assert_eq!(index.lazy_ids(), vec!["missing".to_string()]);
}

#[test]
fn test_lazy_stub_materializes_through_loader() {
    let options = ResolveOptions::new().with_loader(|reference: &str| -> Result<Value, ResolveError> {
        Ok(Value::object([("loaded", Value::from(reference))]))
    });
    let mut index = Index::new();
    let root = resolve_ok(
        r#"{ "user": { "$ref": "/User/9" } }"#,
        &options,
        &mut index,
        &mut ChangeLog::new(),
    );
    let node = root.get("user").unwrap().as_node().cloned().unwrap();
    assert!(node.lazy_stub().unwrap().has_loader());
    let loaded = node.materialize().unwrap().unwrap();
    assert_eq!(loaded.get("loaded"), Some(Value::from("/User/9")));
}

#[test]
fn test_later_message_fills_lazy_stub() {
    let mut index = Index::new();
    let mut log = ChangeLog::new();
    let options = ResolveOptions::new();
    let first = resolve_ok(r#"{ "owner": { "$ref": "u1" } }"#, &options, &mut index, &mut log);
    let placeholder = first.get("owner").unwrap();
    assert!(placeholder.lazy_stub().is_some());

    log.clear();
    resolve_ok(r#"{ "id": "u1", "name": "Ann" }"#, &options, &mut index, &mut log);
    assert!(placeholder.lazy_stub().is_none());
    assert_eq!(placeholder.get("name"), Some(Value::from("Ann")));
    assert!(log.updates().is_empty());
    let loads = log.loads();
    assert_eq!(loads.len(), 1);
    assert_eq!(Some(&loads[0]), placeholder.as_node());
}

#[test]
fn test_update_reports_differences() {
    let mut index = Index::new();
    let mut log = ChangeLog::new();
    let options = ResolveOptions::new();
    let first = resolve_ok(r#"{ "id": "x", "a": 1, "b": 2 }"#, &options, &mut index, &mut log);
    assert_eq!(log.loads().len(), 1);

    log.clear();
    let second = resolve_ok(r#"{ "id": "x", "a": 1, "c": 3 }"#, &options, &mut index, &mut log);
    assert_eq!(first, second);
    assert_eq!(
        log.updates(),
        vec![
            ("c".to_string(), Value::Undefined, Value::from(3)),
            ("b".to_string(), Value::from(2), Value::Undefined),
        ]
    );
    assert!(log.loads().is_empty());
    assert_eq!(first.get("b"), None);
}

#[test]
fn test_resolving_twice_is_idempotent() {
    let mut index = Index::new();
    let mut log = ChangeLog::new();
    let options = ResolveOptions::new();
    let source = r#"{ "id": "x", "child": { "v": [1, 2] }, "peer": { "$ref": "x" } }"#;
    let first = resolve_ok(source, &options, &mut index, &mut log);
    let child = first.get("child").unwrap();

    log.clear();
    let second = resolve_ok(source, &options, &mut index, &mut log);
    assert_eq!(first, second);
    assert_eq!(second.get("child"), Some(child));
    assert!(log.changes.is_empty());
}

#[test]
fn test_array_update_shrinks() {
    let mut index = Index::new();
    let mut log = ChangeLog::new();
    let options = ResolveOptions::new();
    let first = resolve_ok(r#"{ "id": "x", "list": [1, 2, 3] }"#, &options, &mut index, &mut log);
    let list = first.get("list").unwrap().as_node().cloned().unwrap();

    log.clear();
    resolve_ok(r#"{ "id": "x", "list": [1, 5] }"#, &options, &mut index, &mut log);
    assert_eq!(list.len(), 2);
    assert_eq!(list.get("1"), Some(Value::from(5)));
    assert_eq!(
        log.updates(),
        vec![
            ("1".to_string(), Value::from(2), Value::from(5)),
            ("2".to_string(), Value::from(3), Value::Undefined),
        ]
    );
}

#[test]
fn test_shape_change_replaces_entry() {
    let mut index = Index::new();
    let options = ResolveOptions::new();
    let first = resolve_ok(r#"{ "id": "x", "a": 1 }"#, &options, &mut index, &mut ChangeLog::new());
    let second = resolve_ok(r#"[1, 2]"#, &options.clone().with_default_id("x"), &mut index, &mut ChangeLog::new());
    assert_ne!(first, second);
    assert_eq!(index.get("x").map(Value::Node), Some(second));
}

#[test]
fn test_dirty_target_keeps_local_state_quietly() {
    let mut index = Index::new();
    let mut log = ChangeLog::new();
    let options = ResolveOptions::new();
    let first = resolve_ok(r#"{ "id": "x", "a": 1, "b": 2 }"#, &options, &mut index, &mut log);
    first.as_node().unwrap().set_dirty(true);

    log.clear();
    resolve_ok(r#"{ "id": "x", "a": 5 }"#, &options, &mut index, &mut log);
    assert_eq!(first.get("a"), Some(Value::from(5)));
    assert_eq!(first.get("b"), Some(Value::from(2)));
    assert!(log.changes.is_empty());
}

#[test]
fn test_prefix_and_absolute_ids() {
    let mut index = Index::new();
    let options = ResolveOptions::new()
        .with_id_prefix("/User/")
        .assign_absolute_ids(true);
    let root = resolve_ok(
        r#"[ { "id": 4, "friend": { "$ref": "5" } }, { "id": "5", "name": "Bo" }, { "id": "http://other/x" } ]"#,
        &options,
        &mut index,
        &mut ChangeLog::new(),
    );
    let first = root.get("0").unwrap();
    assert_eq!(first.as_node().unwrap().id().as_deref(), Some("/User/4"));
    assert_eq!(first.get("friend"), root.get("1"));
    assert!(index.contains("/User/4"));
    assert!(index.contains("/User/5"));
    assert!(index.contains("http://other/x"));
}

#[test]
fn test_custom_id_attribute() {
    let mut index = Index::new();
    let options = ResolveOptions::new().with_id_attribute("_key");
    let root = resolve_ok(
        r#"{ "a": { "_key": "k", "id": "ignored" }, "b": { "$ref": "k" } }"#,
        &options,
        &mut index,
        &mut ChangeLog::new(),
    );
    assert_eq!(root.get("a"), root.get("b"));
    assert!(!index.contains("ignored"));
}

#[test]
fn test_schema_dates_and_prototype() {
    let prototype = Rc::new(Prototype::new("Event").with("kind", Value::from("event")));
    let schemas = SchemaRegistry::new().with(
        "/Event/",
        Schema::new()
            .with_property("at", Schema::date_time())
            .with_property("meta", Schema::new().with_property("seen", Schema::date_time()))
            .with_prototype(prototype),
    );
    let options = ResolveOptions::new()
        .with_id_prefix("/Event/")
        .with_schemas(schemas);
    let mut index = Index::new();
    let root = resolve_ok(
        r#"{ "id": "1", "at": "2020-01-02T03:04:05Z", "meta": { "seen": "2020-01-03" }, "note": "2020-01-02" }"#,
        &options,
        &mut index,
        &mut ChangeLog::new(),
    );
    let node = root.as_node().unwrap();
    assert_eq!(node.prototype().unwrap().name, "Event");
    assert_eq!(node.lookup("kind"), Some(Value::from("event")));
    assert!(root.get("at").unwrap().as_date().is_some());
    assert!(root.get("meta").unwrap().get("seen").unwrap().as_date().is_some());
    // not declared date-time
    assert_eq!(root.get("note"), Some(Value::from("2020-01-02")));
    assert_eq!(index.get("/Event/1").map(Value::Node), Some(root));
}

#[test]
fn test_bad_date_is_kept_as_string() {
    let schemas = SchemaRegistry::new().with("/E/", Schema::new().with_property("at", Schema::date_time()));
    let options = ResolveOptions::new().with_id_prefix("/E/").with_schemas(schemas);
    let root = resolve_ok(
        r#"{ "id": "1", "at": "soon" }"#,
        &options,
        &mut Index::new(),
        &mut ChangeLog::new(),
    );
    assert_eq!(root.get("at"), Some(Value::from("soon")));
}

#[test]
fn test_lone_reference_message() {
    let mut index = Index::new();
    let options = ResolveOptions::new();
    let record = resolve_ok(r#"{ "id": "r", "v": 1 }"#, &options, &mut index, &mut ChangeLog::new());
    let found = resolve_ok(r#"{ "$ref": "r" }"#, &options, &mut index, &mut ChangeLog::new());
    assert_eq!(found, record);
    let missing = resolve_ok(r#"{ "$ref": "nope" }"#, &options, &mut index, &mut ChangeLog::new());
    assert_eq!(missing.lazy_stub().unwrap().reference, "nope");
}

#[test]
fn test_external_document() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("other.json"),
        r#"{ "name": "remote", "items": [1, { "id": "deep" }] }"#,
    )
    .unwrap();
    let options = ResolveOptions::new().with_fetcher(FileFetcher::new(dir.path()));
    let mut index = Index::new();
    let root = resolve_ok(
        r#"{ "name": { "$ref": "other.json#name" }, "deep": { "$ref": "file://other.json#items[1]" } }"#,
        &options,
        &mut index,
        &mut ChangeLog::new(),
    );
    assert_eq!(root.get("name"), Some(Value::from("remote")));
    let deep = root.get("deep").unwrap();
    assert_eq!(index.get("deep").map(Value::Node), Some(deep));
    assert!(index.lazy_ids().is_empty());
}

#[test]
fn test_external_document_without_fetcher_stays_lazy() {
    let (root, _) = resolve_fresh(r#"{ "a": { "$ref": "other.json#name" } }"#);
    assert_eq!(root.get("a").unwrap().lazy_stub().unwrap().reference, "other.json#name");
}

#[test]
fn test_external_fetch_error() {
    let dir = tempfile::tempdir().unwrap();
    let options = ResolveOptions::new().with_fetcher(FileFetcher::new(dir.path()));
    let err = resolve_err(r#"{ "a": { "$ref": "absent.json#x" } }"#, &options);
    match err {
        ResolveError::ExternalFetch { url, .. } => assert_eq!(url, "absent.json"),
        other => panic!("Expected a fetch error, got {other:?}"),
    }
}

#[test]
fn test_external_decode_error() {
    let options = ResolveOptions::new().with_fetcher(
        |_: &str| -> Result<String, json_ref_core::fetch::BoxError> { Ok("{ nope".to_string()) },
    );
    let err = resolve_err(r#"{ "a": { "$ref": "bad.json#x" } }"#, &options);
    assert!(matches!(err, ResolveError::ExternalDecode { .. }));
}

#[test]
fn test_forward_path_reference_to_later_record() {
    let (root, _) = resolve_fresh(r##"[{ "$ref": "#1" }, { "id": "1", "v": 5 }]"##);
    let first = root.get("0").unwrap();
    assert_eq!(Some(first.clone()), root.get("1"));
    assert_eq!(first.get("v"), Some(Value::from(5)));
    assert!(first.lazy_stub().is_none());
}

#[test]
fn test_root_property_wins_over_older_record() {
    let mut index = Index::new();
    let options = ResolveOptions::new();
    let older = resolve_ok(r#"{ "id": "b", "stale": true }"#, &options, &mut index, &mut ChangeLog::new());
    let root = resolve_ok(
        r##"{ "a": { "$ref": "#b" }, "b": { "k": 1 }, "c": { "$ref": "#b" } }"##,
        &options,
        &mut index,
        &mut ChangeLog::new(),
    );
    let b = root.get("b").unwrap();
    assert_eq!(root.get("a"), Some(b.clone()));
    assert_eq!(root.get("c"), Some(b.clone()));
    assert_ne!(b, older);
    assert!(index.lazy_ids().is_empty());
}

#[test]
fn test_update_reports_placeholder_for_later_path() {
    let mut index = Index::new();
    let mut log = ChangeLog::new();
    let options = ResolveOptions::new();
    let record = resolve_ok(r#"{ "id": "x", "p": 1 }"#, &options, &mut index, &mut log);
    log.clear();
    resolve_ok(
        r##"{ "id": "x", "p": { "$ref": "#w.v" }, "w": { "v": { "k": 1 } } }"##,
        &options,
        &mut index,
        &mut log,
    );
    let v = record.get("w").unwrap().get("v").unwrap();
    assert_eq!(record.get("p"), Some(v));
    // the first pass reported the placeholder; the second pass filled it quietly
    let updates = log.updates();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].0, "p");
    assert_eq!(updates[0].1, Value::from(1));
    assert_eq!(updates[0].2.lazy_stub().unwrap().reference, "#w.v");
    assert_eq!(updates[1].0, "w");
}

#[test]
fn test_constructor_skips_arrays() {
    let prototype = Rc::new(Prototype::new("Item"));
    let schemas = SchemaRegistry::new().with(
        "/T/",
        Schema::new().with_property("items", Schema::new().with_prototype(prototype)),
    );
    let options = ResolveOptions::new().with_id_prefix("/T/").with_schemas(schemas);
    let root = resolve_ok(
        r#"{ "id": "1", "items": [1, 2] }"#,
        &options,
        &mut Index::new(),
        &mut ChangeLog::new(),
    );
    let items = root.get("items").unwrap();
    let node = items.as_node().unwrap();
    assert!(node.is_array());
    assert_eq!(node.len(), 2);
    assert_eq!(items.get("1"), Some(Value::from(2)));
}

#[test]
fn test_circular_external_documents_terminate() {
    let fetches = Rc::new(Cell::new(0usize));
    let counter = fetches.clone();
    let options = ResolveOptions::new().with_fetcher(
        move |url: &str| -> Result<String, json_ref_core::fetch::BoxError> {
            counter.set(counter.get() + 1);
            match url {
                "a.json" => Ok(r#"{ "x": { "$ref": "b.json#y" } }"#.to_string()),
                "b.json" => Ok(r#"{ "y": { "$ref": "a.json#x" } }"#.to_string()),
                other => Err(format!("no document {other}").into()),
            }
        },
    );
    let root = resolve_ok(
        r#"{ "start": { "$ref": "a.json#x" } }"#,
        &options,
        &mut Index::new(),
        &mut ChangeLog::new(),
    );
    assert_eq!(fetches.get(), 2);
    let stub = root.get("start").unwrap().lazy_stub().unwrap();
    assert_eq!(stub.reference, "a.json#x");
}

#[test]
fn test_file_fetcher_refuses_parent_escape() {
    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("docs");
    fs::create_dir(&docs).unwrap();
    fs::write(dir.path().join("secret.json"), r#"{ "token": "hunter2" }"#).unwrap();
    fs::write(docs.join("public.json"), r#"{ "name": "open" }"#).unwrap();
    let options = ResolveOptions::new().with_fetcher(FileFetcher::new(&docs));

    let root = resolve_ok(
        r#"{ "ok": { "$ref": "sub/../public.json#name" } }"#,
        &options,
        &mut Index::new(),
        &mut ChangeLog::new(),
    );
    assert_eq!(root.get("ok"), Some(Value::from("open")));

    let err = resolve_err(r#"{ "leak": { "$ref": "../secret.json#token" } }"#, &options);
    match err {
        ResolveError::ExternalFetch { url, .. } => assert_eq!(url, "../secret.json"),
        other => panic!("Expected a fetch error, got {other:?}"),
    }
}
