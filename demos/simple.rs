use json_ref_core::{from_json, to_json, ChangeLog, Index, ResolveOptions, SerializeOptions};

fn main() {
    let messages = [
        r#"{ "id": "order-1", "customer": { "$ref": "cust-7" }, "total": 40 }"#,
        r#"{ "id": "cust-7", "name": "Jane Doe", "orders": [{ "$ref": "order-1" }] }"#,
        r#"{ "id": "order-1", "customer": { "$ref": "cust-7" }, "total": 45 }"#,
    ];

    let options = ResolveOptions::new().assign_absolute_ids(true);
    let mut index = Index::new();
    let mut log = ChangeLog::new();

    for (i, message) in messages.iter().enumerate() {
        log.clear();
        match from_json(message, &format!("message-{i}.json"), &options, &mut index, &mut log) {
            Ok(value) => {
                println!("message {i}: {}", to_json(&value, &SerializeOptions::new().pretty(true)));
                for (key, old, new) in log.updates() {
                    println!("  changed {key}: {old:?} -> {new:?}");
                }
            }
            Err(e) => {
                eprintln!("Failed to resolve message {i}: {e:?}");
            }
        }
    }
    println!("unresolved: {:?}", index.lazy_ids());
}
