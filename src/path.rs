//! Reference strings: building them while walking a graph, and taking them
//! apart again when resolving.
//!
//! The two directions agree exactly: `parse(&join(p, s)).to_string() == join(p, s)`
//! for every path `p` produced by `join` (or the root path `#`).

use std::fmt::{self, Write};

/// The path of a document's root.
pub const ROOT: &str = "#";

/// One accessor in a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Key(String),
    Index(usize),
}

impl Step {
    /// The key this step addresses on a node.
    pub fn key(&self) -> String {
        match self {
            Step::Key(key) => key.clone(),
            Step::Index(i) => i.to_string(),
        }
    }

    fn write_first(&self, out: &mut String) {
        match self {
            Step::Key(key) if is_identifier(key) && key != "$" && key != "this" => {
                out.push_str(key);
            }
            _ => {
                let _ = write!(out, "{self}");
            }
        }
    }
}

impl From<&str> for Step {
    fn from(key: &str) -> Self {
        Step::Key(key.to_string())
    }
}

impl From<usize> for Step {
    fn from(i: usize) -> Self {
        Step::Index(i)
    }
}

/// Subsequent-accessor form: `.name`, `[3]` or `["any key"]`.
impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Key(key) if is_identifier(key) => write!(f, ".{key}"),
            Step::Key(key) => write!(f, "[{}]", serde_json::Value::String(key.clone())),
            Step::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Where a path starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Base {
    /// The root of the document being resolved (`#`, `$`, `this` or empty).
    Root,
    /// A literal id written without a `#`, e.g. `user7.name`.
    Id(String),
    /// The leading name after a bare `#`: a property of the root when the
    /// root has one, otherwise an id in the index.
    Named(String),
}

/// A parsed reference string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    /// Text before `#` when non-empty: an indexed id or an external document.
    pub document: Option<String>,
    pub base: Base,
    pub steps: Vec<Step>,
}

impl PathExpr {
    /// The id this expression names when it has no steps, i.e. when it could
    /// be declared ahead of the object that will eventually carry that id.
    pub fn bare_id(&self) -> Option<&str> {
        if !self.steps.is_empty() {
            return None;
        }
        match (&self.document, &self.base) {
            (None, Base::Id(id)) | (None, Base::Named(id)) => Some(id),
            (Some(doc), Base::Root) => Some(doc),
            _ => None,
        }
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        let mut steps = self.steps.iter();
        match (&self.document, &self.base) {
            (Some(doc), _) => {
                out.push_str(doc);
                out.push('#');
                if let Some(first) = steps.next() {
                    first.write_first(&mut out);
                }
            }
            (None, Base::Root) => out.push('#'),
            (None, Base::Named(name)) => {
                out.push('#');
                out.push_str(name);
            }
            (None, Base::Id(id)) => out.push_str(id),
        }
        for step in steps {
            let _ = write!(out, "{step}");
        }
        f.write_str(&out)
    }
}

/// Appends one accessor to a path. The first accessor after an id is
/// separated by `#`, later ones by `.` (or brackets).
pub fn join(path: &str, step: &Step) -> String {
    let mut out = String::from(path);
    if path == ROOT {
        step.write_first(&mut out);
    } else if path.contains('#') {
        let _ = write!(out, "{step}");
    } else {
        out.push('#');
        step.write_first(&mut out);
    }
    out
}

/// Splits a reference string into document, base and steps. Never fails:
/// malformed step syntax degrades to literal keys, which simply will not
/// resolve.
pub fn parse(reference: &str) -> PathExpr {
    match reference.split_once('#') {
        Some((head, tail)) if !head.is_empty() => PathExpr {
            document: Some(head.to_string()),
            base: Base::Root,
            steps: parse_steps(tail),
        },
        Some((_, tail)) => {
            if tail.is_empty() || tail.starts_with(['.', '[']) {
                return PathExpr {
                    document: None,
                    base: Base::Root,
                    steps: parse_steps(tail),
                };
            }
            let (name, rest) = split_base(tail);
            let base = match name {
                "$" | "this" => Base::Root,
                _ => Base::Named(name.to_string()),
            };
            PathExpr {
                document: None,
                base,
                steps: parse_steps(rest),
            }
        }
        None => {
            let (name, rest) = split_base(reference);
            let base = match name {
                "" | "$" | "this" => Base::Root,
                _ => Base::Id(name.to_string()),
            };
            PathExpr {
                document: None,
                base,
                steps: parse_steps(rest),
            }
        }
    }
}

/// Leading id text: everything up to the last `/` before any bracket, then
/// up to the first `.` or `[`.
fn split_base(text: &str) -> (&str, &str) {
    let bracket = text.find('[').unwrap_or(text.len());
    let dir_end = text[..bracket].rfind('/').map_or(0, |i| i + 1);
    let end = text[dir_end..]
        .find(['.', '['])
        .map_or(text.len(), |i| dir_end + i);
    (&text[..end], &text[end..])
}

/// Steps are `.name`, `[n]`, `["key"]` or `['key']`. A bare leading name is
/// accepted too; it is how the first step after `id#` is written.
fn parse_steps(text: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let (step, remaining) = parse_bracket(after);
            steps.push(step);
            rest = remaining;
        } else {
            let body = rest.strip_prefix('.').unwrap_or(rest);
            let end = body.find(['.', '[']).unwrap_or(body.len());
            steps.push(Step::Key(body[..end].to_string()));
            rest = &body[end..];
        }
    }
    steps
}

fn parse_bracket(after: &str) -> (Step, &str) {
    if after.starts_with('"') {
        if let Some(close) = closing_quote(after) {
            let quoted = &after[..=close];
            let key = serde_json::from_str::<String>(quoted)
                .unwrap_or_else(|_| quoted.trim_matches('"').to_string());
            let remaining = &after[close + 1..];
            return (Step::Key(key), remaining.strip_prefix(']').unwrap_or(remaining));
        }
    } else if let Some(inner) = after.strip_prefix('\'') {
        if let Some(close) = inner.find('\'') {
            let remaining = &inner[close + 1..];
            return (
                Step::Key(inner[..close].to_string()),
                remaining.strip_prefix(']').unwrap_or(remaining),
            );
        }
    }
    let end = after.find(']').unwrap_or(after.len());
    let raw = &after[..end];
    let step = match raw.parse::<usize>() {
        Ok(i) if raw.bytes().all(|b| b.is_ascii_digit()) => Step::Index(i),
        _ => Step::Key(raw.to_string()),
    };
    (step, after.get(end + 1..).unwrap_or(""))
}

/// Byte offset of the quote closing a JSON string that starts at offset 0.
fn closing_quote(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in text.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i),
            _ => {}
        }
    }
    None
}

/// `[A-Za-z_$][A-Za-z0-9_$]*`
pub fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Applies `prefix` to `id` and normalizes the result into an index key.
///
/// An absolute URL (`scheme://`) or an absolute path (`//`) inside the
/// combined text discards everything before it; `segment/../` pairs are
/// collapsed.
pub fn absolute_id(prefix: &str, id: &str) -> String {
    let combined = format!("{prefix}{id}");
    let mut id = match scheme_start(&combined) {
        Some(start) => combined[start..].to_string(),
        None => match combined.rfind("//") {
            Some(pos) => combined[pos + 1..].to_string(),
            None => combined,
        },
    };
    while let Some(collapsed) = collapse_parent(&id) {
        id = collapsed;
    }
    id
}

/// Start of the first `word://` that begins the text or follows a `/`.
fn scheme_start(text: &str) -> Option<usize> {
    let sep = text.find("://")?;
    let start = text[..sep]
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
        .last()
        .map(|(i, _)| i)?;
    (start == 0 || text[..start].ends_with('/')).then_some(start)
}

/// Removes the first `segment/../` whose segment has no `/` or `.`.
fn collapse_parent(id: &str) -> Option<String> {
    let mut from = 0;
    while let Some(found) = id[from..].find("/../") {
        let at = from + found;
        let seg_start = id[..at].rfind('/').map_or(0, |i| i + 1);
        let segment = &id[seg_start..at];
        if !segment.is_empty() && !segment.contains('.') {
            return Some(format!("{}{}", &id[..seg_start], &id[at + 4..]));
        }
        from = at + 1;
    }
    None
}
