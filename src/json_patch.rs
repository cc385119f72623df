//! The ordered JSON Patch subset from §4.3: `add`, `replace`, `remove`,
//! `copy`, `move`, `test` over a JSON Pointer path. Not a general-purpose
//! `json-patch` crate integration — the spec's failure semantics ("test
//! failure, or any op referencing a missing from/path in a way that cannot
//! proceed, aborts the patch and leaves the body unchanged") are narrow
//! enough, and specific enough to this crate's "never corrupt the working
//! body" discipline, that the six ops are applied directly against
//! `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
    Copy { from: String, path: String },
    Move { from: String, path: String },
    Test { path: String, value: Value },
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("json pointer {0:?} does not resolve")]
    PointerNotFound(String),
    #[error("test op at {path:?} failed: expected {expected}, found {found}")]
    TestFailed {
        path: String,
        expected: Value,
        found: Value,
    },
    #[error("path {0:?} has no parent to attach to")]
    NoParent(String),
}

/// Apply every op in order against `doc`, returning the patched document.
/// On any failure the original `doc` is returned unchanged, matching §4.3's
/// "aborts the patch and leaves the body unchanged."
pub fn apply(doc: &Value, ops: &[PatchOp]) -> Value {
    let mut working = doc.clone();
    for op in ops {
        if let Err(err) = apply_one(&mut working, op) {
            tracing::warn!(%err, "json patch aborted, body left unchanged");
            return doc.clone();
        }
    }
    working
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Add { path, value } => set_pointer(doc, path, value.clone()),
        PatchOp::Replace { path, value } => {
            get_pointer(doc, path).ok_or_else(|| PatchError::PointerNotFound(path.clone()))?;
            set_pointer(doc, path, value.clone())
        }
        PatchOp::Remove { path } => remove_pointer(doc, path),
        PatchOp::Copy { from, path } => {
            let value = get_pointer(doc, from)
                .ok_or_else(|| PatchError::PointerNotFound(from.clone()))?
                .clone();
            set_pointer(doc, path, value)
        }
        PatchOp::Move { from, path } => {
            let value = get_pointer(doc, from)
                .ok_or_else(|| PatchError::PointerNotFound(from.clone()))?
                .clone();
            remove_pointer(doc, from)?;
            set_pointer(doc, path, value)
        }
        PatchOp::Test { path, value } => {
            let found = get_pointer(doc, path).ok_or_else(|| PatchError::PointerNotFound(path.clone()))?;
            if found == value {
                Ok(())
            } else {
                Err(PatchError::TestFailed {
                    path: path.clone(),
                    expected: value.clone(),
                    found: found.clone(),
                })
            }
        }
    }
}

/// Split a JSON Pointer into its unescaped tokens (`~1` -> `/`, `~0` -> `~`).
fn tokens(path: &str) -> Vec<String> {
    if path.is_empty() || path == "/" {
        return vec![];
    }
    path.trim_start_matches('/')
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn get_pointer<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = doc;
    for tok in tokens(path) {
        cur = match cur {
            Value::Object(map) => map.get(&tok)?,
            Value::Array(arr) => {
                let idx: usize = tok.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(cur)
}

fn set_pointer(doc: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    let toks = tokens(path);
    if toks.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (last, parents) = toks.split_last().expect("non-empty");
    let mut cur = doc;
    for tok in parents {
        cur = match cur {
            Value::Object(map) => map
                .get_mut(tok)
                .ok_or_else(|| PatchError::NoParent(path.to_string()))?,
            Value::Array(arr) => {
                let idx: usize = tok.parse().map_err(|_| PatchError::NoParent(path.to_string()))?;
                arr.get_mut(idx).ok_or_else(|| PatchError::NoParent(path.to_string()))?
            }
            _ => return Err(PatchError::NoParent(path.to_string())),
        };
    }
    match cur {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(arr) => {
            if last == "-" {
                arr.push(value);
            } else {
                let idx: usize = last.parse().map_err(|_| PatchError::NoParent(path.to_string()))?;
                if idx > arr.len() {
                    return Err(PatchError::NoParent(path.to_string()));
                }
                arr.insert(idx, value);
            }
            Ok(())
        }
        _ => Err(PatchError::NoParent(path.to_string())),
    }
}

fn remove_pointer(doc: &mut Value, path: &str) -> Result<(), PatchError> {
    let toks = tokens(path);
    let (last, parents) = toks
        .split_last()
        .ok_or_else(|| PatchError::PointerNotFound(path.to_string()))?;
    let mut cur = doc;
    for tok in parents {
        cur = match cur {
            Value::Object(map) => map
                .get_mut(tok)
                .ok_or_else(|| PatchError::PointerNotFound(path.to_string()))?,
            Value::Array(arr) => {
                let idx: usize = tok
                    .parse()
                    .map_err(|_| PatchError::PointerNotFound(path.to_string()))?;
                arr.get_mut(idx).ok_or_else(|| PatchError::PointerNotFound(path.to_string()))?
            }
            _ => return Err(PatchError::PointerNotFound(path.to_string())),
        };
    }
    match cur {
        Value::Object(map) => {
            map.remove(last).ok_or_else(|| PatchError::PointerNotFound(path.to_string()))?;
            Ok(())
        }
        Value::Array(arr) => {
            let idx: usize = last.parse().map_err(|_| PatchError::PointerNotFound(path.to_string()))?;
            if idx >= arr.len() {
                return Err(PatchError::PointerNotFound(path.to_string()));
            }
            arr.remove(idx);
            Ok(())
        }
        _ => Err(PatchError::PointerNotFound(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_applies_in_order() {
        let doc = json!({"status": "bad"});
        let ops = vec![PatchOp::Replace {
            path: "/status".into(),
            value: json!("ok"),
        }];
        assert_eq!(apply(&doc, &ops), json!({"status": "ok"}));
    }

    #[test]
    fn test_op_failure_leaves_document_unchanged() {
        let doc = json!({"status": "bad"});
        let ops = vec![
            PatchOp::Test {
                path: "/status".into(),
                value: json!("ok"),
            },
            PatchOp::Replace {
                path: "/status".into(),
                value: json!("should-not-apply"),
            },
        ];
        assert_eq!(apply(&doc, &ops), doc);
    }

    #[test]
    fn test_op_matching_value_round_trips_byte_identical() {
        let doc = json!({"a": 1, "b": [1, 2, 3]});
        let ops = vec![PatchOp::Test {
            path: "/a".into(),
            value: json!(1),
        }];
        let patched = apply(&doc, &ops);
        let round_tripped: Value = serde_json::from_str(&serde_json::to_string(&patched).unwrap()).unwrap();
        assert_eq!(round_tripped, doc);
    }

    #[test]
    fn move_and_copy() {
        let doc = json!({"a": 1});
        let ops = vec![
            PatchOp::Copy {
                from: "/a".into(),
                path: "/b".into(),
            },
            PatchOp::Move {
                from: "/a".into(),
                path: "/c".into(),
            },
        ];
        assert_eq!(apply(&doc, &ops), json!({"b": 1, "c": 1}));
    }

    #[test]
    fn tilde_and_slash_escapes() {
        let doc = json!({"a/b": {"c~d": 1}});
        let ops = vec![PatchOp::Replace {
            path: "/a~1b/c~0d".into(),
            value: json!(2),
        }];
        assert_eq!(apply(&doc, &ops), json!({"a/b": {"c~d": 2}}));
    }

    #[test]
    fn missing_from_aborts_patch() {
        let doc = json!({"a": 1});
        let ops = vec![PatchOp::Move {
            from: "/missing".into(),
            path: "/b".into(),
        }];
        assert_eq!(apply(&doc, &ops), doc);
    }
}
