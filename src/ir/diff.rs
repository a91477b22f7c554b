//! Structural Diff
//!
//! Computes add/replace/remove operations between two JSON documents,
//! addressed by slash-delimited pointers. The operations explain a state
//! transition; they are never used to rebuild the snapshot they describe.

use crate::error::{RecommenderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A primitive edit addressed by a JSON pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Remove { path } => path,
        }
    }
}

impl std::fmt::Display for PatchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchOperation::Add { path, value } => write!(f, "add {} = {}", path, value),
            PatchOperation::Replace { path, value } => write!(f, "replace {} = {}", path, value),
            PatchOperation::Remove { path } => write!(f, "remove {}", path),
        }
    }
}

/// Compute the ordered edits that turn `before` into `after`.
pub fn diff(before: &Value, after: &Value) -> Vec<PatchOperation> {
    let mut ops = Vec::new();
    diff_into("", before, after, &mut ops);
    ops
}

fn diff_into(path: &str, before: &Value, after: &Value, ops: &mut Vec<PatchOperation>) {
    if before == after {
        return;
    }

    match (before, after) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old) in a {
                let child = join(path, key);
                match b.get(key) {
                    Some(new) => diff_into(&child, old, new, ops),
                    None => ops.push(PatchOperation::Remove { path: child }),
                }
            }
            for (key, new) in b {
                if !a.contains_key(key) {
                    ops.push(PatchOperation::Add {
                        path: join(path, key),
                        value: new.clone(),
                    });
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let common = a.len().min(b.len());
            for i in 0..common {
                diff_into(&join(path, &i.to_string()), &a[i], &b[i], ops);
            }
            for (i, new) in b.iter().enumerate().skip(common) {
                ops.push(PatchOperation::Add {
                    path: join(path, &i.to_string()),
                    value: new.clone(),
                });
            }
            // Trailing removals run back to front so indices stay valid
            for i in (common..a.len()).rev() {
                ops.push(PatchOperation::Remove {
                    path: join(path, &i.to_string()),
                });
            }
        }
        _ => ops.push(PatchOperation::Replace {
            path: path.to_string(),
            value: after.clone(),
        }),
    }
}

fn join(path: &str, token: &str) -> String {
    format!("{}/{}", path, token.replace('~', "~0").replace('/', "~1"))
}

fn split_pointer(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| RecommenderError::InvalidConfig(format!("Invalid pointer '{}'", path)))?;
    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn bad_path(path: &str) -> RecommenderError {
    RecommenderError::InvalidConfig(format!("Patch path '{}' does not resolve", path))
}

/// Apply edits in order. Provided for audit tooling and tests.
pub fn apply_operations(doc: &mut Value, ops: &[PatchOperation]) -> Result<()> {
    for op in ops {
        apply_one(doc, op)?;
    }
    Ok(())
}

fn apply_one(doc: &mut Value, op: &PatchOperation) -> Result<()> {
    let path = op.path();
    let mut tokens = split_pointer(path)?;
    let last = match tokens.pop() {
        Some(last) => last,
        None => {
            return match op {
                PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. } => {
                    *doc = value.clone();
                    Ok(())
                }
                PatchOperation::Remove { .. } => Err(bad_path(path)),
            };
        }
    };

    let mut parent = doc;
    for token in &tokens {
        parent = match parent {
            Value::Object(map) => map.get_mut(token.as_str()),
            Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        }
        .ok_or_else(|| bad_path(path))?;
    }

    match parent {
        Value::Object(map) => match op {
            PatchOperation::Add { value, .. } => {
                map.insert(last, value.clone());
            }
            PatchOperation::Replace { value, .. } => {
                let slot = map.get_mut(last.as_str()).ok_or_else(|| bad_path(path))?;
                *slot = value.clone();
            }
            PatchOperation::Remove { .. } => {
                map.remove(last.as_str()).ok_or_else(|| bad_path(path))?;
            }
        },
        Value::Array(items) => {
            let index = if last == "-" {
                items.len()
            } else {
                last.parse::<usize>().map_err(|_| bad_path(path))?
            };
            match op {
                PatchOperation::Add { value, .. } if index <= items.len() => {
                    items.insert(index, value.clone());
                }
                PatchOperation::Replace { value, .. } if index < items.len() => {
                    items[index] = value.clone();
                }
                PatchOperation::Remove { .. } if index < items.len() => {
                    items.remove(index);
                }
                _ => return Err(bad_path(path)),
            }
        }
        _ => return Err(bad_path(path)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_documents_produce_no_ops() {
        let doc = json!({"a": {"b": [1, 2]}});
        assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn test_nested_add_replace_remove() {
        let before = json!({"train": {"lr": 0.1, "epochs": 3}, "data": {}});
        let after = json!({"train": {"lr": 0.2}, "data": {"path": "x.jsonl"}});

        let ops = diff(&before, &after);
        assert_eq!(
            ops,
            vec![
                PatchOperation::Replace { path: "/train/lr".into(), value: json!(0.2) },
                PatchOperation::Remove { path: "/train/epochs".into() },
                PatchOperation::Add { path: "/data/path".into(), value: json!("x.jsonl") },
            ]
        );
    }

    #[test]
    fn test_pointer_escaping() {
        let before = json!({});
        let after = json!({"a/b": 1, "c~d": 2});
        let ops = diff(&before, &after);
        assert_eq!(ops[0].path(), "/a~1b");
        assert_eq!(ops[1].path(), "/c~0d");

        let mut rebuilt = before.clone();
        apply_operations(&mut rebuilt, &ops).unwrap();
        assert_eq!(rebuilt, after);
    }

    #[test]
    fn test_array_shrink_and_grow_rebuild() {
        let before = json!({"xs": [1, 2, 3, 4], "ys": [1]});
        let after = json!({"xs": [1, 9], "ys": [1, {"k": "v"}, 3]});

        let ops = diff(&before, &after);
        let mut rebuilt = before.clone();
        apply_operations(&mut rebuilt, &ops).unwrap();
        assert_eq!(rebuilt, after);
    }

    #[test]
    fn test_type_change_is_replace() {
        let ops = diff(&json!({"a": {"b": 1}}), &json!({"a": [1]}));
        assert_eq!(ops, vec![PatchOperation::Replace { path: "/a".into(), value: json!([1]) }]);
    }

    #[test]
    fn test_apply_rejects_missing_path() {
        let mut doc = json!({"a": 1});
        let ops = vec![PatchOperation::Remove { path: "/missing".into() }];
        assert!(apply_operations(&mut doc, &ops).is_err());
    }

    #[test]
    fn test_operation_serializes_as_json_patch() {
        let op = PatchOperation::Add { path: "/a".into(), value: json!(1) };
        assert_eq!(serde_json::to_value(&op).unwrap(), json!({"op": "add", "path": "/a", "value": 1}));
    }
}
