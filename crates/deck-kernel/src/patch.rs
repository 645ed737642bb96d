//! JSON patch (`add`, `replace`, `remove`) over card documents.
//!
//! A patch list applies to a copy of the card, so a failing operation
//! leaves the original untouched. Operations on protected top-level fields
//! are skipped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{KernelError, KernelResult};

/// Top-level fields a patch can never change.
pub const PROTECTED_FIELDS: &[&str] = &["id", "links", "linked_at", "created_at"];

/// One patch operation. `path` is a JSON pointer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self::Add {
            path: path.into(),
            value,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self::Replace {
            path: path.into(),
            value,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Replace { path, .. } | Self::Remove { path } => path,
        }
    }
}

/// Decode a patch list from JSON.
pub fn parse_patch(value: &Value) -> KernelResult<Vec<PatchOperation>> {
    serde_json::from_value(value.clone()).map_err(|e| KernelError::InvalidPatch(e.to_string()))
}

/// Escape one reference token for use in a JSON pointer.
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Split a JSON pointer into unescaped reference tokens.
pub fn parse_pointer(pointer: &str) -> KernelResult<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(KernelError::InvalidPatch(format!(
            "path {pointer:?} does not start with '/'"
        )));
    };
    rest.split('/').map(|raw| unescape(raw, pointer)).collect()
}

fn unescape(raw: &str, pointer: &str) -> KernelResult<String> {
    let mut token = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            token.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => token.push('~'),
            Some('1') => token.push('/'),
            _ => {
                return Err(KernelError::InvalidPatch(format!(
                    "bad escape in path {pointer:?}"
                )))
            }
        }
    }
    Ok(token)
}

/// Apply `operations` in order to a copy of `document`.
pub fn apply_patch(document: &Value, operations: &[PatchOperation]) -> KernelResult<Value> {
    let mut patched = document.clone();
    for operation in operations {
        let tokens = parse_pointer(operation.path())?;
        let Some((last, parents)) = tokens.split_last() else {
            return Err(KernelError::InvalidPatch(
                "the whole card cannot be patched".into(),
            ));
        };
        if PROTECTED_FIELDS.contains(&tokens[0].as_str()) {
            debug!(path = operation.path(), "skipping patch of protected field");
            continue;
        }
        let parent = resolve_mut(&mut patched, parents, operation.path())?;
        match operation {
            PatchOperation::Add { value, .. } => add(parent, last, value.clone(), operation.path())?,
            PatchOperation::Replace { value, .. } => {
                *child_mut(parent, last, operation.path())? = value.clone();
            }
            PatchOperation::Remove { .. } => remove(parent, last, operation.path())?,
        }
    }
    Ok(patched)
}

fn missing(path: &str) -> KernelError {
    KernelError::InvalidPatch(format!("path {path:?} does not exist"))
}

fn array_index(token: &str, path: &str) -> KernelResult<usize> {
    let canonical = token == "0" || (!token.starts_with('0') && !token.is_empty());
    match token.parse::<usize>() {
        Ok(index) if canonical => Ok(index),
        _ => Err(KernelError::InvalidPatch(format!(
            "bad array index {token:?} in {path:?}"
        ))),
    }
}

fn child_mut<'a>(value: &'a mut Value, token: &str, path: &str) -> KernelResult<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(token).ok_or_else(|| missing(path)),
        Value::Array(items) => {
            let index = array_index(token, path)?;
            items.get_mut(index).ok_or_else(|| missing(path))
        }
        _ => Err(missing(path)),
    }
}

fn resolve_mut<'a>(value: &'a mut Value, tokens: &[String], path: &str) -> KernelResult<&'a mut Value> {
    tokens
        .iter()
        .try_fold(value, |current, token| child_mut(current, token, path))
}

fn add(parent: &mut Value, token: &str, value: Value, path: &str) -> KernelResult<()> {
    match parent {
        Value::Object(map) => {
            map.insert(token.to_string(), value);
            Ok(())
        }
        Value::Array(items) if token == "-" => {
            items.push(value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(token, path)?;
            if index > items.len() {
                return Err(missing(path));
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(missing(path)),
    }
}

fn remove(parent: &mut Value, token: &str, path: &str) -> KernelResult<()> {
    match parent {
        Value::Object(map) => map.remove(token).map(|_| ()).ok_or_else(|| missing(path)),
        Value::Array(items) => {
            let index = array_index(token, path)?;
            if index >= items.len() {
                return Err(missing(path));
            }
            items.remove(index);
            Ok(())
        }
        _ => Err(missing(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_types::ErrorKind;
    use proptest::prelude::*;
    use serde_json::json;

    fn card() -> Value {
        json!({
            "id": "0190c0de-0000-7000-8000-000000000000",
            "slug": "card-a",
            "data": { "status": "open", "tags": ["a", "b"], "a/b": 1, "m~n": 2 },
            "linked_at": {}
        })
    }

    // ---- Test 1: Operations apply in order ----

    #[test]
    fn applies_in_order() {
        let patched = apply_patch(
            &card(),
            &[
                PatchOperation::replace("/data/status", json!("closed")),
                PatchOperation::add("/data/owner", json!("jane")),
                PatchOperation::add("/data/tags/-", json!("c")),
                PatchOperation::add("/data/tags/0", json!("z")),
                PatchOperation::remove("/data/tags/1"),
            ],
        )
        .unwrap();
        assert_eq!(patched["data"]["status"], "closed");
        assert_eq!(patched["data"]["owner"], "jane");
        assert_eq!(patched["data"]["tags"], json!(["z", "b", "c"]));
    }

    // ---- Test 2: Escaped tokens ----

    #[test]
    fn escaped_tokens() {
        let patched = apply_patch(
            &card(),
            &[
                PatchOperation::replace("/data/a~1b", json!(10)),
                PatchOperation::remove("/data/m~0n"),
            ],
        )
        .unwrap();
        assert_eq!(patched["data"]["a/b"], 10);
        assert!(patched["data"].get("m~n").is_none());
        assert!(parse_pointer("/data/bad~2").is_err());
    }

    // ---- Test 3: A failing operation aborts the whole list ----

    #[test]
    fn failing_operation_reports_invalid_patch() {
        let original = card();
        let err = apply_patch(
            &original,
            &[
                PatchOperation::replace("/data/status", json!("closed")),
                PatchOperation::remove("/data/nothing/here"),
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPatch);
        assert_eq!(original, card());

        for bad in [
            PatchOperation::replace("/data/missing", json!(1)),
            PatchOperation::add("/data/missing/child", json!(1)),
            PatchOperation::add("/data/tags/9", json!(1)),
            PatchOperation::remove("/data/tags/01"),
            PatchOperation::add("data/status", json!(1)),
            PatchOperation::add("", json!({})),
        ] {
            assert!(apply_patch(&original, &[bad.clone()]).is_err(), "{bad:?}");
        }
    }

    // ---- Test 4: Protected fields are skipped ----

    #[test]
    fn protected_fields_skipped() {
        let original = card();
        let patched = apply_patch(
            &original,
            &[
                PatchOperation::replace("/id", json!("other")),
                PatchOperation::add("/links/x", json!([])),
                PatchOperation::add("/linked_at/x", json!("2020-01-01T00:00:00Z")),
                PatchOperation::remove("/created_at"),
            ],
        )
        .unwrap();
        assert_eq!(patched, original);
    }

    // ---- Test 5: Decoding ----

    #[test]
    fn decodes_patch_lists() {
        let ops = parse_patch(&json!([
            { "op": "add", "path": "/data/x", "value": 1 },
            { "op": "remove", "path": "/data/y" }
        ]))
        .unwrap();
        assert_eq!(ops[1], PatchOperation::remove("/data/y"));

        for bad in [
            json!([{ "op": "move", "path": "/a", "from": "/b" }]),
            json!([{ "op": "add", "value": 1 }]),
            json!({ "op": "add" }),
        ] {
            let err = parse_patch(&bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidPatch);
        }
        assert!(apply_patch(&card(), &[]).unwrap() == card());
    }

    proptest! {
        #[test]
        fn pointer_escaping_round_trips(token in "[a-z~/0-9]{0,12}") {
            let pointer = format!("/data/{}", escape_token(&token));
            prop_assert_eq!(parse_pointer(&pointer).unwrap(), vec!["data".to_string(), token.clone()]);

            let patched = apply_patch(&card(), &[PatchOperation::add(pointer, json!(true))]).unwrap();
            prop_assert_eq!(&patched["data"][token.as_str()], &json!(true));
        }
    }
}
