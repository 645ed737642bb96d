//! Role read schemas and their merge.

use deck_schema::{get_path, union, Schema};
use deck_types::Element;
use serde_json::{Map, Value};
use tracing::{debug, warn};

const EVAL_KEY: &str = "$eval";
const ACTOR_PREFIX: &str = "user.";

/// Slug of the role element for role name `name`.
pub fn role_slug(name: &str) -> String {
    format!("role-{name}")
}

/// Substitute `{"$eval": "user.<path>"}` placeholders with the actor's
/// values and drop every `$id`.
///
/// A placeholder whose path is absent on the actor renders as `null`.
pub fn render_template(schema: &Value, actor: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            if let Some(expression) = placeholder(map) {
                return evaluate(expression, actor);
            }
            let rendered: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| key.as_str() != "$id")
                .map(|(key, value)| (key.clone(), render_template(value, actor)))
                .collect();
            Value::Object(rendered)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| render_template(item, actor)).collect())
        }
        other => other.clone(),
    }
}

fn placeholder(map: &Map<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get(EVAL_KEY).and_then(Value::as_str)
}

fn evaluate(expression: &str, actor: &Value) -> Value {
    let Some(path) = expression.strip_prefix(ACTOR_PREFIX) else {
        warn!(expression, "unsupported $eval expression");
        return Value::Null;
    };
    let segments: Vec<&str> = path.split('.').collect();
    get_path(actor, &segments).cloned().unwrap_or(Value::Null)
}

/// Union of the read schemas of `roles`, templated against `actor`.
///
/// Roles without a readable `data.read` schema are skipped with a warning.
/// With no usable role the result is the `false` schema: the actor sees
/// nothing.
pub fn merge_read_schema(roles: &[Element], actor: &Element) -> Schema {
    let actor_value = actor.to_value();
    let mut schemas = Vec::with_capacity(roles.len());
    for role in roles {
        let Some(read) = role.data.get("read") else {
            warn!(role = %role.slug, "role has no read schema");
            continue;
        };
        match Schema::parse(&render_template(read, &actor_value)) {
            Ok(schema) => schemas.push(schema),
            Err(err) => warn!(role = %role.slug, error = %err, "skipping role with invalid read schema"),
        }
    }
    debug!(actor = %actor.slug, roles = schemas.len(), "merged read schema");
    union(schemas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deck_schema::{compile, schema_projection, Projection};
    use deck_types::ElementId;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn element(slug: &str, element_type: &str, data: Value) -> Element {
        Element {
            id: ElementId::new(),
            slug: slug.to_string(),
            version: "1.0.0".to_string(),
            element_type: element_type.to_string(),
            name: None,
            active: true,
            tags: vec![],
            markers: vec![],
            requires: vec![],
            capabilities: vec![],
            data,
            links: BTreeMap::new(),
            linked_at: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    // ---- Test 1: Placeholders are replaced and $id dropped ----

    #[test]
    fn renders_placeholders() {
        let actor = json!({ "slug": "user-jane", "data": { "org": "acme" } });
        let rendered = render_template(
            &json!({
                "$id": "role-user",
                "properties": {
                    "slug": { "const": { "$eval": "user.slug" } },
                    "data": {
                        "$id": "nested",
                        "properties": { "org": { "enum": [{ "$eval": "user.data.org" }] } }
                    },
                    "owner": { "const": { "$eval": "user.data.missing" } }
                }
            }),
            &actor,
        );
        assert_eq!(
            rendered,
            json!({
                "properties": {
                    "slug": { "const": "user-jane" },
                    "data": { "properties": { "org": { "enum": ["acme"] } } },
                    "owner": { "const": null }
                }
            })
        );
    }

    // ---- Test 2: Objects with more keys are not placeholders ----

    #[test]
    fn eval_needs_a_lone_key() {
        let actor = json!({ "slug": "user-jane" });
        let schema = json!({ "$eval": "user.slug", "type": "string" });
        assert_eq!(render_template(&schema, &actor), schema);
        assert_eq!(render_template(&json!({ "$eval": "env.HOME" }), &actor), Value::Null);
    }

    // ---- Test 3: No roles, no access ----

    #[test]
    fn no_roles_sees_nothing() {
        let actor = element("user-jane", "user@1.0.0", json!({}));
        assert!(merge_read_schema(&[], &actor).is_false());

        let broken = element("role-broken", "role@1.0.0", json!({ "read": { "enum": [] } }));
        let unreadable = element("role-empty", "role@1.0.0", json!({}));
        assert!(merge_read_schema(&[broken, unreadable], &actor).is_false());
    }

    // ---- Test 4: Roles union ----

    #[test]
    fn roles_are_unioned() {
        let actor = element("user-jane", "user@1.0.0", json!({}));
        let types = element(
            "role-types",
            "role@1.0.0",
            json!({ "read": {
                "type": "object",
                "properties": { "type": { "const": "type@1.0.0" }, "slug": {} },
                "required": ["type"]
            }}),
        );
        let own = element(
            "role-own",
            "role@1.0.0",
            json!({ "read": {
                "type": "object",
                "properties": { "slug": { "const": { "$eval": "user.slug" } }, "data": {} },
                "required": ["slug"]
            }}),
        );
        let merged = merge_read_schema(&[types, own], &actor);
        let query = compile(&merged).unwrap();

        assert!(query.predicate.evaluate(&json!({ "slug": "user-jane", "type": "user@1.0.0" })));
        assert!(query.predicate.evaluate(&json!({ "slug": "card", "type": "type@1.0.0" })));
        assert!(!query.predicate.evaluate(&json!({ "slug": "user-joe", "type": "user@1.0.0" })));
        assert_ne!(schema_projection(&merged), Projection::Whole);
    }

    #[test]
    fn role_slugs() {
        assert_eq!(role_slug("user-community"), "role-user-community");
    }
}
