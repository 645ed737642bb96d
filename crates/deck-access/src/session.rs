//! Session to actor resolution.

use deck_links::{LinkOptions, QueryOptions};
use deck_schema::Schema;
use deck_store::Backend;
use deck_types::{CardRef, Element, ElementId};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::AccessResult;

/// Verb from a session to the actor that owns it.
pub const OWNER_VERB: &str = "is owned by";

/// The actor a session belongs to.
///
/// A direct `data.actor` reference (an element id or a `slug@version`
/// reference) wins; otherwise the session's [`OWNER_VERB`] link is followed.
/// Returns `None` when neither leads to an existing element.
pub async fn session_owner(backend: &dyn Backend, session: &Element) -> AccessResult<Option<Element>> {
    if let Some(actor) = session.data.get("actor").and_then(Value::as_str) {
        debug!(session = %session.id, actor, "resolving session actor reference");
        if let Ok(id) = ElementId::parse(actor) {
            return Ok(backend.get_by_id(&id).await?);
        }
        return match CardRef::parse(actor) {
            Ok(reference) => Ok(backend
                .get_by_slug(&reference.slug, reference.exact_version())
                .await?),
            Err(_) => Ok(None),
        };
    }

    let mut links = Map::new();
    links.insert(
        OWNER_VERB.to_string(),
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        }),
    );
    let schema = Schema::parse(&json!({
        "type": "object",
        "properties": { "id": { "const": session.id } },
        "required": ["id"],
        "$$links": Value::Object(links)
    }))?;
    let mut options = QueryOptions::default().with_limit(1);
    options.links.insert(
        OWNER_VERB.to_string(),
        LinkOptions {
            limit: Some(1),
            ..Default::default()
        },
    );

    let results = backend.query(&schema, &options).await?;
    let owner = results
        .first()
        .and_then(|row| row.pointer(&format!("/links/{OWNER_VERB}/0/id")))
        .and_then(Value::as_str)
        .and_then(|id| ElementId::parse(id).ok());
    match owner {
        Some(id) => Ok(backend.get_by_id(&id).await?),
        None => Ok(None),
    }
}
