use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

/// Server-assigned element identifier (UUID v7 for time-ordering).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(uuid::Uuid);

impl ElementId {
    /// Generate a fresh identifier. Only the storage backend calls this.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Parse from the hyphenated UUID form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidId(format!("{s}: {e}")))
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 characters of the UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementId({})", self.short_id())
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The universal stored record.
///
/// `links` is never persisted: the backend always stores it empty and the
/// query path fills it from the link graph. `created_at` is write-once and
/// `linked_at` only ever gains keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub slug: String,
    pub version: String,
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub markers: Vec<String>,
    #[serde(default)]
    pub requires: Vec<Value>,
    #[serde(default)]
    pub capabilities: Vec<Value>,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default)]
    pub links: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub linked_at: BTreeMap<String, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Element {
    /// Render the element as a JSON object, the shape queries run against.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| empty_object())
    }

    /// Decode an element from its JSON form.
    pub fn from_value(value: Value) -> Result<Self, TypeError> {
        serde_json::from_value(value).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// `slug@version` identity of this element.
    pub fn reference(&self) -> String {
        format!("{}@{}", self.slug, self.version)
    }

    /// The type slug without its version (`card@1.0.0` -> `card`).
    pub fn type_slug(&self) -> &str {
        self.element_type
            .split_once('@')
            .map(|(slug, _)| slug)
            .unwrap_or(&self.element_type)
    }

    /// Whether this element is a link record.
    pub fn is_link(&self) -> bool {
        self.type_slug() == "link"
    }

    /// Decode the link payload, if this element is a well-formed link.
    pub fn link_data(&self) -> Option<LinkData> {
        if !self.is_link() {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// One side of a link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEndpoint {
    pub id: ElementId,
    #[serde(rename = "type")]
    pub element_type: String,
}

/// Payload of a link element. The element's `name` is the forward verb.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkData {
    pub from: LinkEndpoint,
    pub to: LinkEndpoint,
    #[serde(rename = "inverseName")]
    pub inverse_name: String,
}

/// Caller-supplied input for inserts and upserts.
///
/// Every field is optional on the wire. `id`, `links`, `linked_at` and
/// `created_at` are accepted so that callers can send whole cards back,
/// but the backend never honours them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementDraft {
    pub id: Option<ElementId>,
    pub slug: Option<String>,
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub element_type: Option<String>,
    pub name: Option<String>,
    pub active: Option<bool>,
    pub tags: Vec<String>,
    pub markers: Vec<String>,
    pub requires: Vec<Value>,
    pub capabilities: Vec<Value>,
    pub data: Value,
    pub links: BTreeMap<String, Vec<Value>>,
    pub linked_at: BTreeMap<String, DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ElementDraft {
    /// A draft with only a slug and a type, the minimum the backend accepts.
    pub fn new(slug: impl Into<String>, element_type: impl Into<String>) -> Self {
        Self {
            slug: Some(slug.into()),
            element_type: Some(element_type.into()),
            ..Default::default()
        }
    }

    /// Builder-style setter for `data`.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Builder-style setter for `version`.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Builder-style setter for `name`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Draft carrying every caller-settable field of an existing element.
    pub fn from_element(element: &Element) -> Self {
        Self {
            id: Some(element.id),
            slug: Some(element.slug.clone()),
            version: Some(element.version.clone()),
            element_type: Some(element.element_type.clone()),
            name: element.name.clone(),
            active: Some(element.active),
            tags: element.tags.clone(),
            markers: element.markers.clone(),
            requires: element.requires.clone(),
            capabilities: element.capabilities.clone(),
            data: element.data.clone(),
            links: BTreeMap::new(),
            linked_at: BTreeMap::new(),
            created_at: None,
        }
    }

    /// Decode a draft from arbitrary JSON.
    pub fn from_value(value: Value) -> Result<Self, TypeError> {
        serde_json::from_value(value).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// `data`, with `null` normalised to an empty object.
    pub fn data_or_empty(&self) -> Value {
        if self.data.is_null() {
            empty_object()
        } else {
            self.data.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Element {
        Element {
            id: ElementId::new(),
            slug: "link-1".into(),
            version: "1.0.0".into(),
            element_type: "link@1.0.0".into(),
            name: Some("is attached to".into()),
            active: true,
            tags: vec![],
            markers: vec![],
            requires: vec![],
            capabilities: vec![],
            data: json!({
                "from": { "id": "0190a0b2-7c6e-7d2a-9f00-000000000001", "type": "card@1.0.0" },
                "to": { "id": "0190a0b2-7c6e-7d2a-9f00-000000000002", "type": "thread@1.0.0" },
                "inverseName": "has attached element"
            }),
            links: BTreeMap::new(),
            linked_at: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn element_id_parse_roundtrip() {
        let id = ElementId::new();
        assert_eq!(ElementId::parse(&id.to_string()).unwrap(), id);
        assert!(ElementId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn absent_optionals_are_not_rendered() {
        let mut element = sample();
        element.name = None;
        let value = element.to_value();
        assert!(value.get("name").is_none());
        assert!(value.get("updated_at").is_none());
        assert_eq!(value["type"], "link@1.0.0");
    }

    #[test]
    fn link_data_decodes() {
        let element = sample();
        assert!(element.is_link());
        let link = element.link_data().unwrap();
        assert_eq!(link.inverse_name, "has attached element");
        assert_eq!(link.to.element_type, "thread@1.0.0");
    }

    #[test]
    fn type_slug_strips_version() {
        let element = sample();
        assert_eq!(element.type_slug(), "link");
        assert_eq!(element.reference(), "link-1@1.0.0");
    }

    #[test]
    fn draft_accepts_partial_json() {
        let draft = ElementDraft::from_value(json!({ "slug": "foo", "type": "card@1.0.0" })).unwrap();
        assert_eq!(draft.slug.as_deref(), Some("foo"));
        assert!(draft.id.is_none());
        assert_eq!(draft.data_or_empty(), json!({}));
    }
}
