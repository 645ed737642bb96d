use deck_types::{ChangeKind, ElementId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A change delivered to one subscriber, projected through its schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub id: ElementId,
    /// `None` for inserts, including rows that existed but were not visible
    /// to this subscriber before the change.
    pub before: Option<Value>,
    pub after: Value,
}
