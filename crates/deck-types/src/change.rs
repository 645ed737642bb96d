use serde::{Deserialize, Serialize};

use crate::element::Element;

/// Classification of a row-level change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// A row-level change published by the storage backend.
///
/// `before` is the prior row for updates and `None` for inserts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub before: Option<Element>,
    pub after: Element,
}

impl RowChange {
    pub fn insert(after: Element) -> Self {
        Self {
            kind: ChangeKind::Insert,
            before: None,
            after,
        }
    }

    pub fn update(before: Element, after: Element) -> Self {
        Self {
            kind: ChangeKind::Update,
            before: Some(before),
            after,
        }
    }
}
