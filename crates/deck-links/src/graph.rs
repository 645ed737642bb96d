//! Adjacency index over active link elements.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use deck_types::{Element, ElementId};

/// One traversable edge: following `verb` from some element reaches `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkEdge {
    /// The link element that created this edge.
    pub link_id: ElementId,
    pub target: ElementId,
    /// `created_at` of the link element.
    pub created_at: DateTime<Utc>,
}

/// Read access to elements and link edges.
///
/// Implemented by storage backends over a consistent snapshot of their
/// state, so a whole query sees one version of the graph.
pub trait GraphSource: Send + Sync {
    /// Fetch an element by id.
    fn element(&self, id: &ElementId) -> Option<Element>;

    /// Edges leaving `from` under `verb`, in link creation order.
    fn edges(&self, from: &ElementId, verb: &str) -> Vec<LinkEdge>;
}

/// The two index entries a link contributes.
#[derive(Clone, Debug)]
struct Indexed {
    from: ElementId,
    verb: String,
    to: ElementId,
    inverse_verb: String,
}

/// `(element, verb) -> edges` in both link directions.
///
/// A link named `is attached to` from card C to thread T with inverse name
/// `has attached element` yields `(C, "is attached to") -> T` and
/// `(T, "has attached element") -> C`. Inactive links are not indexed.
#[derive(Clone, Debug, Default)]
pub struct LinkIndex {
    edges: HashMap<(ElementId, String), Vec<LinkEdge>>,
    links: HashMap<ElementId, Indexed>,
}

impl LinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a link element, replacing any earlier state of the same link.
    ///
    /// Returns the two endpoints when the link is active and well-formed,
    /// `None` when it was not indexed.
    pub fn upsert(&mut self, link: &Element) -> Option<(ElementId, ElementId)> {
        self.remove(&link.id);
        if !link.active {
            return None;
        }
        let data = link.link_data()?;
        let verb = link.name.clone()?;

        let forward = LinkEdge {
            link_id: link.id,
            target: data.to.id,
            created_at: link.created_at,
        };
        let reverse = LinkEdge {
            link_id: link.id,
            target: data.from.id,
            created_at: link.created_at,
        };
        self.edges
            .entry((data.from.id, verb.clone()))
            .or_default()
            .push(forward);
        self.edges
            .entry((data.to.id, data.inverse_name.clone()))
            .or_default()
            .push(reverse);
        self.links.insert(
            link.id,
            Indexed {
                from: data.from.id,
                verb,
                to: data.to.id,
                inverse_verb: data.inverse_name,
            },
        );
        Some((data.from.id, data.to.id))
    }

    /// Drop a link from the index. Unknown ids are ignored.
    pub fn remove(&mut self, link_id: &ElementId) {
        let Some(indexed) = self.links.remove(link_id) else {
            return;
        };
        for key in [
            (indexed.from, indexed.verb),
            (indexed.to, indexed.inverse_verb),
        ] {
            if let Some(list) = self.edges.get_mut(&key) {
                list.retain(|edge| edge.link_id != *link_id);
                if list.is_empty() {
                    self.edges.remove(&key);
                }
            }
        }
    }

    pub fn edges(&self, from: &ElementId, verb: &str) -> &[LinkEdge] {
        self.edges
            .get(&(*from, verb.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of indexed links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
