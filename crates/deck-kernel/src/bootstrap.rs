//! Type cards that must exist before any permission-aware operation.

use deck_types::ElementDraft;

use crate::error::{KernelError, KernelResult};

/// `(slug, document)` for every bootstrap type, in load order.
pub const BOOTSTRAP_TYPES: &[(&str, &str)] = &[
    ("type", include_str!("bootstrap/type.json")),
    ("card", include_str!("bootstrap/card.json")),
    ("user", include_str!("bootstrap/user.json")),
    ("session", include_str!("bootstrap/session.json")),
    ("role", include_str!("bootstrap/role.json")),
    ("link", include_str!("bootstrap/link.json")),
    ("view", include_str!("bootstrap/view.json")),
    ("action-request", include_str!("bootstrap/action-request.json")),
];

/// Parse the bootstrap type documents.
pub fn bootstrap_types() -> KernelResult<Vec<ElementDraft>> {
    BOOTSTRAP_TYPES
        .iter()
        .map(|(slug, document)| {
            let value = serde_json::from_str(document)
                .map_err(|e| KernelError::Config(format!("bootstrap type {slug}: {e}")))?;
            Ok(ElementDraft::from_value(value)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_schema::Schema;

    #[test]
    fn every_document_parses() {
        let types = bootstrap_types().unwrap();
        assert_eq!(types.len(), 8);
        for (draft, (slug, _)) in types.iter().zip(BOOTSTRAP_TYPES) {
            assert_eq!(draft.slug.as_deref(), Some(*slug));
            assert_eq!(draft.element_type.as_deref(), Some("type@1.0.0"));
            let schema = draft.data.get("schema").expect("schema");
            Schema::parse(schema).unwrap();
        }
    }
}
