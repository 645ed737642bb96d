use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use deck_access::{PermissionFilter, Scope};
use deck_links::QueryOptions;
use deck_schema::{validate, Schema};
use deck_store::{Backend, InMemoryBackend, StoreError};
use deck_stream::Subscription;
use deck_types::{
    CardRef, Element, ElementDraft, ElementId, TypeError, DEFAULT_VERSION, LINK_TYPE,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::bootstrap::bootstrap_types;
use crate::caller::{Caller, SystemToken};
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::patch::{apply_patch, PatchOperation};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteMode {
    Insert,
    Replace,
}

/// The kernel facade.
///
/// Every read for a [`Caller::Session`] is filtered through the session
/// actor's merged read schema; [`Caller::System`] reads are unfiltered.
/// Writes are validated against the schema of the card's type.
pub struct Kernel {
    backend: Arc<dyn Backend>,
    access: PermissionFilter,
    config: KernelConfig,
    /// Lock owner used for system callers.
    system_owner: ElementId,
}

impl Kernel {
    pub fn new(backend: Arc<dyn Backend>, config: KernelConfig) -> Self {
        Self {
            access: PermissionFilter::new(Arc::clone(&backend)),
            backend,
            config,
            system_owner: ElementId::new(),
        }
    }

    /// A kernel over a fresh [`InMemoryBackend`].
    pub fn in_memory(config: KernelConfig) -> Self {
        let backend = InMemoryBackend::with_config(config.store.clone(), config.stream.clone());
        Self::new(Arc::new(backend), config)
    }

    /// The unrestricted caller.
    pub fn system(&self) -> Caller {
        Caller::System(SystemToken::issue())
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Upsert the bootstrap type cards.
    pub async fn bootstrap(&self) -> KernelResult<Vec<Element>> {
        let mut loaded = Vec::new();
        for draft in bootstrap_types()? {
            loaded.push(self.backend.upsert(draft).await?);
        }
        info!(types = loaded.len(), "bootstrap types loaded");
        Ok(loaded)
    }

    // ---- Reads ----

    pub async fn get_card_by_id(&self, caller: &Caller, id: &ElementId) -> KernelResult<Option<Value>> {
        let scope = self.scope(caller).await?;
        match self.backend.get_by_id(id).await? {
            Some(element) => self.view(scope.as_ref(), &element).await,
            None => Ok(None),
        }
    }

    /// Look up `slug@version`, `slug@latest` or a bare slug.
    pub async fn get_card_by_slug(&self, caller: &Caller, reference: &str) -> KernelResult<Option<Value>> {
        let reference = CardRef::parse(reference)?;
        let scope = self.scope(caller).await?;
        match self
            .backend
            .get_by_slug(&reference.slug, reference.exact_version())
            .await?
        {
            Some(element) => self.view(scope.as_ref(), &element).await,
            None => Ok(None),
        }
    }

    pub async fn query(
        &self,
        caller: &Caller,
        schema: &Value,
        options: &QueryOptions,
    ) -> KernelResult<Vec<Value>> {
        let schema = self.caller_schema(caller, schema).await?;
        Ok(self.backend.query(&schema, options).await?)
    }

    pub async fn stream(&self, caller: &Caller, schema: &Value) -> KernelResult<Subscription> {
        let schema = self.caller_schema(caller, schema).await?;
        Ok(self.backend.stream(&schema).await?)
    }

    // ---- Writes ----

    pub async fn insert_card(&self, caller: &Caller, card: ElementDraft) -> KernelResult<Value> {
        self.write_card(caller, card, WriteMode::Insert).await
    }

    /// Insert or replace by `slug@version`. `created_at` and `linked_at` of
    /// an existing card are kept.
    pub async fn replace_card(&self, caller: &Caller, card: ElementDraft) -> KernelResult<Value> {
        self.write_card(caller, card, WriteMode::Replace).await
    }

    /// Apply `operations` to the card atomically.
    ///
    /// The card's advisory lock is held while the patch is applied, so
    /// concurrent patches of one card serialize.
    pub async fn patch_card_by_slug(
        &self,
        caller: &Caller,
        reference: &str,
        operations: &[PatchOperation],
    ) -> KernelResult<Value> {
        let reference = CardRef::parse(reference)?;
        let scope = self.scope(caller).await?;
        let current = self.load_visible(&reference, scope.as_ref()).await?;
        if operations.is_empty() {
            return self.require_view(scope.as_ref(), &current).await;
        }

        let owner = scope.as_ref().map_or(self.system_owner, |s| s.actor.id);
        let key = current.reference();
        self.acquire(&owner, &key).await?;
        let result = self.patch_locked(scope.as_ref(), &current, operations).await;
        match self.backend.unlock(&owner, &key).await {
            Ok(true) => {}
            Ok(false) => warn!(key = %key, "patch lock was taken over before release"),
            Err(err) => warn!(key = %key, error = %err, "failed to release patch lock"),
        }
        result
    }

    /// Link two cards through a relationship type.
    ///
    /// The relationship's `type_pairs` decide which card is the `from` side:
    /// if only `(type of b, type of a)` is declared, the link runs from `b`
    /// to `a`.
    pub async fn link_cards(
        &self,
        caller: &Caller,
        card_a: &str,
        card_b: &str,
        relationship: &str,
    ) -> KernelResult<Value> {
        let scope = self.scope(caller).await?;
        let a = self.load_visible(&CardRef::parse(card_a)?, scope.as_ref()).await?;
        let b = self.load_visible(&CardRef::parse(card_b)?, scope.as_ref()).await?;

        let relation = self.type_card(relationship).await?;
        let data = &relation.data;
        let (Some(true), Some(forward), Some(reverse)) = (
            data.get("is_relationship").and_then(Value::as_bool),
            data.get("forward").and_then(Value::as_str),
            data.get("reverse").and_then(Value::as_str),
        ) else {
            return Err(KernelError::UnknownCardType(format!(
                "{relationship} is not a relationship type"
            )));
        };

        let pairs = type_pairs(data);
        let (from, to) = if declares_pair(&pairs, &a, &b) {
            (&a, &b)
        } else if declares_pair(&pairs, &b, &a) {
            (&b, &a)
        } else {
            return Err(KernelError::SchemaMismatch(format!(
                "{relationship} does not relate {} to {}",
                a.element_type, b.element_type
            )));
        };
        debug!(from = %from.reference(), verb = forward, to = %to.reference(), "linking cards");

        let link = ElementDraft {
            id: Some(ElementId::new()),
            element_type: Some(LINK_TYPE.to_string()),
            name: Some(forward.to_string()),
            data: json!({
                "from": { "id": from.id, "type": from.element_type },
                "to": { "id": to.id, "type": to.element_type },
                "inverseName": reverse
            }),
            ..Default::default()
        };
        self.write_card(caller, link, WriteMode::Insert).await
    }

    // ---- Locks ----

    pub async fn lock(
        &self,
        owner: &ElementId,
        key: &str,
        reference_time: Option<DateTime<Utc>>,
    ) -> KernelResult<Option<String>> {
        Ok(self.backend.lock(owner, key, reference_time).await?)
    }

    pub async fn unlock(&self, owner: &ElementId, key: &str) -> KernelResult<bool> {
        Ok(self.backend.unlock(owner, key).await?)
    }

    // ---- Internals ----

    async fn scope(&self, caller: &Caller) -> KernelResult<Option<Scope>> {
        match caller {
            Caller::System(_) => Ok(None),
            Caller::Session(session) => Ok(Some(self.access.scope(session).await?)),
        }
    }

    async fn caller_schema(&self, caller: &Caller, schema: &Value) -> KernelResult<Schema> {
        let schema = Schema::parse(schema)?;
        Ok(match self.scope(caller).await? {
            Some(scope) => scope.restrict(&schema),
            None => schema,
        })
    }

    /// `element` as the scope sees it, or `None` if it is not visible.
    async fn view(&self, scope: Option<&Scope>, element: &Element) -> KernelResult<Option<Value>> {
        let Some(scope) = scope else {
            return Ok(Some(element.to_value()));
        };
        let open = Schema::parse(&json!({ "additionalProperties": true }))?;
        Ok(self.backend.evaluate(&scope.restrict(&open), element).await?)
    }

    async fn require_view(&self, scope: Option<&Scope>, element: &Element) -> KernelResult<Value> {
        self.view(scope, element)
            .await?
            .ok_or_else(|| KernelError::NoElement(element.reference()))
    }

    /// The element behind `reference`. Elements the scope cannot read are
    /// reported missing.
    async fn load_visible(&self, reference: &CardRef, scope: Option<&Scope>) -> KernelResult<Element> {
        let element = self
            .backend
            .get_by_slug(&reference.slug, reference.exact_version())
            .await?
            .ok_or_else(|| KernelError::NoElement(reference.to_string()))?;
        if let Some(scope) = scope {
            if !scope.admits(&element)? {
                return Err(KernelError::NoElement(reference.to_string()));
            }
        }
        Ok(element)
    }

    async fn type_card(&self, type_reference: &str) -> KernelResult<Element> {
        let unknown = || KernelError::UnknownCardType(type_reference.to_string());
        let reference = CardRef::parse(type_reference).map_err(|_| unknown())?;
        self.backend
            .get_by_slug(&reference.slug, reference.exact_version())
            .await?
            .filter(|card| card.active && card.type_slug() == "type")
            .ok_or_else(unknown)
    }

    async fn write_card(&self, caller: &Caller, mut card: ElementDraft, mode: WriteMode) -> KernelResult<Value> {
        if let Some(slug) = &card.slug {
            if slug.contains('@') {
                return Err(TypeError::InvalidSlug {
                    slug: slug.clone(),
                    reason: "slug must not carry a version".into(),
                }
                .into());
            }
        }
        card.links.clear();
        card.linked_at.clear();
        card.created_at = None;

        let scope = self.scope(caller).await?;
        let Some(type_reference) = card.element_type.clone() else {
            return Err(StoreError::MissingType {
                slug: card.slug.clone().unwrap_or_default(),
            }
            .into());
        };
        let type_card = self.type_card(&type_reference).await?;
        let candidate = preview(&card);
        check_type(&type_card, &candidate)?;

        if let Some(scope) = &scope {
            if mode == WriteMode::Replace {
                let version = candidate.version.as_str();
                if let Some(existing) = self.backend.get_by_slug(&candidate.slug, Some(version)).await? {
                    if !scope.admits(&existing)? {
                        return Err(KernelError::SchemaMismatch(format!(
                            "{} is outside the caller's read scope",
                            existing.reference()
                        )));
                    }
                }
            }
            if !scope.admits(&candidate)? {
                return Err(KernelError::SchemaMismatch(format!(
                    "{} would be outside the caller's read scope",
                    candidate.reference()
                )));
            }
        }

        let stored = match mode {
            WriteMode::Insert => self.backend.insert(card).await?,
            WriteMode::Replace => self.backend.upsert(card).await?,
        };
        debug!(card = %stored.reference(), ?mode, "card written");
        self.require_view(scope.as_ref(), &stored).await
    }

    async fn acquire(&self, owner: &ElementId, key: &str) -> KernelResult<()> {
        let mut delay = Duration::from_millis(self.config.patch_lock_backoff_ms);
        for attempt in 0..=self.config.patch_lock_retries {
            if self.backend.lock(owner, key, None).await?.is_some() {
                return Ok(());
            }
            debug!(key, attempt, "card is locked, backing off");
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }
        Err(KernelError::Locked(key.to_string()))
    }

    async fn patch_locked(
        &self,
        scope: Option<&Scope>,
        current: &Element,
        operations: &[PatchOperation],
    ) -> KernelResult<Value> {
        // Re-read under the lock so earlier patches are not lost.
        let current = self
            .backend
            .get_by_slug(&current.slug, Some(&current.version))
            .await?
            .ok_or_else(|| KernelError::NoElement(current.reference()))?;
        let original = current.to_value();
        let patched = apply_patch(&original, operations)?;
        if patched == original {
            return self.require_view(scope, &current).await;
        }

        let patched = Element::from_value(patched)
            .map_err(|e| KernelError::InvalidPatch(format!("patched card is malformed: {e}")))?;
        if patched.slug != current.slug || patched.version != current.version {
            return Err(KernelError::InvalidPatch(
                "slug and version cannot be patched".into(),
            ));
        }
        let type_card = self.type_card(&patched.element_type).await?;
        check_type(&type_card, &patched)?;
        if let Some(scope) = scope {
            if !scope.admits(&patched)? {
                return Err(KernelError::SchemaMismatch(format!(
                    "patch would make {} inaccessible",
                    current.reference()
                )));
            }
        }

        let stored = self.backend.upsert(ElementDraft::from_element(&patched)).await?;
        debug!(card = %stored.reference(), operations = operations.len(), "card patched");
        self.require_view(scope, &stored).await
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel").field("config", &self.config).finish_non_exhaustive()
    }
}

/// The element a draft would become, for validation before the write.
fn preview(draft: &ElementDraft) -> Element {
    Element {
        id: draft.id.unwrap_or_default(),
        slug: draft.slug.clone().unwrap_or_default(),
        version: draft
            .version
            .clone()
            .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        element_type: draft.element_type.clone().unwrap_or_default(),
        name: draft.name.clone(),
        active: draft.active.unwrap_or(true),
        tags: draft.tags.clone(),
        markers: draft.markers.clone(),
        requires: draft.requires.clone(),
        capabilities: draft.capabilities.clone(),
        data: draft.data_or_empty(),
        links: Default::default(),
        linked_at: Default::default(),
        created_at: Utc::now(),
        updated_at: None,
    }
}

/// Validate a whole card against its type's `data.schema`. Types without a
/// schema accept everything.
fn check_type(type_card: &Element, card: &Element) -> KernelResult<()> {
    let Some(raw) = type_card.data.get("schema") else {
        return Ok(());
    };
    let schema = Schema::parse(raw)?;
    if validate(&schema, &card.to_value()) {
        Ok(())
    } else {
        Err(KernelError::SchemaMismatch(format!(
            "{} does not match type {}",
            card.reference(),
            type_card.reference()
        )))
    }
}

fn type_pairs(data: &Value) -> Vec<(String, String)> {
    data.get("type_pairs")
        .and_then(Value::as_array)
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|pair| match pair.as_array().map(Vec::as_slice) {
                    Some([Value::String(a), Value::String(b)]) => Some((a.clone(), b.clone())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn type_matches(declared: &str, element: &Element) -> bool {
    declared == element.element_type || declared == element.type_slug()
}

fn declares_pair(pairs: &[(String, String)], from: &Element, to: &Element) -> bool {
    pairs
        .iter()
        .any(|(a, b)| type_matches(a, from) && type_matches(b, to))
}
