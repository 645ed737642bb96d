use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deck_cache::{Cache, CacheStats};
use deck_links::{evaluate, run_query, GraphSource, LinkEdge, LinkIndex, QueryOptions};
use deck_schema::{compile, Schema};
use deck_stream::{ChangeStreamEngine, StreamConfig, Subscription};
use deck_types::{
    validate_slug, Element, ElementDraft, ElementId, RowChange, Version, DEFAULT_VERSION,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::lock::LockTable;
use crate::traits::Backend;

const TABLE: &str = "cards";

#[derive(Clone, Debug)]
struct Stored {
    /// Insertion order, the default result order.
    seq: u64,
    element: Element,
}

/// Elements plus the slug and link indexes over them.
#[derive(Debug, Default)]
struct State {
    elements: HashMap<ElementId, Stored>,
    /// slug -> version -> id
    slugs: HashMap<String, BTreeMap<String, ElementId>>,
    links: LinkIndex,
    next_seq: u64,
}

impl State {
    fn id_for(&self, slug: &str, version: &str) -> Option<ElementId> {
        self.slugs.get(slug)?.get(version).copied()
    }

    /// The id of the highest semver version of `slug`.
    fn latest_id(&self, slug: &str) -> Option<ElementId> {
        self.slugs
            .get(slug)?
            .iter()
            .filter_map(|(version, id)| Version::parse(version).ok().map(|v| (v, *id)))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, id)| id)
    }

    fn get(&self, id: &ElementId) -> Option<&Element> {
        self.elements.get(id).map(|stored| &stored.element)
    }

    fn by_slug(&self, slug: &str, version: Option<&str>) -> Option<&Element> {
        let id = match version {
            Some(version) => self.id_for(slug, version)?,
            None => self.latest_id(slug)?,
        };
        self.get(&id)
    }

    /// Store an element, keeping the insertion position of a replaced row.
    fn put(&mut self, element: Element) {
        let seq = match self.elements.get(&element.id) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.slugs
            .entry(element.slug.clone())
            .or_default()
            .insert(element.version.clone(), element.id);
        self.elements.insert(element.id, Stored { seq, element });
    }

    fn ordered(&self) -> Vec<&Element> {
        let mut stored: Vec<&Stored> = self.elements.values().collect();
        stored.sort_by_key(|s| s.seq);
        stored.into_iter().map(|s| &s.element).collect()
    }

    /// Reindex a link element. When it is active, stamp `linked_at` on both
    /// endpoints that do not have the verb yet and return those updates.
    fn index_link(&mut self, link: &Element) -> Vec<RowChange> {
        let Some((from, to)) = self.links.upsert(link) else {
            return Vec::new();
        };
        let (Some(verb), Some(data)) = (link.name.clone(), link.link_data()) else {
            return Vec::new();
        };
        let mut changes = Vec::new();
        for (id, verb) in [(from, verb), (to, data.inverse_name)] {
            let Some(stored) = self.elements.get_mut(&id) else {
                continue;
            };
            if stored.element.linked_at.contains_key(&verb) {
                continue;
            }
            let before = stored.element.clone();
            stored.element.linked_at.insert(verb, link.created_at);
            changes.push(RowChange::update(before, stored.element.clone()));
        }
        changes
    }
}

impl GraphSource for State {
    fn element(&self, id: &ElementId) -> Option<Element> {
        self.get(id).cloned()
    }

    fn edges(&self, from: &ElementId, verb: &str) -> Vec<LinkEdge> {
        self.links.edges(from, verb).to_vec()
    }
}

/// State shared with the change stream engine.
#[derive(Debug, Default)]
struct Shared {
    state: RwLock<State>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().expect("store lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().expect("store lock poisoned")
    }
}

impl GraphSource for Shared {
    fn element(&self, id: &ElementId) -> Option<Element> {
        self.read().element(id)
    }

    fn edges(&self, from: &ElementId, verb: &str) -> Vec<LinkEdge> {
        self.read().edges(from, verb)
    }
}

/// Identity and type resolved from a draft before it is written.
struct Prepared {
    slug: String,
    version: String,
    element_type: String,
}

fn build(
    draft: ElementDraft,
    prepared: Prepared,
    id: ElementId,
    created_at: DateTime<Utc>,
    linked_at: BTreeMap<String, DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
) -> Element {
    let data = draft.data_or_empty();
    Element {
        id,
        slug: prepared.slug,
        version: prepared.version,
        element_type: prepared.element_type,
        name: draft.name,
        active: draft.active.unwrap_or(true),
        tags: draft.tags,
        markers: draft.markers,
        requires: draft.requires,
        capabilities: draft.capabilities,
        data,
        links: BTreeMap::new(),
        linked_at,
        created_at,
        updated_at,
    }
}

/// In-memory [`Backend`].
///
/// Reads take a shared lock over the whole state, so a query sees a
/// consistent snapshot of elements and links. The cache is refreshed and
/// changes are published while the write lock is held, so the cache never
/// serves a row older than the last committed write and the change feed
/// follows commit order.
pub struct InMemoryBackend {
    shared: Arc<Shared>,
    cache: Cache,
    changes: broadcast::Sender<RowChange>,
    streams: ChangeStreamEngine,
    locks: LockTable,
    config: StoreConfig,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default(), StreamConfig::default())
    }

    pub fn with_config(config: StoreConfig, stream: StreamConfig) -> Self {
        let shared = Arc::new(Shared::default());
        let (changes, _) = broadcast::channel(config.change_channel_capacity.max(1));
        let graph: Arc<dyn GraphSource> = shared.clone();
        let streams = ChangeStreamEngine::new(changes.clone(), graph, stream);
        let stale_after = Duration::seconds(config.lock_stale_after_secs as i64);
        Self {
            shared,
            cache: Cache::with_capacity(config.cache_capacity),
            changes,
            streams,
            locks: LockTable::new(stale_after),
            config,
        }
    }

    /// Number of stored elements, links included.
    pub fn len(&self) -> usize {
        self.shared.read().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn subscriber_count(&self) -> usize {
        self.streams.subscriber_count()
    }

    fn prepare(&self, draft: &ElementDraft) -> StoreResult<Prepared> {
        let element_type = draft.element_type.clone().filter(|t| !t.is_empty());
        let slug = match (&draft.slug, &draft.id, &element_type) {
            (Some(slug), _, _) => slug.clone(),
            (None, Some(_), Some(element_type)) => {
                let type_slug = element_type.split('@').next().unwrap_or(element_type);
                format!("{type_slug}-{}", uuid::Uuid::now_v7())
            }
            (None, Some(_), None) => String::new(),
            (None, None, _) => return Err(StoreError::MissingIdentity),
        };
        let element_type = element_type.ok_or_else(|| StoreError::MissingType { slug: slug.clone() })?;
        validate_slug(&slug, self.config.max_slug_length)?;
        let version = draft
            .version
            .clone()
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());
        Version::parse(&version)?;
        Ok(Prepared {
            slug,
            version,
            element_type,
        })
    }

    /// Write a brand new row. The caller holds the write lock.
    fn write_new(&self, state: &mut State, draft: ElementDraft, prepared: Prepared) -> Vec<RowChange> {
        let element = build(draft, prepared, ElementId::new(), Utc::now(), BTreeMap::new(), None);
        state.put(element.clone());
        let mut changes = vec![RowChange::insert(element.clone())];
        if element.is_link() {
            changes.extend(state.index_link(&element));
        }
        changes
    }

    /// Refresh the cache for `changes` and publish them, returning the
    /// written row. The caller holds the write lock, so subscribers see
    /// changes in commit order.
    fn commit(&self, changes: Vec<RowChange>) -> Element {
        let element = changes[0].after.clone();
        for change in changes {
            self.cache.set(TABLE, &change.after);
            // No receiver until the first stream is opened.
            let _ = self.changes.send(change);
        }
        element
    }

    fn insert_sync(&self, draft: ElementDraft) -> StoreResult<Element> {
        let prepared = self.prepare(&draft)?;
        let element = {
            let mut state = self.shared.write();
            if state.id_for(&prepared.slug, &prepared.version).is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "{}@{}",
                    prepared.slug, prepared.version
                )));
            }
            let changes = self.write_new(&mut state, draft, prepared);
            self.commit(changes)
        };
        debug!(slug = %element.slug, version = %element.version, id = %element.id, "inserted element");
        Ok(element)
    }

    fn upsert_sync(&self, mut draft: ElementDraft) -> StoreResult<Element> {
        if draft.slug.is_none() {
            if let Some(existing) = draft.id.and_then(|id| self.shared.read().get(&id).cloned()) {
                draft.slug = Some(existing.slug);
                draft.version.get_or_insert(existing.version);
            }
        }
        let prepared = self.prepare(&draft)?;
        let element = {
            let mut state = self.shared.write();
            let existing = state
                .id_for(&prepared.slug, &prepared.version)
                .and_then(|id| state.get(&id).cloned());
            let changes = match existing {
                Some(existing) => {
                    let element = build(
                        draft,
                        prepared,
                        existing.id,
                        existing.created_at,
                        existing.linked_at.clone(),
                        Some(Utc::now()),
                    );
                    state.put(element.clone());
                    let mut changes = vec![RowChange::update(existing, element.clone())];
                    if element.is_link() {
                        changes.extend(state.index_link(&element));
                    } else {
                        state.links.remove(&element.id);
                    }
                    changes
                }
                None => self.write_new(&mut state, draft, prepared),
            };
            self.commit(changes)
        };
        debug!(slug = %element.slug, version = %element.version, id = %element.id, "upserted element");
        Ok(element)
    }

    fn get_by_id_sync(&self, id: &ElementId) -> Option<Element> {
        let cached = self.cache.get_by_id(TABLE, id);
        if cached.hit {
            return cached.element;
        }
        let state = self.shared.read();
        match state.get(id) {
            Some(element) => {
                self.cache.set(TABLE, element);
                Some(element.clone())
            }
            None => {
                self.cache.set_missing_id(TABLE, id);
                None
            }
        }
    }

    fn get_by_slug_sync(&self, slug: &str, version: Option<&str>) -> Option<Element> {
        if let Some(version) = version {
            let cached = self.cache.get_by_slug(TABLE, slug, version);
            if cached.hit {
                return cached.element;
            }
        }
        let state = self.shared.read();
        match (state.by_slug(slug, version), version) {
            (Some(element), _) => {
                self.cache.set(TABLE, element);
                Some(element.clone())
            }
            (None, Some(version)) => {
                self.cache.set_missing_slug(TABLE, slug, version);
                None
            }
            (None, None) => None,
        }
    }

    fn query_sync(&self, schema: &Schema, options: &QueryOptions) -> StoreResult<Vec<Value>> {
        let query = compile(schema)?;
        debug!(
            predicate = %query.predicate,
            links = query.links.len(),
            limit = ?options.limit,
            skip = options.skip,
            "running query"
        );
        let state = self.shared.read();
        let candidates = state.ordered();
        Ok(run_query(&*state, &query, candidates, options))
    }

    fn evaluate_sync(&self, schema: &Schema, element: &Element) -> StoreResult<Option<Value>> {
        let query = compile(schema)?;
        let state = self.shared.read();
        Ok(evaluate(&*state, &query, element, &BTreeMap::new()))
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("elements", &self.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn insert(&self, draft: ElementDraft) -> StoreResult<Element> {
        self.insert_sync(draft)
    }

    async fn upsert(&self, draft: ElementDraft) -> StoreResult<Element> {
        self.upsert_sync(draft)
    }

    async fn get_by_id(&self, id: &ElementId) -> StoreResult<Option<Element>> {
        Ok(self.get_by_id_sync(id))
    }

    async fn get_by_slug(&self, slug: &str, version: Option<&str>) -> StoreResult<Option<Element>> {
        Ok(self.get_by_slug_sync(slug, version))
    }

    async fn get_by_ids(&self, ids: &[ElementId]) -> StoreResult<Vec<Element>> {
        Ok(ids.iter().filter_map(|id| self.get_by_id_sync(id)).collect())
    }

    async fn query(&self, schema: &Schema, options: &QueryOptions) -> StoreResult<Vec<Value>> {
        self.query_sync(schema, options)
    }

    async fn evaluate(&self, schema: &Schema, element: &Element) -> StoreResult<Option<Value>> {
        self.evaluate_sync(schema, element)
    }

    async fn stream(&self, schema: &Schema) -> StoreResult<Subscription> {
        Ok(self.streams.subscribe(schema)?)
    }

    async fn lock(
        &self,
        owner: &ElementId,
        key: &str,
        reference_time: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<String>> {
        Ok(self.locks.lock(owner, key, reference_time))
    }

    async fn unlock(&self, owner: &ElementId, key: &str) -> StoreResult<bool> {
        Ok(self.locks.unlock(owner, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_links::SortDirection;
    use deck_types::{ChangeKind, ErrorKind};
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration as StdDuration;
    use tokio::time::timeout;

    fn card(slug: &str) -> ElementDraft {
        ElementDraft::new(slug, "card@1.0.0")
    }

    fn schema(value: Value) -> Schema {
        Schema::parse(&value).unwrap()
    }

    async fn link(backend: &InMemoryBackend, from: &Element, verb: &str, to: &Element, inverse: &str) -> Element {
        backend
            .insert(
                ElementDraft {
                    id: Some(ElementId::new()),
                    element_type: Some("link@1.0.0".into()),
                    name: Some(verb.into()),
                    data: json!({
                        "from": { "id": from.id, "type": from.element_type },
                        "to": { "id": to.id, "type": to.element_type },
                        "inverseName": inverse
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    // ---- Test 1: Insert assigns ids and rejects duplicates ----

    #[tokio::test]
    async fn insert_assigns_fresh_id() {
        let backend = InMemoryBackend::new();
        let client_id = ElementId::new();
        let mut draft = card("card-a");
        draft.id = Some(client_id);
        draft.created_at = Some(Utc::now() - Duration::days(10));

        let element = backend.insert(draft).await.unwrap();
        assert_ne!(element.id, client_id);
        assert_eq!(element.version, "1.0.0");
        assert!(element.created_at > Utc::now() - Duration::days(1));
        assert!(element.links.is_empty());

        let err = backend.insert(card("card-a")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ElementAlreadyExists);

        // Another version of the same slug is a different row.
        assert!(backend.insert(card("card-a").with_version("2.0.0")).await.is_ok());
    }

    // ---- Test 2: Insert validation ----

    #[tokio::test]
    async fn insert_validation() {
        let backend = InMemoryBackend::new();

        let err = backend.insert(ElementDraft::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DatabaseError);

        let no_type = ElementDraft {
            slug: Some("card-a".into()),
            ..Default::default()
        };
        assert_eq!(backend.insert(no_type).await.unwrap_err().kind(), ErrorKind::DatabaseError);

        let long = "a".repeat(256);
        for bad in ["Card-A", "card_a", "", long.as_str()] {
            let err = backend.insert(card(bad)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidSlug, "{bad:?}");
        }

        let bad_version = card("card-b").with_version("one");
        assert_eq!(backend.insert(bad_version).await.unwrap_err().kind(), ErrorKind::DatabaseError);
    }

    // ---- Test 3: Slug generated from the type when only an id is given ----

    #[tokio::test]
    async fn slug_generated_for_id_only_drafts() {
        let backend = InMemoryBackend::new();
        let draft = ElementDraft {
            id: Some(ElementId::new()),
            element_type: Some("card@1.0.0".into()),
            ..Default::default()
        };
        let element = backend.insert(draft).await.unwrap();
        assert!(element.slug.starts_with("card-"));
    }

    // ---- Test 4: Upsert keeps identity and never renames ----

    #[tokio::test]
    async fn upsert_replaces_by_slug() {
        let backend = InMemoryBackend::new();
        let original = backend
            .insert(card("card-a").with_data(json!({ "v": 1 })))
            .await
            .unwrap();

        let mut draft = card("card-a").with_data(json!({ "v": 2 }));
        draft.id = Some(ElementId::new());
        let replaced = backend.upsert(draft).await.unwrap();
        assert_eq!(replaced.id, original.id);
        assert_eq!(replaced.created_at, original.created_at);
        assert_eq!(replaced.data, json!({ "v": 2 }));
        assert!(replaced.updated_at.is_some());

        let mut moved = card("card-b");
        moved.id = Some(original.id);
        let created = backend.upsert(moved).await.unwrap();
        assert_ne!(created.id, original.id);
        assert_eq!(backend.get_by_slug("card-a", Some("1.0.0")).await.unwrap().unwrap().id, original.id);
        assert_eq!(backend.len(), 2);
    }

    // ---- Test 5: Latest version by semver precedence ----

    #[tokio::test]
    async fn latest_by_semver() {
        let backend = InMemoryBackend::new();
        for version in ["1.0.0", "1.10.0", "1.2.0", "2.0.0-alpha"] {
            backend.insert(card("card-a").with_version(version)).await.unwrap();
        }
        let latest = backend.get_by_slug("card-a", None).await.unwrap().unwrap();
        assert_eq!(latest.version, "2.0.0-alpha");

        backend.insert(card("card-a").with_version("2.0.0")).await.unwrap();
        let latest = backend.get_by_slug("card-a", None).await.unwrap().unwrap();
        assert_eq!(latest.version, "2.0.0");
        assert!(backend.get_by_slug("card-b", None).await.unwrap().is_none());
    }

    // ---- Test 6: Negative cache entries never outlive a write ----

    #[tokio::test]
    async fn negative_cache_cleared_by_insert() {
        let backend = InMemoryBackend::new();
        assert!(backend.get_by_slug("card-a", Some("1.0.0")).await.unwrap().is_none());
        assert!(backend.get_by_slug("card-a", Some("1.0.0")).await.unwrap().is_none());
        assert!(backend.cache_stats().hits >= 1);

        let inserted = backend.insert(card("card-a")).await.unwrap();
        let found = backend.get_by_slug("card-a", Some("1.0.0")).await.unwrap().unwrap();
        assert_eq!(found.id, inserted.id);

        let updated = backend.upsert(card("card-a").with_data(json!({ "v": 2 }))).await.unwrap();
        let found = backend.get_by_id(&inserted.id).await.unwrap().unwrap();
        assert_eq!(found.data, updated.data);
    }

    // ---- Test 7: get_by_ids keeps request order ----

    #[tokio::test]
    async fn get_by_ids_in_request_order() {
        let backend = InMemoryBackend::new();
        let a = backend.insert(card("card-a")).await.unwrap();
        let b = backend.insert(card("card-b")).await.unwrap();
        let found = backend.get_by_ids(&[b.id, ElementId::new(), a.id]).await.unwrap();
        let slugs: Vec<_> = found.iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(slugs, vec!["card-b", "card-a"]);
    }

    // ---- Test 8: Query projection and ordering ----

    #[tokio::test]
    async fn query_projects_and_sorts() {
        let backend = InMemoryBackend::new();
        for (slug, ts) in [("card-b", 1549016200000u64), ("card-c", 1549016300000), ("card-a", 1549016100000)] {
            backend
                .insert(card(slug).with_data(json!({ "timestamp": ts, "secret": true })))
                .await
                .unwrap();
        }
        let results = backend
            .query(
                &schema(json!({
                    "type": "object",
                    "properties": {
                        "slug": { "type": "string" },
                        "data": { "properties": { "timestamp": { "type": "number" } } }
                    },
                    "required": ["slug"]
                })),
                &QueryOptions::default().sorted_by(["data", "timestamp"], SortDirection::Asc),
            )
            .await
            .unwrap();
        assert_eq!(
            results,
            vec![
                json!({ "slug": "card-a", "data": { "timestamp": 1549016100000u64 } }),
                json!({ "slug": "card-b", "data": { "timestamp": 1549016200000u64 } }),
                json!({ "slug": "card-c", "data": { "timestamp": 1549016300000u64 } }),
            ]
        );
    }

    // ---- Test 9: Links stamp linked_at and join in queries ----

    #[tokio::test]
    async fn links_stamp_endpoints_and_join() {
        let backend = InMemoryBackend::new();
        let thread = backend.insert(ElementDraft::new("thread-1", "thread@1.0.0")).await.unwrap();
        let card_a = backend.insert(card("card-a")).await.unwrap();
        backend.insert(card("card-b")).await.unwrap();
        let link = link(&backend, &card_a, "is attached to", &thread, "has attached element").await;

        let thread = backend.get_by_id(&thread.id).await.unwrap().unwrap();
        assert_eq!(thread.linked_at.get("has attached element"), Some(&link.created_at));
        let card_a = backend.get_by_id(&card_a.id).await.unwrap().unwrap();
        assert_eq!(card_a.linked_at.get("is attached to"), Some(&link.created_at));

        let results = backend
            .query(
                &schema(json!({
                    "type": "object",
                    "properties": {
                        "slug": { "type": "string" },
                        "type": { "const": "card@1.0.0" }
                    },
                    "required": ["type"],
                    "$$links": { "is attached to": { "properties": { "slug": {} } } }
                })),
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["slug"], "card-a");
        assert_eq!(results[0]["links"]["is attached to"][0]["slug"], "thread-1");
    }

    // ---- Test 10: Deactivated links stop joining ----

    #[tokio::test]
    async fn deactivated_link_stops_joining() {
        let backend = InMemoryBackend::new();
        let thread = backend.insert(ElementDraft::new("thread-1", "thread@1.0.0")).await.unwrap();
        let card_a = backend.insert(card("card-a")).await.unwrap();
        let link = link(&backend, &card_a, "is attached to", &thread, "has attached element").await;

        let mut draft = ElementDraft::from_element(&link);
        draft.active = Some(false);
        backend.upsert(draft).await.unwrap();

        let results = backend
            .query(
                &schema(json!({ "$$links": { "is attached to": true } })),
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    // ---- Test 11: Streams receive backend writes ----

    #[tokio::test]
    async fn stream_receives_writes() {
        let backend = InMemoryBackend::new();
        let mut sub = backend
            .stream(&schema(json!({
                "type": "object",
                "properties": {
                    "slug": { "const": "card-a" },
                    "data": { "properties": { "field": {} } }
                },
                "required": ["slug"]
            })))
            .await
            .unwrap();

        backend.insert(card("card-b")).await.unwrap();
        backend.insert(card("card-a").with_data(json!({ "field": "X" }))).await.unwrap();
        backend.upsert(card("card-a").with_data(json!({ "field": "X", "noise": 1 }))).await.unwrap();
        backend.upsert(card("card-a").with_data(json!({ "field": "Y" }))).await.unwrap();

        let first = timeout(StdDuration::from_secs(1), sub.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        assert_eq!(first.after["data"]["field"], "X");

        let second = timeout(StdDuration::from_secs(1), sub.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(second.kind, ChangeKind::Update);
        assert_eq!(second.before.unwrap()["data"]["field"], "X");
        assert_eq!(second.after["data"]["field"], "Y");
    }

    // ---- Test 12: Exactly one of 8 concurrent lockers wins ----

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lock_single_winner() {
        let backend = Arc::new(InMemoryBackend::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                tokio::spawn(async move {
                    backend
                        .lock(&ElementId::new(), "card-a@1.0.0", None)
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    // ---- Test 13: Concurrent inserts of one slug, one success ----

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_unique() {
        let backend = Arc::new(InMemoryBackend::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                tokio::spawn(async move { backend.insert(card("card-a")).await })
            })
            .collect();
        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert_eq!(e.kind(), ErrorKind::ElementAlreadyExists),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(backend.len(), 1);
    }

    // ---- Test 14: Invalid query schema ----

    #[tokio::test]
    async fn invalid_link_schema_fails() {
        let backend = InMemoryBackend::new();
        let err = backend
            .query(&schema(json!({ "$$links": { "x": false } })), &QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSchema);
        let err = backend
            .stream(&schema(json!({ "$$links": { "x": false } })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSchema);
    }

    // ---- Test 15: Evaluating one element joins links ----

    #[tokio::test]
    async fn evaluate_single_element() {
        let backend = InMemoryBackend::new();
        let thread = backend.insert(ElementDraft::new("thread-1", "thread@1.0.0")).await.unwrap();
        let card_a = backend.insert(card("card-a")).await.unwrap();
        let card_b = backend.insert(card("card-b")).await.unwrap();
        link(&backend, &card_a, "is attached to", &thread, "has attached element").await;

        let joined = schema(json!({
            "properties": { "slug": {} },
            "$$links": { "is attached to": { "properties": { "slug": {} } } }
        }));
        let result = backend.evaluate(&joined, &card_a).await.unwrap().unwrap();
        assert_eq!(result["slug"], "card-a");
        assert_eq!(result["links"]["is attached to"][0]["slug"], "thread-1");
        assert!(backend.evaluate(&joined, &card_b).await.unwrap().is_none());

        let err = backend
            .evaluate(&schema(json!({ "$$links": { "x": false } })), &card_a)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSchema);
    }

    // ---- Test 16: Change events follow commit order ----

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn stream_follows_commit_order() {
        const CARDS: usize = 300;
        let backend = Arc::new(InMemoryBackend::new());
        let mut sub = backend.stream(&schema(json!({ "type": "object" }))).await.unwrap();

        let inserter = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                for i in 0..CARDS {
                    backend.insert(card(&format!("card-{i}"))).await.unwrap();
                }
            })
        };
        let updater = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                for i in 0..CARDS {
                    let slug = format!("card-{i}");
                    while backend.get_by_slug(&slug, Some("1.0.0")).await.unwrap().is_none() {
                        tokio::task::yield_now().await;
                    }
                    backend.upsert(card(&slug).with_data(json!({ "v": 2 }))).await.unwrap();
                }
            })
        };
        inserter.await.unwrap();
        updater.await.unwrap();

        let mut seen = HashSet::new();
        for _ in 0..CARDS * 2 {
            let event = timeout(StdDuration::from_secs(5), sub.recv()).await.unwrap().unwrap().unwrap();
            match event.kind {
                ChangeKind::Insert => assert!(seen.insert(event.id), "second insert for {}", event.id),
                ChangeKind::Update => assert!(seen.contains(&event.id), "update before insert for {}", event.id),
            }
        }
        assert_eq!(seen.len(), CARDS);
    }

    // ---- Test 17: Lookups of unknown ids do not grow the cache unbounded ----

    #[tokio::test]
    async fn cache_stays_bounded() {
        let config = StoreConfig {
            cache_capacity: 16,
            ..Default::default()
        };
        let backend = InMemoryBackend::with_config(config, StreamConfig::default());
        let kept = backend.insert(card("card-a")).await.unwrap();
        for _ in 0..500 {
            assert!(backend.get_by_id(&ElementId::new()).await.unwrap().is_none());
        }
        for i in 0..100 {
            backend.insert(card(&format!("card-{i}"))).await.unwrap();
        }
        assert!(backend.cache_stats().entries <= 16);

        // Evicted rows are read through again.
        let found = backend.get_by_id(&kept.id).await.unwrap().unwrap();
        assert_eq!(found.slug, "card-a");
        assert_eq!(backend.len(), 101);
    }
}
