use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use deck_types::{Element, ElementId};
use tracing::{debug, trace};

/// Default bound on the number of cache entries.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Outcome of a cache lookup.
///
/// `hit == false` is a miss: the cache knows nothing. `hit == true` with
/// `element == None` is a negative entry: the element is known to be absent.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheLookup {
    pub hit: bool,
    pub element: Option<Element>,
}

impl CacheLookup {
    pub fn miss() -> Self {
        Self {
            hit: false,
            element: None,
        }
    }

    fn from_entry(entry: &Entry) -> Self {
        Self {
            hit: true,
            element: match entry {
                Entry::Present(element) => Some(element.clone()),
                Entry::Missing => None,
            },
        }
    }

    /// Whether this is a negative entry.
    pub fn is_known_missing(&self) -> bool {
        self.hit && self.element.is_none()
    }
}

#[derive(Clone, Debug)]
enum Entry {
    Present(Element),
    Missing,
}

type IdKey = (String, ElementId);
type SlugKey = (String, String, String);

fn slug_key(table: &str, slug: &str, version: &str) -> SlugKey {
    (table.to_string(), slug.to_string(), version.to_string())
}

/// Hit and miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Concurrent element cache keyed by table and by id or `slug@version`.
///
/// The cache holds at most `capacity` entries. When a new entry would not
/// fit, negative entries are dropped first, then everything.
#[derive(Debug)]
pub struct Cache {
    by_id: DashMap<IdKey, Entry>,
    by_slug: DashMap<SlugKey, Entry>,
    hits: AtomicU64,
    misses: AtomicU64,
    capacity: usize,
}

impl Default for Cache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            by_id: DashMap::new(),
            by_slug: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            capacity: capacity.max(2),
        }
    }

    /// Store a positive entry under both the id and the `slug@version` keys.
    pub fn set(&self, table: &str, element: &Element) {
        trace!(table, slug = %element.slug, version = %element.version, "cache set");
        self.make_room(2);
        self.by_id
            .insert((table.to_string(), element.id), Entry::Present(element.clone()));
        self.by_slug.insert(
            slug_key(table, &element.slug, &element.version),
            Entry::Present(element.clone()),
        );
    }

    pub fn get_by_id(&self, table: &str, id: &ElementId) -> CacheLookup {
        let lookup = self
            .by_id
            .get(&(table.to_string(), *id))
            .map(|entry| CacheLookup::from_entry(entry.value()))
            .unwrap_or_else(CacheLookup::miss);
        self.record(&lookup);
        lookup
    }

    /// Look up one exact version of a slug.
    pub fn get_by_slug(&self, table: &str, slug: &str, version: &str) -> CacheLookup {
        let lookup = self
            .by_slug
            .get(&slug_key(table, slug, version))
            .map(|entry| CacheLookup::from_entry(entry.value()))
            .unwrap_or_else(CacheLookup::miss);
        self.record(&lookup);
        lookup
    }

    /// Record that no element has this id.
    pub fn set_missing_id(&self, table: &str, id: &ElementId) {
        self.make_room(1);
        self.by_id.insert((table.to_string(), *id), Entry::Missing);
    }

    /// Record that this version of the slug does not exist. Other versions
    /// of the same slug are unaffected.
    pub fn set_missing_slug(&self, table: &str, slug: &str, version: &str) {
        self.make_room(1);
        self.by_slug
            .insert(slug_key(table, slug, version), Entry::Missing);
    }

    /// Drop every entry, positive or negative, for the element's id and
    /// `slug@version`.
    pub fn unset(&self, table: &str, element: &Element) {
        trace!(table, slug = %element.slug, version = %element.version, "cache unset");
        self.by_id.remove(&(table.to_string(), element.id));
        self.by_slug
            .remove(&slug_key(table, &element.slug, &element.version));
    }

    pub fn clear(&self) {
        self.by_id.clear();
        self.by_slug.clear();
    }

    pub fn len(&self) -> usize {
        self.by_id.len() + self.by_slug.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Evict until `incoming` more entries fit.
    fn make_room(&self, incoming: usize) {
        if self.len() + incoming <= self.capacity {
            return;
        }
        self.by_id.retain(|_, entry| matches!(entry, Entry::Present(_)));
        self.by_slug.retain(|_, entry| matches!(entry, Entry::Present(_)));
        if self.len() + incoming > self.capacity {
            debug!(entries = self.len(), capacity = self.capacity, "cache full, clearing");
            self.clear();
        }
    }

    fn record(&self, lookup: &CacheLookup) {
        let counter = if lookup.hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn element(slug: &str, version: &str) -> Element {
        Element {
            id: ElementId::new(),
            slug: slug.to_string(),
            version: version.to_string(),
            element_type: "card@1.0.0".to_string(),
            name: None,
            active: true,
            tags: vec![],
            markers: vec![],
            requires: vec![],
            capabilities: vec![],
            data: json!({}),
            links: BTreeMap::new(),
            linked_at: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    // ---- Test 1: Miss, hit and negative entries are distinct ----

    #[test]
    fn miss_hit_and_negative_are_distinct() {
        let cache = Cache::new();
        let card = element("card-a", "1.0.0");

        let miss = cache.get_by_id("cards", &card.id);
        assert!(!miss.hit);
        assert!(!miss.is_known_missing());

        cache.set_missing_id("cards", &card.id);
        let negative = cache.get_by_id("cards", &card.id);
        assert!(negative.hit);
        assert!(negative.element.is_none());

        cache.set("cards", &card);
        let hit = cache.get_by_id("cards", &card.id);
        assert!(hit.hit);
        assert_eq!(hit.element.as_ref(), Some(&card));
    }

    // ---- Test 2: Slug entries are version scoped ----

    #[test]
    fn slug_entries_are_version_scoped() {
        let cache = Cache::new();
        let v1 = element("card-a", "1.0.0");
        cache.set("cards", &v1);
        cache.set_missing_slug("cards", "card-a", "2.0.0");

        assert_eq!(cache.get_by_slug("cards", "card-a", "1.0.0").element, Some(v1));
        assert!(cache.get_by_slug("cards", "card-a", "2.0.0").is_known_missing());
        assert!(!cache.get_by_slug("cards", "card-a", "3.0.0").hit);
    }

    // ---- Test 3: Tables do not share entries ----

    #[test]
    fn tables_are_isolated() {
        let cache = Cache::new();
        let card = element("card-a", "1.0.0");
        cache.set("cards", &card);
        assert!(!cache.get_by_id("links", &card.id).hit);
    }

    // ---- Test 4: Unset removes both keys ----

    #[test]
    fn unset_removes_both_keys() {
        let cache = Cache::new();
        let card = element("card-a", "1.0.0");
        cache.set("cards", &card);
        cache.unset("cards", &card);
        assert!(!cache.get_by_id("cards", &card.id).hit);
        assert!(!cache.get_by_slug("cards", "card-a", "1.0.0").hit);
    }

    // ---- Test 5: Set replaces a negative entry ----

    #[test]
    fn set_replaces_negative_entry() {
        let cache = Cache::new();
        let card = element("card-a", "1.0.0");
        cache.set_missing_slug("cards", "card-a", "1.0.0");
        cache.set("cards", &card);
        assert_eq!(cache.get_by_slug("cards", "card-a", "1.0.0").element, Some(card));
    }

    // ---- Test 6: Stats and concurrent writers ----

    #[test]
    fn concurrent_writers() {
        let cache = Arc::new(Cache::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let card = element(&format!("card-{i}"), "1.0.0");
                    cache.set("cards", &card);
                    assert!(cache.get_by_id("cards", &card.id).hit);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.hits, 16);
        assert_eq!(stats.entries, 32);
    }

    // ---- Test 7: Negative entries are evicted before positive ones ----

    #[test]
    fn negative_entries_evicted_first() {
        let cache = Cache::with_capacity(8);
        let a = element("card-a", "1.0.0");
        let b = element("card-b", "1.0.0");
        cache.set("cards", &a);
        cache.set("cards", &b);
        for _ in 0..4 {
            cache.set_missing_id("cards", &ElementId::new());
        }
        assert_eq!(cache.len(), 8);

        let c = element("card-c", "1.0.0");
        cache.set("cards", &c);
        assert_eq!(cache.len(), 6);
        for card in [&a, &b, &c] {
            assert_eq!(cache.get_by_id("cards", &card.id).element.as_ref(), Some(card));
        }
    }

    // ---- Test 8: The cache never exceeds its capacity ----

    #[test]
    fn stays_within_capacity() {
        let cache = Cache::with_capacity(16);
        for i in 0..1000 {
            cache.set_missing_id("cards", &ElementId::new());
            cache.set_missing_slug("cards", &format!("card-{i}"), "1.0.0");
            cache.set("cards", &element(&format!("card-{i}"), "1.0.0"));
            assert!(cache.len() <= cache.capacity());
        }
        let last = element("card-last", "1.0.0");
        cache.set("cards", &last);
        assert!(cache.get_by_id("cards", &last.id).hit);
    }
}
