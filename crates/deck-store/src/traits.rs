use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deck_links::QueryOptions;
use deck_schema::Schema;
use deck_stream::Subscription;
use deck_types::{Element, ElementDraft, ElementId};
use serde_json::Value;

use crate::error::StoreResult;

/// Persistence contract of the kernel.
///
/// All implementations must satisfy these invariants:
/// - Ids are assigned by the backend; a client-supplied id never becomes
///   the id of a new row.
/// - `slug@version` is unique.
/// - `created_at` is set once on insert and never changes.
/// - `links` is never persisted; queries fill it from the link graph.
/// - Every successful write is published to `stream` subscribers.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Insert a new element.
    ///
    /// Fails with `AlreadyExists` if the `slug@version` is taken. A missing
    /// slug is generated when an id is supplied.
    async fn insert(&self, draft: ElementDraft) -> StoreResult<Element>;

    /// Insert or replace the element at `slug@version`.
    ///
    /// A replaced row keeps its id, `created_at` and `linked_at`. A supplied
    /// id that does not own the slug is discarded.
    async fn upsert(&self, draft: ElementDraft) -> StoreResult<Element>;

    async fn get_by_id(&self, id: &ElementId) -> StoreResult<Option<Element>>;

    /// Look up a slug at an exact version, or at its highest version when
    /// `version` is `None`.
    async fn get_by_slug(&self, slug: &str, version: Option<&str>) -> StoreResult<Option<Element>>;

    /// The elements that exist among `ids`, in request order.
    async fn get_by_ids(&self, ids: &[ElementId]) -> StoreResult<Vec<Element>>;

    /// Run a schema query and return projected results.
    async fn query(&self, schema: &Schema, options: &QueryOptions) -> StoreResult<Vec<Value>>;

    /// Evaluate `schema` against one element, joining `$$links` over the
    /// stored link graph. `None` when the element does not match.
    async fn evaluate(&self, schema: &Schema, element: &Element) -> StoreResult<Option<Value>>;

    /// Subscribe to changes matching `schema`.
    async fn stream(&self, schema: &Schema) -> StoreResult<Subscription>;

    /// Acquire an advisory lock. `Ok(None)` means the key is held.
    async fn lock(
        &self,
        owner: &ElementId,
        key: &str,
        reference_time: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<String>>;

    /// Release an advisory lock held by `owner`.
    async fn unlock(&self, owner: &ElementId, key: &str) -> StoreResult<bool>;
}
