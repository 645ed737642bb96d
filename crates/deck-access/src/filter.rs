use std::sync::Arc;

use chrono::{DateTime, Utc};
use deck_schema::{compile, restrict, Schema};
use deck_store::Backend;
use deck_types::{Element, ElementId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AccessError, AccessResult};
use crate::roles::{merge_read_schema, role_slug};
use crate::session::session_owner;

/// What one actor may read.
#[derive(Clone, Debug)]
pub struct Scope {
    pub actor: Element,
    /// Slugs of the role elements that contributed to `read`.
    pub roles: Vec<String>,
    /// Union of the actor's role read schemas.
    pub read: Schema,
}

impl Scope {
    /// Narrow a caller schema to what this scope may see. Elements joined
    /// through `$$links` are narrowed the same way.
    pub fn restrict(&self, caller: &Schema) -> Schema {
        restrict(caller, &self.read)
    }

    /// Whether `element` passes the read filter. `$$links` requirements of
    /// the read schema are not checked here.
    pub fn admits(&self, element: &Element) -> AccessResult<bool> {
        let query = compile(&self.read)?;
        Ok(query.predicate.evaluate(&element.to_value()))
    }
}

/// Derives per-session permission scopes from elements in the backend.
#[derive(Clone)]
pub struct PermissionFilter {
    backend: Arc<dyn Backend>,
}

impl PermissionFilter {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Resolve a session to its actor, as of now.
    pub async fn resolve_actor(&self, session: &ElementId) -> AccessResult<Element> {
        self.resolve_actor_at(session, Utc::now()).await
    }

    /// Resolve a session to its actor. Fails with `InvalidSession` when the
    /// session or its owner is missing, and `SessionExpired` when
    /// `data.expiration` lies before `now`.
    pub async fn resolve_actor_at(
        &self,
        session_id: &ElementId,
        now: DateTime<Utc>,
    ) -> AccessResult<Element> {
        let session = self
            .backend
            .get_by_id(session_id)
            .await?
            .filter(|s| s.active && s.type_slug() == "session")
            .ok_or_else(|| AccessError::invalid_session(*session_id, "no such session"))?;

        if let Some(expiration) = session.data.get("expiration").and_then(Value::as_str) {
            let expired_at = DateTime::parse_from_rfc3339(expiration)
                .map_err(|e| {
                    AccessError::invalid_session(*session_id, format!("bad expiration: {e}"))
                })?
                .with_timezone(&Utc);
            if expired_at < now {
                return Err(AccessError::SessionExpired {
                    session: *session_id,
                    expired_at,
                });
            }
        }

        session_owner(self.backend.as_ref(), &session)
            .await?
            .ok_or_else(|| AccessError::invalid_session(*session_id, "session has no owner"))
    }

    /// The role elements named by the actor's `data.roles`. Unknown and
    /// inactive roles are skipped.
    pub async fn actor_roles(&self, actor: &Element) -> AccessResult<Vec<Element>> {
        let names = actor
            .data
            .get("roles")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect::<Vec<_>>())
            .unwrap_or_default();

        let mut roles = Vec::with_capacity(names.len());
        for name in names {
            let slug = role_slug(name);
            match self.backend.get_by_slug(&slug, None).await? {
                Some(role) if role.active => roles.push(role),
                _ => warn!(actor = %actor.slug, role = %slug, "skipping unknown role"),
            }
        }
        Ok(roles)
    }

    /// The permission scope of a session.
    pub async fn scope(&self, session: &ElementId) -> AccessResult<Scope> {
        self.scope_at(session, Utc::now()).await
    }

    pub async fn scope_at(&self, session: &ElementId, now: DateTime<Utc>) -> AccessResult<Scope> {
        let actor = self.resolve_actor_at(session, now).await?;
        self.scope_for(actor).await
    }

    /// The permission scope of an already resolved actor.
    pub async fn scope_for(&self, actor: Element) -> AccessResult<Scope> {
        let roles = self.actor_roles(&actor).await?;
        let read = merge_read_schema(&roles, &actor);
        debug!(actor = %actor.slug, roles = roles.len(), "resolved permission scope");
        Ok(Scope {
            roles: roles.into_iter().map(|role| role.slug).collect(),
            actor,
            read,
        })
    }
}

impl std::fmt::Debug for PermissionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionFilter").finish_non_exhaustive()
    }
}
