//! Who is acting, for which tenant, with which role.
//!
//! [`AccessContext`] is an immutable value passed explicitly into every sync
//! operation. The auth collaborator replaces it through an [`AccessBoundary`]
//! whenever sign-in state changes; nothing mutates a context in place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// True only for admins and editors.
pub fn can_write(role: Option<Role>) -> bool {
    matches!(role, Some(Role::Admin | Role::Editor))
}

/// True only for admins.
pub fn can_administer(role: Option<Role>) -> bool {
    matches!(role, Some(Role::Admin))
}

/// Tenant and actor captured when a write is attempted. Queued operations
/// carry this value so a later tenant switch cannot redirect them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedContext {
    pub tenant_id: Option<String>,
    pub actor_id: Option<String>,
}

/// Tenant scope of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadScope {
    pub tenant_id: Option<String>,
}

/// Authorization state supplied by the auth collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    /// Authorization state has finished loading
    pub ready: bool,
    /// Running without backend authorization (local/dev)
    pub bypass: bool,
    pub actor_id: Option<String>,
    /// Scopes every row written or read
    pub tenant_id: Option<String>,
    /// Human-readable tenant key, display only
    pub tenant_slug: Option<String>,
    pub role: Option<Role>,
    pub has_access: bool,
}

impl AccessContext {
    /// A new context with `patch` applied on top of this one.
    pub fn merged(&self, patch: &AccessPatch) -> Self {
        let mut next = self.clone();
        if let Some(ready) = patch.ready {
            next.ready = ready;
        }
        if let Some(bypass) = patch.bypass {
            next.bypass = bypass;
        }
        if let Some(actor_id) = &patch.actor_id {
            next.actor_id = actor_id.clone();
        }
        if let Some(tenant_id) = &patch.tenant_id {
            next.tenant_id = tenant_id.clone();
        }
        if let Some(tenant_slug) = &patch.tenant_slug {
            next.tenant_slug = tenant_slug.clone();
        }
        if let Some(role) = patch.role {
            next.role = role;
        }
        if let Some(has_access) = patch.has_access {
            next.has_access = has_access;
        }
        next
    }

    pub fn can_read(&self) -> bool {
        self.bypass || (self.ready && self.has_access && self.tenant_id.is_some())
    }

    /// A write is permitted iff ready, granted access, tenant known and the
    /// role can write. Bypass mode skips every check.
    pub fn can_write(&self) -> bool {
        self.bypass || (self.can_read() && can_write(self.role))
    }

    pub fn read_scope(&self) -> Option<ReadScope> {
        self.can_read().then(|| ReadScope {
            tenant_id: self.tenant_id.clone(),
        })
    }

    /// The context to capture with a write, or `None` when writing is denied.
    pub fn write_scope(&self) -> Option<CapturedContext> {
        self.can_write().then(|| CapturedContext {
            tenant_id: self.tenant_id.clone(),
            actor_id: self.actor_id.clone(),
        })
    }
}

/// Partial update of an [`AccessContext`]. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPatch {
    ready: Option<bool>,
    bypass: Option<bool>,
    actor_id: Option<Option<String>>,
    tenant_id: Option<Option<String>>,
    tenant_slug: Option<Option<String>>,
    role: Option<Option<Role>>,
    has_access: Option<bool>,
}

impl AccessPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(mut self, ready: bool) -> Self {
        self.ready = Some(ready);
        self
    }

    pub fn bypass(mut self, bypass: bool) -> Self {
        self.bypass = Some(bypass);
        self
    }

    pub fn actor(mut self, actor_id: Option<String>) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn tenant(mut self, tenant_id: Option<String>, tenant_slug: Option<String>) -> Self {
        self.tenant_id = Some(tenant_id);
        self.tenant_slug = Some(tenant_slug);
        self
    }

    pub fn role(mut self, role: Option<Role>) -> Self {
        self.role = Some(role);
        self
    }

    pub fn has_access(mut self, has_access: bool) -> Self {
        self.has_access = Some(has_access);
        self
    }
}

/// The single place where the current context is replaced.
///
/// Readers take snapshots with [`AccessBoundary::get`] or follow changes
/// through [`AccessBoundary::subscribe`].
#[derive(Debug)]
pub struct AccessBoundary {
    tx: watch::Sender<AccessContext>,
}

impl Default for AccessBoundary {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessBoundary {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AccessContext::default());
        Self { tx }
    }

    /// Replace the context with the current one merged with `patch`.
    pub fn set(&self, patch: &AccessPatch) -> AccessContext {
        let next = self.get().merged(patch);
        self.tx.send_replace(next.clone());
        next
    }

    /// Restore defaults, e.g. on sign-out.
    pub fn reset(&self) {
        self.tx.send_replace(AccessContext::default());
    }

    pub fn get(&self) -> AccessContext {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AccessContext> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_in(role: Role) -> AccessContext {
        AccessContext::default().merged(
            &AccessPatch::new()
                .ready(true)
                .has_access(true)
                .actor(Some("user-1".to_string()))
                .tenant(Some("evt-1".to_string()), Some("asw-2026".to_string()))
                .role(Some(role)),
        )
    }

    #[test]
    fn test_role_checks() {
        assert!(can_write(Some(Role::Admin)));
        assert!(can_write(Some(Role::Editor)));
        assert!(!can_write(Some(Role::Viewer)));
        assert!(!can_write(None));

        assert!(can_administer(Some(Role::Admin)));
        assert!(!can_administer(Some(Role::Editor)));
        assert!(!can_administer(None));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Editor".parse::<Role>().unwrap(), Role::Editor);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_write_scope_requires_every_condition() {
        assert!(signed_in(Role::Editor).write_scope().is_some());
        assert!(signed_in(Role::Viewer).write_scope().is_none());

        let not_ready = signed_in(Role::Admin).merged(&AccessPatch::new().ready(false));
        assert!(not_ready.write_scope().is_none());

        let no_access = signed_in(Role::Admin).merged(&AccessPatch::new().has_access(false));
        assert!(no_access.write_scope().is_none());

        let no_tenant = signed_in(Role::Admin).merged(&AccessPatch::new().tenant(None, None));
        assert!(no_tenant.write_scope().is_none());
    }

    #[test]
    fn test_write_scope_captures_tenant_and_actor() {
        let scope = signed_in(Role::Admin).write_scope().unwrap();
        assert_eq!(scope.tenant_id.as_deref(), Some("evt-1"));
        assert_eq!(scope.actor_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_viewer_can_read_but_not_write() {
        let viewer = signed_in(Role::Viewer);
        assert!(viewer.read_scope().is_some());
        assert!(viewer.write_scope().is_none());
    }

    #[test]
    fn test_bypass_skips_checks() {
        let ctx = AccessContext::default().merged(&AccessPatch::new().bypass(true));
        let scope = ctx.write_scope().unwrap();
        assert_eq!(scope.tenant_id, None);
        assert!(ctx.read_scope().is_some());
    }

    #[test]
    fn test_boundary_replaces_and_resets() {
        let boundary = AccessBoundary::new();
        let mut rx = boundary.subscribe();

        let before = boundary.get();
        boundary.set(&AccessPatch::new().ready(true).role(Some(Role::Editor)));

        assert!(!before.ready);
        assert!(boundary.get().ready);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().role, Some(Role::Editor));

        boundary.reset();
        assert_eq!(boundary.get(), AccessContext::default());
    }
}
