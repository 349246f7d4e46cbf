//! Shared-space registry: named memory scopes with per-principal grants.
//!
//! Roles order reader < writer < admin. Grants can carry a TTL; an expired
//! grant behaves exactly like a missing one. Grant maps are copy-on-write so
//! `check` never blocks behind a writer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};

/// Access level inside a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceRole {
    Reader,
    Writer,
    Admin,
}

#[derive(Debug, Clone, Copy)]
struct Grant {
    role: SpaceRole,
    expires_at: Option<DateTime<Utc>>,
}

impl Grant {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

struct Space {
    grants: Mutex<Arc<HashMap<String, Grant>>>,
}

impl Space {
    fn new() -> Self {
        Self {
            grants: Mutex::new(Arc::new(HashMap::new())),
        }
    }

    fn snapshot(&self) -> Arc<HashMap<String, Grant>> {
        Arc::clone(&self.grants.lock())
    }

    fn mutate(&self, f: impl FnOnce(&mut HashMap<String, Grant>)) {
        let mut guard = self.grants.lock();
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }
}

/// Concurrent map of space name to grant table. One lock per space.
#[derive(Default)]
pub struct SpaceRegistry {
    spaces: RwLock<HashMap<String, Arc<Space>>>,
}

impl SpaceRegistry {
    pub fn new() -> Self {
        Self {
            spaces: RwLock::new(HashMap::new()),
        }
    }

    fn space(&self, name: &str) -> Arc<Space> {
        if let Some(space) = self.spaces.read().get(name) {
            return Arc::clone(space);
        }
        let mut spaces = self.spaces.write();
        Arc::clone(
            spaces
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Space::new())),
        )
    }

    /// Grants `role` on `space` to `principal`. A zero TTL means no expiry.
    /// Re-granting replaces the previous grant; applying the same grant
    /// twice equals one application.
    pub fn grant(&self, space: &str, principal: &str, role: SpaceRole, ttl: Duration) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Utc::now() + ttl)
        };

        self.space(space).mutate(|grants| {
            grants.insert(principal.to_string(), Grant { role, expires_at });
        });
    }

    pub fn revoke(&self, space: &str, principal: &str) {
        if let Some(space) = self.spaces.read().get(space) {
            space.mutate(|grants| {
                grants.remove(principal);
            });
        }
    }

    /// True iff an unexpired grant exists whose role covers `required`.
    pub fn check(&self, space: &str, principal: &str, required: SpaceRole) -> bool {
        let space = match self.spaces.read().get(space) {
            Some(s) => Arc::clone(s),
            None => return false,
        };

        let grants = space.snapshot();
        match grants.get(principal) {
            Some(grant) if !grant.is_expired(Utc::now()) => grant.role >= required,
            _ => false,
        }
    }

    /// Names of all known spaces, for diagnostics.
    pub fn spaces(&self) -> Vec<String> {
        self.spaces.read().keys().cloned().collect()
    }
}
