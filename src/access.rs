//! Access control evaluation
//!
//! Every read of private content passes through `can_view`, a pure
//! function over a resource's visibility flags and the acting principal.
//! The administrator role bypasses all flags unconditionally. Decisions
//! on the serving path are also logged as `resource.view.allow` /
//! `resource.view.deny` events, which is the contract the external audit
//! collaborator consumes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

use crate::errors::{Result, StorageError};
use crate::store::ProviderId;

/// Role of an acting principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Owner,
    Guest,
}

/// The acting identity making an access request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    #[serde(default)]
    pub group_aliases: BTreeSet<String>,
    /// Providers this principal may upload through; empty means all
    #[serde(default)]
    pub allowed_storage_providers: BTreeSet<ProviderId>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this principal may upload through the given provider
    pub fn may_upload_via(&self, provider: ProviderId) -> bool {
        self.is_admin()
            || self.allowed_storage_providers.is_empty()
            || self.allowed_storage_providers.contains(&provider)
    }
}

/// The visibility triple any protected resource must expose
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Visibility {
    pub is_public: bool,
    #[serde(default)]
    pub allowed_groups: BTreeSet<String>,
    #[serde(default)]
    pub allowed_users: BTreeSet<Uuid>,
}

/// Decide whether a principal (or anonymous caller) may view a resource.
///
/// Order matters: the admin bypass comes before the public check so an
/// admin sees everything even if later rules would deny, and the public
/// check comes before the anonymous deny so public resources need no
/// principal at all.
pub fn can_view(resource: &Visibility, principal: Option<&Principal>) -> bool {
    if let Some(p) = principal {
        if p.is_admin() {
            return true;
        }
    }

    if resource.is_public {
        return true;
    }

    let Some(principal) = principal else {
        return false;
    };

    if resource.allowed_users.contains(&principal.id) {
        return true;
    }

    principal
        .group_aliases
        .intersection(&resource.allowed_groups)
        .next()
        .is_some()
}

/// Gate a serving-path read: evaluate, log the decision for the audit
/// collaborator, and fail closed with `AccessDenied`.
pub fn authorize_view(
    resource_id: Uuid,
    resource: &Visibility,
    principal: Option<&Principal>,
) -> Result<()> {
    let allowed = can_view(resource, principal);
    let principal_id = principal.map(|p| p.id.to_string());
    if allowed {
        info!(
            event = "resource.view.allow",
            resource = %resource_id,
            principal = principal_id.as_deref().unwrap_or("anonymous"),
        );
        crate::metrics::ACCESS_DECISIONS.with_label_values(&["allow"]).inc();
        Ok(())
    } else {
        info!(
            event = "resource.view.deny",
            resource = %resource_id,
            principal = principal_id.as_deref().unwrap_or("anonymous"),
        );
        crate::metrics::ACCESS_DECISIONS.with_label_values(&["deny"]).inc();
        Err(StorageError::AccessDenied)
    }
}
