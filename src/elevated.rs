//! Contextual and limited principal wrapping.
//!
//! An `EffectivePrincipal` is a base principal id plus a decoration: extra
//! contextual roles, and optionally a full override of the group closure.
//! Both variants are pure values: equal inputs produce equal permission
//! outcomes, nothing is persisted, and the base principal is untouched.

use crate::principal::PrincipalSet;
use crate::roles::Role;
use crate::types::PrincipalId;
use std::sync::Arc;

/// A principal as seen by one permission computation.
#[derive(Debug, Clone)]
pub struct EffectivePrincipal {
    id: PrincipalId,
    /// Roles carried by the principal itself, outside any stored policy.
    contextual_roles: Vec<Arc<Role>>,
    /// When set, replaces the principal's resolved group closure entirely.
    group_override: Option<PrincipalSet>,
}

impl EffectivePrincipal {
    /// The plain principal with no decoration.
    pub fn base(id: PrincipalId) -> Self {
        Self {
            id,
            contextual_roles: Vec::new(),
            group_override: None,
        }
    }

    /// Same identity and groups as `base`, with extra contextual roles.
    pub fn elevated(base: &EffectivePrincipal, extra_roles: Vec<Arc<Role>>) -> Self {
        let mut contextual_roles = base.contextual_roles.clone();
        contextual_roles.extend(extra_roles);
        Self {
            id: base.id,
            contextual_roles,
            group_override: base.group_override.clone(),
        }
    }

    /// Guard-rail variant: groups and contextual roles are fully overridden,
    /// typically to a strict subset of the base principal's real rights.
    pub fn limited(id: PrincipalId, groups: PrincipalSet, roles: Vec<Arc<Role>>) -> Self {
        Self {
            id,
            contextual_roles: roles,
            group_override: Some(groups),
        }
    }

    pub fn id(&self) -> PrincipalId {
        self.id
    }

    pub fn contextual_roles(&self) -> &[Arc<Role>] {
        &self.contextual_roles
    }

    pub fn group_override(&self) -> Option<&PrincipalSet> {
        self.group_override.as_ref()
    }
}

impl From<PrincipalId> for EffectivePrincipal {
    fn from(id: PrincipalId) -> Self {
        Self::base(id)
    }
}
