//! Role catalog: named, immutable permission bundles.
//!
//! Roles form a closed registry resolvable by unique name, not a
//! runtime-mutable graph. The standard catalog mirrors the usual
//! administrative ladder from full admin down to no permissions.

use crate::types::Permission;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// An immutable, named bundle of permission kinds.
#[derive(Clone, PartialEq, Eq)]
pub struct Role {
    name: String,
    permissions: BTreeSet<Permission>,
}

impl Role {
    pub fn new(name: impl Into<String>, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            name: name.into(),
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn permissions(&self) -> impl Iterator<Item = Permission> + '_ {
        self.permissions.iter().copied()
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Role")
            .field("name", &self.name)
            .field("permissions", &self.permissions)
            .finish()
    }
}

/// Well-known role names in the standard catalog.
pub mod names {
    pub const SITE_ADMIN: &str = "site-admin";
    pub const PROJECT_ADMIN: &str = "project-admin";
    pub const EDITOR: &str = "editor";
    pub const AUTHOR: &str = "author";
    pub const READER: &str = "reader";
    pub const SUBMITTER: &str = "submitter";
    pub const NO_PERMISSIONS: &str = "no-permissions";
}

/// Closed catalog of roles resolvable by unique name.
#[derive(Debug)]
pub struct RoleRegistry {
    roles: BTreeMap<String, Arc<Role>>,
}

impl RoleRegistry {
    /// The standard role catalog.
    pub fn standard() -> Self {
        let mut registry = Self {
            roles: BTreeMap::new(),
        };
        registry.register(Role::new(names::SITE_ADMIN, Permission::ALL));
        registry.register(Role::new(names::PROJECT_ADMIN, Permission::ALL));
        registry.register(Role::new(
            names::EDITOR,
            [
                Permission::Read,
                Permission::Insert,
                Permission::Update,
                Permission::Delete,
            ],
        ));
        registry.register(Role::new(
            names::AUTHOR,
            [Permission::Read, Permission::Insert],
        ));
        registry.register(Role::new(names::READER, [Permission::Read]));
        registry.register(Role::new(names::SUBMITTER, [Permission::Insert]));
        registry.register(Role::new(names::NO_PERMISSIONS, []));
        registry
    }

    fn register(&mut self, role: Role) {
        self.roles.insert(role.name().to_string(), Arc::new(role));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Role>> {
        self.roles.get(name).cloned()
    }

    /// Resolve a role that must exist.
    pub fn require(&self, name: &str) -> crate::Result<Arc<Role>> {
        self.get(name)
            .ok_or_else(|| crate::error::AuthError::UnknownRole(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_grants() {
        let registry = RoleRegistry::standard();

        let admin = registry.require(names::SITE_ADMIN).unwrap();
        assert!(Permission::ALL.iter().all(|p| admin.grants(*p)));

        let reader = registry.require(names::READER).unwrap();
        assert!(reader.grants(Permission::Read));
        assert!(!reader.grants(Permission::Update));

        let none = registry.require(names::NO_PERMISSIONS).unwrap();
        assert_eq!(none.permissions().count(), 0);
    }

    #[test]
    fn test_registry_is_closed() {
        let registry = RoleRegistry::standard();
        assert!(registry.get("made-up-role").is_none());
        assert!(matches!(
            registry.require("made-up-role"),
            Err(crate::error::AuthError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_editor_cannot_admin() {
        let registry = RoleRegistry::standard();
        let editor = registry.require(names::EDITOR).unwrap();
        assert!(editor.grants(Permission::Delete));
        assert!(!editor.grants(Permission::Admin));
    }
}
