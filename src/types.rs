//! Core identifier and enumeration types shared across the authorization core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable integer identity of a principal (user or group).
///
/// Negative ids are reserved for the fixed system groups and are never
/// allocated for ordinary rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PrincipalId(pub i64);

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PrincipalId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identity of a securable resource (a container, a dataset, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of the hierarchical scoping unit groups and resources live in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of a principal row, stored as a one-character type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalKind {
    User,
    Group,
    Role,
    ModuleGroup,
}

impl PrincipalKind {
    /// One-character tag used by the persisted row shape.
    pub fn type_tag(&self) -> char {
        match self {
            PrincipalKind::User => 'u',
            PrincipalKind::Group => 'g',
            PrincipalKind::Role => 'r',
            PrincipalKind::ModuleGroup => 'm',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'u' => Some(PrincipalKind::User),
            'g' => Some(PrincipalKind::Group),
            'r' => Some(PrincipalKind::Role),
            'm' => Some(PrincipalKind::ModuleGroup),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, PrincipalKind::Group | PrincipalKind::ModuleGroup)
    }
}

/// A single grantable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    Read,
    Insert,
    Update,
    Delete,
    Admin,
}

impl Permission {
    /// All permission kinds, in catalog order.
    pub const ALL: [Permission; 5] = [
        Permission::Read,
        Permission::Insert,
        Permission::Update,
        Permission::Delete,
        Permission::Admin,
    ];
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::Read => "read",
            Permission::Insert => "insert",
            Permission::Update => "update",
            Permission::Delete => "delete",
            Permission::Admin => "admin",
        };
        f.write_str(name)
    }
}

/// Reserved identity of the site Administrators group.
pub const GROUP_ADMINISTRATORS: PrincipalId = PrincipalId(-1);
/// Reserved identity of the all-site-users group.
pub const GROUP_USERS: PrincipalId = PrincipalId(-2);
/// Reserved identity of the Guests group.
pub const GROUP_GUESTS: PrincipalId = PrincipalId(-3);
/// Reserved identity of the Developers group.
pub const GROUP_DEVELOPERS: PrincipalId = PrincipalId(-4);

/// Number of reserved system groups.
pub const SYSTEM_GROUP_COUNT: usize = 4;

/// True for the four reserved system group identities.
pub fn is_system_group(id: PrincipalId) -> bool {
    matches!(
        id,
        GROUP_ADMINISTRATORS | GROUP_USERS | GROUP_GUESTS | GROUP_DEVELOPERS
    )
}
