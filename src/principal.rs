//! Principal model: users, groups, and sorted membership snapshots.
//!
//! Users and groups are both principals with a stable integer identity. The
//! four system groups (Administrators, Users, Guests, Developers) are
//! well-known constants constructed in code and never loaded from the store.

use crate::types::{
    is_system_group, ContainerId, PrincipalId, GROUP_ADMINISTRATORS,
    GROUP_DEVELOPERS, GROUP_GUESTS, GROUP_USERS,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// A user principal. Identity is immutable; display attributes may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: PrincipalId,
    pub email: String,
    pub display_name: String,
}

impl User {
    pub fn new(id: PrincipalId, email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            display_name: display_name.into(),
        }
    }
}

/// A group principal, scoped either site-wide or to one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: PrincipalId,
    pub name: String,
    /// `None` means a site-wide group visible in every container.
    pub container: Option<ContainerId>,
    pub owner: Option<PrincipalId>,
}

impl Group {
    pub fn new(
        id: PrincipalId,
        name: impl Into<String>,
        container: Option<ContainerId>,
        owner: Option<PrincipalId>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            container,
            owner,
        }
    }

    /// The well-known system group for a reserved id, if any.
    pub fn system(id: PrincipalId) -> Option<Group> {
        let name = match id {
            GROUP_ADMINISTRATORS => "Administrators",
            GROUP_USERS => "Users",
            GROUP_GUESTS => "Guests",
            GROUP_DEVELOPERS => "Developers",
            _ => return None,
        };
        Some(Group::new(id, name, None, None))
    }

    /// All four system groups.
    pub fn system_groups() -> [Group; 4] {
        [
            Group::system(GROUP_ADMINISTRATORS).unwrap(),
            Group::system(GROUP_USERS).unwrap(),
            Group::system(GROUP_GUESTS).unwrap(),
            Group::system(GROUP_DEVELOPERS).unwrap(),
        ]
    }

    pub fn is_system(&self) -> bool {
        is_system_group(self.id)
    }

    /// True for groups visible in every container.
    pub fn is_site_group(&self) -> bool {
        self.container.is_none()
    }

    /// Name that disambiguates the site-wide Administrators and Users groups
    /// from the per-container groups of the same name.
    pub fn display_name(&self) -> &str {
        match self.id {
            GROUP_ADMINISTRATORS => "Site Administrators",
            GROUP_USERS => "All Site Users",
            _ => &self.name,
        }
    }
}

/// An immutable, ascending-sorted, deduplicated set of principal ids.
///
/// Represents either "all groups a principal belongs to" or "all members of a
/// group". Sortedness makes membership tests a binary search and gives
/// deterministic iteration and equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalSet {
    ids: Arc<[PrincipalId]>,
}

impl PrincipalSet {
    /// The shared empty set, returned for principals with no memberships.
    pub fn empty() -> Self {
        static EMPTY: OnceLock<PrincipalSet> = OnceLock::new();
        EMPTY
            .get_or_init(|| PrincipalSet {
                ids: Arc::from(Vec::new()),
            })
            .clone()
    }

    /// Build a set from arbitrary ids, sorting and deduplicating.
    pub fn new(ids: impl IntoIterator<Item = PrincipalId>) -> Self {
        let mut ids: Vec<PrincipalId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Self::empty();
        }
        Self {
            ids: Arc::from(ids),
        }
    }

    /// Binary-search membership test, O(log n).
    pub fn contains(&self, id: PrincipalId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PrincipalId> + '_ {
        self.ids.iter().copied()
    }

    pub fn as_slice(&self) -> &[PrincipalId] {
        &self.ids
    }
}

impl FromIterator<PrincipalId> for PrincipalSet {
    fn from_iter<I: IntoIterator<Item = PrincipalId>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a PrincipalSet {
    type Item = PrincipalId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, PrincipalId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_set_sorts_and_dedups() {
        let set = PrincipalSet::new([PrincipalId(5), PrincipalId(-3), PrincipalId(5), PrincipalId(1)]);
        let ids: Vec<i64> = set.iter().map(|id| id.0).collect();
        assert_eq!(ids, vec![-3, 1, 5]);
        assert!(set.contains(PrincipalId(1)));
        assert!(!set.contains(PrincipalId(2)));
    }

    #[test]
    fn test_principal_set_equality_is_order_independent() {
        let a = PrincipalSet::new([PrincipalId(1), PrincipalId(2)]);
        let b = PrincipalSet::new([PrincipalId(2), PrincipalId(1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_set_is_shared() {
        let a = PrincipalSet::empty();
        let b = PrincipalSet::new(std::iter::empty());
        assert!(a.is_empty());
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.ids, &b.ids));
    }

    #[test]
    fn test_system_groups() {
        let groups = Group::system_groups();
        assert!(groups.iter().all(|g| g.is_system() && g.is_site_group()));
        assert_eq!(
            Group::system(GROUP_USERS).unwrap().display_name(),
            "All Site Users"
        );
        assert_eq!(Group::system(PrincipalId(7)), None);
    }
}
