//! Backing store contracts and the in-memory directory engine.
//!
//! The core reads and writes logical row shapes (principals, membership
//! edges, role assignments, policies) through the `DirectoryReader` and
//! `DirectoryWriter` traits; it does not own a physical schema. Reads must be
//! idempotent and side-effect-free because the cache layer is the only thing
//! allowed to repeat them. Writes complete durably before any cache
//! invalidation is issued by the caller.
//!
//! `MemoryDirectory` is the crate's default engine and the substrate for the
//! test fixtures.

use crate::error::{AuthError, Result};
use crate::types::{ContainerId, PrincipalId, PrincipalKind, ResourceId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One row of the principals table, covering users and groups.
///
/// `name` is the login email for users and the group name for groups;
/// `display_name` is set for users only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRow {
    pub id: PrincipalId,
    pub name: String,
    pub display_name: Option<String>,
    pub kind: PrincipalKind,
    pub container: Option<ContainerId>,
    pub owner: Option<PrincipalId>,
}

/// One membership edge: `member` belongs directly to `group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRow {
    pub member: PrincipalId,
    pub group: PrincipalId,
}

/// One role-assignment row for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub resource: ResourceId,
    pub principal: PrincipalId,
    pub role: String,
}

/// Per-resource policy metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRow {
    pub resource: ResourceId,
    pub inheritable: bool,
    pub modified: DateTime<Utc>,
}

/// Read contract the cache layer requires from a backing store.
pub trait DirectoryReader: Send + Sync {
    /// Row lookup by principal id; `None` when absent.
    fn principal_row(&self, id: PrincipalId) -> Result<Option<PrincipalRow>>;

    /// Group rows scoped to one container, ordered case-insensitively by name.
    fn groups_in(&self, container: &ContainerId) -> Result<Vec<PrincipalRow>>;

    /// Site-wide group rows, ordered case-insensitively by name.
    fn site_groups(&self) -> Result<Vec<PrincipalRow>>;

    /// Groups `member` belongs to directly (one edge hop).
    fn direct_groups_of(&self, member: PrincipalId) -> Result<Vec<PrincipalId>>;

    /// Direct members of `group`.
    fn members_of(&self, group: PrincipalId) -> Result<Vec<PrincipalId>>;

    /// Total principal rows; bounds closure traversal on corrupt graphs.
    fn principal_count(&self) -> Result<usize>;

    /// Role-assignment rows for a resource, ordered by principal id.
    fn assignment_rows(&self, resource: &ResourceId) -> Result<Vec<AssignmentRow>>;

    /// Policy metadata for a resource.
    fn policy_row(&self, resource: &ResourceId) -> Result<Option<PolicyRow>>;

    /// Parent of a resource in the inheritance tree.
    fn resource_parent(&self, resource: &ResourceId) -> Result<Option<ResourceId>>;

    /// The user's most recent password digests, newest first, capped at
    /// `depth`.
    fn password_history(&self, user: PrincipalId, depth: usize) -> Result<Vec<String>>;
}

/// Write contract. Each call is durable before it returns.
pub trait DirectoryWriter: Send + Sync {
    /// Insert a user row with an explicit id.
    fn insert_user(&self, row: PrincipalRow) -> Result<()>;

    /// Insert a group row, allocating its id. Name uniqueness is enforced
    /// here, under the store's own lock: errors with `GroupExists` when the
    /// container already holds a group of that name, case-insensitively.
    fn insert_group(
        &self,
        name: &str,
        container: Option<ContainerId>,
        owner: Option<PrincipalId>,
    ) -> Result<PrincipalRow>;

    /// Delete a principal row. Errors with `NotFound` when absent.
    fn delete_principal(&self, id: PrincipalId) -> Result<()>;

    /// Insert a membership edge. Errors with `InvalidInput` on a duplicate.
    fn insert_membership(&self, member: PrincipalId, group: PrincipalId) -> Result<()>;

    /// Delete a membership edge. Errors with `NotFound` when absent.
    fn delete_membership(&self, member: PrincipalId, group: PrincipalId) -> Result<()>;

    /// Delete every edge touching `principal`, as member or as group.
    fn delete_memberships_of(&self, principal: PrincipalId) -> Result<()>;

    /// Replace a resource's policy row and assignment rows atomically.
    fn save_policy(&self, row: PolicyRow, assignments: Vec<AssignmentRow>) -> Result<()>;

    /// Remove a resource's policy row and assignment rows.
    fn delete_policy(&self, resource: &ResourceId) -> Result<()>;

    /// Remove every assignment row naming `principal`, across all resources.
    fn delete_assignments_for(&self, principal: PrincipalId) -> Result<()>;

    /// Declare `parent` as the inheritance parent of `resource`.
    fn set_resource_parent(&self, resource: ResourceId, parent: ResourceId) -> Result<()>;

    /// Record a password digest for the reuse check, newest first.
    fn record_password(&self, user: PrincipalId, digest: String) -> Result<()>;
}

/// Combined read/write contract.
pub trait Directory: DirectoryReader + DirectoryWriter {}
impl<T: DirectoryReader + DirectoryWriter> Directory for T {}

#[derive(Debug, Default)]
struct Tables {
    principals: BTreeMap<PrincipalId, PrincipalRow>,
    /// (member, group) edges.
    memberships: BTreeSet<(PrincipalId, PrincipalId)>,
    assignments: BTreeMap<ResourceId, Vec<AssignmentRow>>,
    policies: BTreeMap<ResourceId, PolicyRow>,
    parents: BTreeMap<ResourceId, ResourceId>,
    passwords: BTreeMap<PrincipalId, Vec<String>>,
    next_id: i64,
}

/// In-memory directory engine behind a read/write lock.
#[derive(Debug)]
pub struct MemoryDirectory {
    inner: RwLock<Tables>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tables {
                next_id: 1,
                ..Tables::default()
            }),
        }
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_name(mut rows: Vec<PrincipalRow>) -> Vec<PrincipalRow> {
    rows.sort_by_key(|row| row.name.to_lowercase());
    rows
}

impl DirectoryReader for MemoryDirectory {
    fn principal_row(&self, id: PrincipalId) -> Result<Option<PrincipalRow>> {
        Ok(self.inner.read().principals.get(&id).cloned())
    }

    fn groups_in(&self, container: &ContainerId) -> Result<Vec<PrincipalRow>> {
        let tables = self.inner.read();
        let rows = tables
            .principals
            .values()
            .filter(|row| row.kind.is_group() && row.container.as_ref() == Some(container))
            .cloned()
            .collect();
        Ok(sorted_by_name(rows))
    }

    fn site_groups(&self) -> Result<Vec<PrincipalRow>> {
        let tables = self.inner.read();
        let rows = tables
            .principals
            .values()
            .filter(|row| row.kind.is_group() && row.container.is_none())
            .cloned()
            .collect();
        Ok(sorted_by_name(rows))
    }

    fn direct_groups_of(&self, member: PrincipalId) -> Result<Vec<PrincipalId>> {
        let tables = self.inner.read();
        Ok(tables
            .memberships
            .iter()
            .filter(|(m, _)| *m == member)
            .map(|(_, g)| *g)
            .collect())
    }

    fn members_of(&self, group: PrincipalId) -> Result<Vec<PrincipalId>> {
        let tables = self.inner.read();
        Ok(tables
            .memberships
            .iter()
            .filter(|(_, g)| *g == group)
            .map(|(m, _)| *m)
            .collect())
    }

    fn principal_count(&self) -> Result<usize> {
        Ok(self.inner.read().principals.len())
    }

    fn assignment_rows(&self, resource: &ResourceId) -> Result<Vec<AssignmentRow>> {
        let tables = self.inner.read();
        let mut rows = tables.assignments.get(resource).cloned().unwrap_or_default();
        rows.sort_by(|a, b| a.principal.cmp(&b.principal).then_with(|| a.role.cmp(&b.role)));
        Ok(rows)
    }

    fn policy_row(&self, resource: &ResourceId) -> Result<Option<PolicyRow>> {
        Ok(self.inner.read().policies.get(resource).cloned())
    }

    fn resource_parent(&self, resource: &ResourceId) -> Result<Option<ResourceId>> {
        Ok(self.inner.read().parents.get(resource).cloned())
    }

    fn password_history(&self, user: PrincipalId, depth: usize) -> Result<Vec<String>> {
        let tables = self.inner.read();
        Ok(tables
            .passwords
            .get(&user)
            .map(|digests| digests.iter().take(depth).cloned().collect())
            .unwrap_or_default())
    }
}

impl DirectoryWriter for MemoryDirectory {
    fn insert_user(&self, row: PrincipalRow) -> Result<()> {
        let mut tables = self.inner.write();
        if tables.principals.contains_key(&row.id) {
            return Err(AuthError::InvalidInput(format!(
                "principal {} already exists",
                row.id
            )));
        }
        tables.next_id = tables.next_id.max(row.id.0 + 1);
        tables.principals.insert(row.id, row);
        Ok(())
    }

    fn insert_group(
        &self,
        name: &str,
        container: Option<ContainerId>,
        owner: Option<PrincipalId>,
    ) -> Result<PrincipalRow> {
        let mut tables = self.inner.write();
        let lowered = name.to_lowercase();
        let taken = tables.principals.values().any(|row| {
            row.kind.is_group() && row.container == container && row.name.to_lowercase() == lowered
        });
        if taken {
            return Err(AuthError::GroupExists(name.to_string()));
        }
        let id = PrincipalId(tables.next_id);
        tables.next_id += 1;
        let row = PrincipalRow {
            id,
            name: name.to_string(),
            display_name: None,
            kind: PrincipalKind::Group,
            container,
            owner,
        };
        tables.principals.insert(id, row.clone());
        Ok(row)
    }

    fn delete_principal(&self, id: PrincipalId) -> Result<()> {
        let mut tables = self.inner.write();
        tables
            .principals
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AuthError::NotFound(format!("principal {id}")))
    }

    fn insert_membership(&self, member: PrincipalId, group: PrincipalId) -> Result<()> {
        let mut tables = self.inner.write();
        if !tables.memberships.insert((member, group)) {
            return Err(AuthError::InvalidInput(format!(
                "principal {member} is already a member of group {group}"
            )));
        }
        Ok(())
    }

    fn delete_membership(&self, member: PrincipalId, group: PrincipalId) -> Result<()> {
        let mut tables = self.inner.write();
        if !tables.memberships.remove(&(member, group)) {
            return Err(AuthError::NotFound(format!(
                "membership of {member} in group {group}"
            )));
        }
        Ok(())
    }

    fn delete_memberships_of(&self, principal: PrincipalId) -> Result<()> {
        let mut tables = self.inner.write();
        tables
            .memberships
            .retain(|(m, g)| *m != principal && *g != principal);
        Ok(())
    }

    fn save_policy(&self, row: PolicyRow, assignments: Vec<AssignmentRow>) -> Result<()> {
        let mut tables = self.inner.write();
        let resource = row.resource.clone();
        tables.policies.insert(resource.clone(), row);
        tables.assignments.insert(resource, assignments);
        Ok(())
    }

    fn delete_policy(&self, resource: &ResourceId) -> Result<()> {
        let mut tables = self.inner.write();
        tables.policies.remove(resource);
        tables.assignments.remove(resource);
        Ok(())
    }

    fn delete_assignments_for(&self, principal: PrincipalId) -> Result<()> {
        let mut tables = self.inner.write();
        for rows in tables.assignments.values_mut() {
            rows.retain(|row| row.principal != principal);
        }
        Ok(())
    }

    fn set_resource_parent(&self, resource: ResourceId, parent: ResourceId) -> Result<()> {
        self.inner.write().parents.insert(resource, parent);
        Ok(())
    }

    fn record_password(&self, user: PrincipalId, digest: String) -> Result<()> {
        let mut tables = self.inner.write();
        tables.passwords.entry(user).or_default().insert(0, digest);
        Ok(())
    }
}
