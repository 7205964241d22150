//! Security policies: per-resource role assignments with inheritance.
//!
//! A `SecurityPolicy` owns the (principal, role) grants for one resource.
//! Read paths always see an immutable `Arc` snapshot loaded through the
//! blocking cache; write paths persist rows first and invalidate the
//! resource's cache entry before returning, so a writer immediately reads its
//! own change.

use crate::cache::{BlockingCache, CacheStatsSnapshot};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::metrics::SecurityMetrics;
use crate::principal::PrincipalSet;
use crate::roles::{Role, RoleRegistry};
use crate::store::{AssignmentRow, Directory, PolicyRow};
use crate::types::{PrincipalId, ResourceId};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;

/// One (resource, principal, role) grant.
///
/// The ordering is load-bearing: primary key is the resource (`None` sorts
/// first), then the principal id, then the role's unique name. Serialization
/// and deduplication depend on it being a strict total order.
#[derive(Debug, Clone)]
pub struct RoleAssignment {
    pub resource: Option<ResourceId>,
    pub principal: PrincipalId,
    pub role: Arc<Role>,
}

impl RoleAssignment {
    pub fn new(resource: Option<ResourceId>, principal: PrincipalId, role: Arc<Role>) -> Self {
        Self {
            resource,
            principal,
            role,
        }
    }
}

impl PartialEq for RoleAssignment {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RoleAssignment {}

impl Ord for RoleAssignment {
    fn cmp(&self, other: &Self) -> Ordering {
        // Option<ResourceId> orders None before Some, matching nulls-first.
        self.resource
            .cmp(&other.resource)
            .then_with(|| self.principal.cmp(&other.principal))
            .then_with(|| self.role.name().cmp(other.role.name()))
    }
}

impl PartialOrd for RoleAssignment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The set of role assignments attached to one resource.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    resource: ResourceId,
    /// Always sorted and deduplicated.
    assignments: Vec<RoleAssignment>,
    inheritable: bool,
    modified: DateTime<Utc>,
}

impl SecurityPolicy {
    /// A fresh, empty, inheritable policy for a resource.
    pub fn new(resource: ResourceId) -> Self {
        Self {
            resource,
            assignments: Vec::new(),
            inheritable: true,
            modified: Utc::now(),
        }
    }

    /// Rebuild a policy from stored rows. Rows naming a role missing from the
    /// registry are skipped: an unknown role can never grant anything, so
    /// dropping the row fails safe.
    pub fn from_rows(
        resource: ResourceId,
        rows: Vec<AssignmentRow>,
        policy_row: Option<PolicyRow>,
        registry: &RoleRegistry,
    ) -> Self {
        let mut policy = Self {
            resource: resource.clone(),
            assignments: Vec::new(),
            inheritable: policy_row.as_ref().map(|row| row.inheritable).unwrap_or(true),
            modified: policy_row
                .as_ref()
                .map(|row| row.modified)
                .unwrap_or_else(Utc::now),
        };
        for row in rows {
            match registry.get(&row.role) {
                Some(role) => policy.add_assignment(row.principal, role),
                None => {
                    tracing::warn!(
                        resource = %resource,
                        principal = %row.principal,
                        role = %row.role,
                        "skipping assignment row with unknown role"
                    );
                }
            }
        }
        policy
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn is_inheritable(&self) -> bool {
        self.inheritable
    }

    pub fn set_inheritable(&mut self, inheritable: bool) {
        self.inheritable = inheritable;
        self.modified = Utc::now();
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn assignments(&self) -> &[RoleAssignment] {
        &self.assignments
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Add a grant, keeping the assignment list sorted and deduplicated.
    pub fn add_assignment(&mut self, principal: PrincipalId, role: Arc<Role>) {
        let assignment = RoleAssignment::new(Some(self.resource.clone()), principal, role);
        if let Err(index) = self.assignments.binary_search(&assignment) {
            self.assignments.insert(index, assignment);
            self.modified = Utc::now();
        }
    }

    /// Remove a grant. Returns whether it was present.
    pub fn remove_assignment(&mut self, principal: PrincipalId, role_name: &str) -> bool {
        let before = self.assignments.len();
        self.assignments
            .retain(|a| !(a.principal == principal && a.role.name() == role_name));
        let removed = self.assignments.len() != before;
        if removed {
            self.modified = Utc::now();
        }
        removed
    }

    /// Roles assigned to any principal in the matching set. Callers decide
    /// what the set contains: for an ordinary user it is the group closure
    /// plus the user's own id, while a group override replaces it outright,
    /// masking direct grants along with group ones.
    pub fn roles_for(&self, principals: &PrincipalSet) -> Vec<Arc<Role>> {
        self.assignments
            .iter()
            .filter(|a| principals.contains(a.principal))
            .map(|a| a.role.clone())
            .collect()
    }

    /// Row shapes for persistence.
    pub fn to_rows(&self) -> (PolicyRow, Vec<AssignmentRow>) {
        let policy_row = PolicyRow {
            resource: self.resource.clone(),
            inheritable: self.inheritable,
            modified: self.modified,
        };
        let assignment_rows = self
            .assignments
            .iter()
            .map(|a| AssignmentRow {
                resource: self.resource.clone(),
                principal: a.principal,
                role: a.role.name().to_string(),
            })
            .collect();
        (policy_row, assignment_rows)
    }
}

/// Depth cap for the inheritance walk. The resource parent graph is a tree,
/// but the walk terminates even on corrupt cyclic data.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Read-through cached access to per-resource policies.
pub struct PolicyStore {
    store: Arc<dyn Directory>,
    registry: Arc<RoleRegistry>,
    cache: BlockingCache<ResourceId, Arc<SecurityPolicy>>,
    metrics: Arc<SecurityMetrics>,
}

impl PolicyStore {
    pub fn new(
        store: Arc<dyn Directory>,
        registry: Arc<RoleRegistry>,
        cache_config: &CacheConfig,
        metrics: Arc<SecurityMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            cache: BlockingCache::new(cache_config),
            metrics,
        }
    }

    /// The policy for a resource. A resource with no stored rows gets a
    /// fresh empty inheritable policy; a missing resource is shaped exactly
    /// like a denied one so existence does not leak through this path.
    pub fn policy_for(&self, resource: &ResourceId) -> Result<Arc<SecurityPolicy>> {
        let loaded = self.cache.get_or_load(resource, |r| {
            let rows = self.store.assignment_rows(r)?;
            let policy_row = self.store.policy_row(r)?;
            Ok(Some(Arc::new(SecurityPolicy::from_rows(
                r.clone(),
                rows,
                policy_row,
                &self.registry,
            ))))
        })?;
        Ok(loaded.unwrap_or_else(|| Arc::new(SecurityPolicy::new(resource.clone()))))
    }

    /// The resource's policy followed by every inheritable ancestor policy,
    /// nearest first. The walk stops at a non-inheritable policy, the root,
    /// or the depth cap; visiting a resource twice (corrupt parent data)
    /// stops it as well.
    pub fn effective_chain(&self, resource: &ResourceId) -> Result<Vec<Arc<SecurityPolicy>>> {
        let mut chain = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut current = resource.clone();

        for _ in 0..MAX_INHERITANCE_DEPTH {
            if !seen.insert(current.clone()) {
                tracing::warn!(resource = %resource, "cycle in resource parent chain");
                break;
            }
            let policy = self.policy_for(&current)?;
            let inheritable = policy.is_inheritable();
            chain.push(policy);
            if !inheritable {
                break;
            }
            match self.store.resource_parent(&current)? {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(chain)
    }

    /// Persist a policy, then invalidate its cache entry. The entry is gone
    /// before this returns, so the writer's next read sees the new rows.
    pub fn save_policy(&self, policy: &SecurityPolicy) -> Result<()> {
        let (policy_row, assignment_rows) = policy.to_rows();
        self.store.save_policy(policy_row, assignment_rows)?;
        self.cache.remove(policy.resource());
        self.metrics.record_policy_write();
        self.metrics.record_cache_invalidation();
        tracing::debug!(resource = %policy.resource(), assignments = policy.len(), "policy saved");
        Ok(())
    }

    /// Remove a policy's rows, then invalidate its cache entry.
    pub fn delete_policy(&self, resource: &ResourceId) -> Result<()> {
        self.store.delete_policy(resource)?;
        self.cache.remove(resource);
        self.metrics.record_policy_write();
        self.metrics.record_cache_invalidation();
        tracing::debug!(resource = %resource, "policy deleted");
        Ok(())
    }

    /// Drop one resource's cached policy.
    pub fn invalidate(&self, resource: &ResourceId) {
        self.cache.remove(resource);
        self.metrics.record_cache_invalidation();
    }

    /// Drop every cached policy. Used when a write touches assignments
    /// across resources, such as deleting a principal.
    pub fn invalidate_all(&self) {
        self.cache.clear();
        self.metrics.record_cache_invalidation();
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }
}
