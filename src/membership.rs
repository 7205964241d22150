//! Group membership resolution with caching.
//!
//! Computes, for any principal, the transitive closure of the groups it
//! belongs to, as a sorted deduplicated `PrincipalSet`. The expansion is a
//! breadth-first walk over membership edges with a visited set, bounded by
//! the total principal count, so corrupt cyclic data terminates instead of
//! looping.
//!
//! Closures, group identities, direct member lists and per-container group
//! listings are all held in blocking caches. Membership writes hit the store
//! first and invalidate before returning; a membership edit can change the
//! closure of principals far from the edited edge (the member may itself be
//! a group), so closure entries are dropped wholesale rather than chased
//! through the graph.

use crate::cache::{BlockingCache, CacheStatsSnapshot};
use crate::config::CacheConfig;
use crate::error::{AuthError, Result};
use crate::metrics::SecurityMetrics;
use crate::principal::{Group, PrincipalSet};
use crate::store::Directory;
use crate::types::{
    is_system_group, ContainerId, PrincipalId, PrincipalKind, GROUP_GUESTS, GROUP_USERS,
    SYSTEM_GROUP_COUNT,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// Which principal kinds a member listing admits.
///
/// A closed sum over {users, groups, either}; each variant carries its own
/// admission test instead of dispatching through an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFilter {
    Users,
    Groups,
    Either,
}

impl MemberFilter {
    pub fn admits(&self, kind: PrincipalKind) -> bool {
        match self {
            MemberFilter::Users => kind == PrincipalKind::User,
            MemberFilter::Groups => kind.is_group(),
            MemberFilter::Either => true,
        }
    }
}

/// Cached, bounded resolver for the group membership graph.
pub struct MembershipResolver {
    store: Arc<dyn Directory>,
    /// principal id -> transitive group closure
    closure_cache: BlockingCache<PrincipalId, PrincipalSet>,
    /// group id -> direct member set
    members_cache: BlockingCache<PrincipalId, PrincipalSet>,
    /// group id -> group identity row
    group_cache: BlockingCache<PrincipalId, Group>,
    /// container id (None = site-wide list) -> ordered group listing.
    /// Only the canonical per-container list is cached; the "plus site
    /// groups" view is composed on each call so invalidating a container
    /// never has to know about listing variants.
    listing_cache: BlockingCache<Option<ContainerId>, Arc<Vec<Group>>>,
    metrics: Arc<SecurityMetrics>,
}

impl MembershipResolver {
    pub fn new(
        store: Arc<dyn Directory>,
        cache_config: &CacheConfig,
        metrics: Arc<SecurityMetrics>,
    ) -> Self {
        Self {
            store,
            closure_cache: BlockingCache::new(cache_config),
            members_cache: BlockingCache::new(cache_config),
            group_cache: BlockingCache::new(cache_config),
            listing_cache: BlockingCache::new(cache_config),
            metrics,
        }
    }

    /// Every group the principal transitively belongs to, sorted ascending.
    ///
    /// Includes the implicit memberships: every known principal is in Guests,
    /// and every user is additionally in Users. An unknown id resolves to the
    /// shared empty set, so callers deny by default on ambiguity.
    pub fn groups_of(&self, principal: PrincipalId) -> Result<PrincipalSet> {
        let loaded = self
            .closure_cache
            .get_or_load(&principal, |p| self.compute_closure(*p).map(Some))?;
        Ok(loaded.unwrap_or_else(PrincipalSet::empty))
    }

    /// Binary-search membership test against the materialized closure.
    pub fn is_member(&self, principal: PrincipalId, group: PrincipalId) -> Result<bool> {
        Ok(self.groups_of(principal)?.contains(group))
    }

    /// Direct members of a group, sorted ascending.
    pub fn members_of(&self, group: PrincipalId) -> Result<PrincipalSet> {
        let loaded = self.members_cache.get_or_load(&group, |g| {
            let members = self.store.members_of(*g)?;
            Ok(Some(PrincipalSet::new(members)))
        })?;
        Ok(loaded.unwrap_or_else(PrincipalSet::empty))
    }

    /// Direct members of a group restricted to one principal kind.
    pub fn members_of_kind(&self, group: PrincipalId, filter: MemberFilter) -> Result<PrincipalSet> {
        let members = self.members_of(group)?;
        if filter == MemberFilter::Either {
            return Ok(members);
        }
        let mut kept = Vec::new();
        for id in members.iter() {
            let kind = match self.store.principal_row(id)? {
                Some(row) => row.kind,
                None => continue,
            };
            if filter.admits(kind) {
                kept.push(id);
            }
        }
        Ok(PrincipalSet::new(kept))
    }

    /// Group identity lookup. System groups resolve from their well-known
    /// constants without touching the store.
    pub fn group(&self, id: PrincipalId) -> Result<Option<Group>> {
        if let Some(system) = Group::system(id) {
            return Ok(Some(system));
        }
        self.group_cache.get_or_load(&id, |group_id| {
            let row = self.store.principal_row(*group_id)?;
            Ok(row.filter(|r| r.kind.is_group()).map(|r| Group {
                id: r.id,
                name: r.name,
                container: r.container,
                owner: r.owner,
            }))
        })
    }

    /// Groups visible in a container, ordered case-insensitively by name.
    /// With `include_site_groups`, site-wide groups come first, mirroring the
    /// nulls-first listing order of the backing store.
    pub fn groups_in(
        &self,
        container: Option<&ContainerId>,
        include_site_groups: bool,
    ) -> Result<Vec<Group>> {
        match container {
            None => Ok(self.listing(None)?.as_ref().clone()),
            Some(c) => {
                let scoped = self.listing(Some(c.clone()))?;
                if !include_site_groups {
                    return Ok(scoped.as_ref().clone());
                }
                let mut combined = self.listing(None)?.as_ref().clone();
                combined.extend(scoped.iter().cloned());
                Ok(combined)
            }
        }
    }

    fn listing(&self, key: Option<ContainerId>) -> Result<Arc<Vec<Group>>> {
        let loaded = self.listing_cache.get_or_load(&key, |k| {
            let rows = match k {
                Some(container) => self.store.groups_in(container)?,
                None => self.store.site_groups()?,
            };
            let groups = rows
                .into_iter()
                .map(|r| Group {
                    id: r.id,
                    name: r.name,
                    container: r.container,
                    owner: r.owner,
                })
                .collect();
            Ok(Some(Arc::new(groups)))
        })?;
        Ok(loaded.unwrap_or_else(|| Arc::new(Vec::new())))
    }

    fn compute_closure(&self, principal: PrincipalId) -> Result<PrincipalSet> {
        let row = match self.store.principal_row(principal)? {
            Some(row) => row,
            // Unknown principal: no memberships, not an error.
            None => return Ok(PrincipalSet::empty()),
        };

        // Bound the walk by the total principal population; a corrupt cyclic
        // graph then terminates instead of looping.
        let bound = self
            .store
            .principal_count()?
            .saturating_add(SYSTEM_GROUP_COUNT);

        let mut result: BTreeSet<PrincipalId> = BTreeSet::new();
        let mut visited: BTreeSet<PrincipalId> = BTreeSet::new();
        let mut queue: VecDeque<PrincipalId> = VecDeque::new();

        // Seeds: the principal itself plus its implicit groups. The implicit
        // groups join the result and are expanded like any other membership.
        visited.insert(principal);
        queue.push_back(principal);
        let seed = |id: PrincipalId,
                        result: &mut BTreeSet<PrincipalId>,
                        visited: &mut BTreeSet<PrincipalId>,
                        queue: &mut VecDeque<PrincipalId>| {
            if visited.insert(id) {
                result.insert(id);
                queue.push_back(id);
            }
        };
        seed(GROUP_GUESTS, &mut result, &mut visited, &mut queue);
        if row.kind == PrincipalKind::User {
            seed(GROUP_USERS, &mut result, &mut visited, &mut queue);
        }

        while let Some(current) = queue.pop_front() {
            if result.len() > bound {
                tracing::warn!(
                    principal = %principal,
                    bound,
                    "membership closure exceeded principal count; graph may be cyclic"
                );
                break;
            }
            for group in self.store.direct_groups_of(current)? {
                if visited.insert(group) {
                    result.insert(group);
                    queue.push_back(group);
                }
            }
        }

        Ok(PrincipalSet::new(result))
    }

    /// Add a direct membership edge. The store write completes before the
    /// caches are invalidated and before this returns.
    pub fn add_member(&self, group: PrincipalId, member: PrincipalId) -> Result<()> {
        if member == group {
            return Err(AuthError::InvalidInput(
                "a group cannot be a member of itself".to_string(),
            ));
        }
        // Writes target a required row: a missing group surfaces as NotFound.
        self.group(group)?
            .ok_or_else(|| AuthError::NotFound(format!("group {group}")))?;

        self.store.insert_membership(member, group)?;
        self.invalidate_membership(group);
        self.metrics.record_membership_write();
        tracing::debug!(group = %group, member = %member, "membership added");
        Ok(())
    }

    /// Remove a direct membership edge, with the same ordering guarantee.
    pub fn remove_member(&self, group: PrincipalId, member: PrincipalId) -> Result<()> {
        self.store.delete_membership(member, group)?;
        self.invalidate_membership(group);
        self.metrics.record_membership_write();
        tracing::debug!(group = %group, member = %member, "membership removed");
        Ok(())
    }

    /// Drop cache state affected by a membership change on `group`.
    fn invalidate_membership(&self, group: PrincipalId) {
        // An edge edit changes the closure of the member and of everything
        // reachable below it, so the closure cache is cleared wholesale.
        self.closure_cache.clear();
        self.members_cache.remove(&group);
        self.metrics.record_cache_invalidation();
    }

    /// Drop all cache state for a group that was created, renamed or
    /// deleted.
    pub fn invalidate_group(&self, group: &Group) {
        self.group_cache.remove(&group.id);
        self.members_cache.remove(&group.id);
        self.closure_cache.clear();
        self.listing_cache.remove(&group.container);
        self.metrics.record_cache_invalidation();
    }

    /// Refuse edits to the reserved system groups.
    pub fn ensure_not_system(&self, id: PrincipalId) -> Result<()> {
        if is_system_group(id) {
            let name = Group::system(id).map(|g| g.name).unwrap_or_default();
            return Err(AuthError::SystemGroup(name));
        }
        Ok(())
    }

    pub fn closure_cache_stats(&self) -> CacheStatsSnapshot {
        self.closure_cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::{DirectoryWriter, MemoryDirectory, PrincipalRow};

    fn resolver_with_store() -> (MembershipResolver, Arc<MemoryDirectory>) {
        let store = Arc::new(MemoryDirectory::new());
        let resolver = MembershipResolver::new(
            store.clone(),
            &CacheConfig::default(),
            Arc::new(SecurityMetrics::new()),
        );
        (resolver, store)
    }

    fn add_user(store: &MemoryDirectory, id: i64, name: &str) -> PrincipalId {
        let id = PrincipalId(id);
        store
            .insert_user(PrincipalRow {
                id,
                name: name.to_string(),
                display_name: None,
                kind: PrincipalKind::User,
                container: None,
                owner: None,
            })
            .unwrap();
        id
    }

    #[test]
    fn test_closure_includes_nested_groups() {
        let (resolver, store) = resolver_with_store();
        let user = add_user(&store, 100, "alice");
        let inner = store.insert_group("inner", None, None).unwrap().id;
        let outer = store.insert_group("outer", None, None).unwrap().id;
        store.insert_membership(user, inner).unwrap();
        store.insert_membership(inner, outer).unwrap();

        let closure = resolver.groups_of(user).unwrap();
        assert!(closure.contains(inner));
        assert!(closure.contains(outer));
        assert!(closure.contains(GROUP_GUESTS));
        assert!(closure.contains(GROUP_USERS));
        // Sorted ascending.
        let ids: Vec<i64> = closure.iter().map(|id| id.0).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_unknown_principal_resolves_empty() {
        let (resolver, _store) = resolver_with_store();
        let closure = resolver.groups_of(PrincipalId(9999)).unwrap();
        assert!(closure.is_empty());
    }

    #[test]
    fn test_cyclic_graph_terminates() {
        let (resolver, store) = resolver_with_store();
        let a = store.insert_group("a", None, None).unwrap().id;
        let b = store.insert_group("b", None, None).unwrap().id;
        // Structurally forbidden, injected directly to simulate corruption.
        store.insert_membership(a, b).unwrap();
        store.insert_membership(b, a).unwrap();

        let closure = resolver.groups_of(a).unwrap();
        assert!(closure.contains(b));
    }

    #[test]
    fn test_is_member_matches_closure() {
        let (resolver, store) = resolver_with_store();
        let user = add_user(&store, 100, "alice");
        let group = store.insert_group("g", None, None).unwrap().id;
        store.insert_membership(user, group).unwrap();

        assert!(resolver.is_member(user, group).unwrap());
        assert!(!resolver.is_member(user, PrincipalId(12345)).unwrap());
    }

    #[test]
    fn test_write_invalidates_closure() {
        let (resolver, store) = resolver_with_store();
        let user = add_user(&store, 100, "alice");
        let group = store.insert_group("g", None, None).unwrap().id;

        assert!(!resolver.is_member(user, group).unwrap());
        resolver.add_member(group, user).unwrap();
        // Read-your-own-write: the closure reflects the edge immediately.
        assert!(resolver.is_member(user, group).unwrap());
        resolver.remove_member(group, user).unwrap();
        assert!(!resolver.is_member(user, group).unwrap());
    }

    #[test]
    fn test_self_membership_rejected() {
        let (resolver, store) = resolver_with_store();
        let group = store.insert_group("g", None, None).unwrap().id;
        assert!(matches!(
            resolver.add_member(group, group),
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_add_member_to_missing_group_is_not_found() {
        let (resolver, store) = resolver_with_store();
        let user = add_user(&store, 100, "alice");
        assert!(matches!(
            resolver.add_member(PrincipalId(555), user),
            Err(AuthError::NotFound(_))
        ));
    }

    #[test]
    fn test_group_listing_composes_site_groups() {
        let (resolver, store) = resolver_with_store();
        let container = ContainerId::from("proj-a");
        store
            .insert_group("locals", Some(container.clone()), None)
            .unwrap();
        store.insert_group("everywhere", None, None).unwrap();

        let scoped = resolver.groups_in(Some(&container), false).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].name, "locals");

        let combined = resolver.groups_in(Some(&container), true).unwrap();
        let names: Vec<&str> = combined.iter().map(|g| g.name.as_str()).collect();
        // Site groups come first.
        assert_eq!(names, vec!["everywhere", "locals"]);
    }

    #[test]
    fn test_member_filter() {
        let (resolver, store) = resolver_with_store();
        let user = add_user(&store, 100, "alice");
        let inner = store.insert_group("inner", None, None).unwrap().id;
        let outer = store.insert_group("outer", None, None).unwrap().id;
        store.insert_membership(user, outer).unwrap();
        store.insert_membership(inner, outer).unwrap();

        let users = resolver.members_of_kind(outer, MemberFilter::Users).unwrap();
        assert_eq!(users.as_slice(), &[user]);
        let groups = resolver.members_of_kind(outer, MemberFilter::Groups).unwrap();
        assert_eq!(groups.as_slice(), &[inner]);
        let either = resolver.members_of_kind(outer, MemberFilter::Either).unwrap();
        assert_eq!(either.len(), 2);
    }

    #[test]
    fn test_system_group_resolves_without_store() {
        let (resolver, _store) = resolver_with_store();
        let group = resolver.group(GROUP_GUESTS).unwrap().unwrap();
        assert_eq!(group.name, "Guests");
        assert!(resolver.ensure_not_system(GROUP_GUESTS).is_err());
        assert!(resolver.ensure_not_system(PrincipalId(10)).is_ok());
    }
}
