//! Facade over the authorization subsystem.
//!
//! `SecurityManager` wires the backing store, the membership resolver, the
//! cached policy store, the role registry, the password validator and both
//! session key stores together behind one handle. Reads answer from the
//! caches; writes hit the store first, invalidate second, and only then
//! return, so a caller always observes its own writes.

use crate::config::SecurityConfig;
use crate::elevated::EffectivePrincipal;
use crate::error::{AuthError, Result};
use crate::identity::ValidEmail;
use crate::membership::{MemberFilter, MembershipResolver};
use crate::metrics::{MetricsSnapshot, SecurityMetrics};
use crate::password::{PasswordValidator, PasswordVerdict, UserInfo};
use crate::policy::{PolicyStore, SecurityPolicy};
use crate::principal::{Group, PrincipalSet, User};
use crate::roles::RoleRegistry;
use crate::session::{api_key_store, transform_key_store, ApiKeyStore, TransformKeyStore};
use crate::store::{Directory, PrincipalRow};
use crate::types::{ContainerId, Permission, PrincipalId, PrincipalKind, ResourceId};
use std::collections::HashSet;
use std::sync::Arc;

/// Entry point for permission checks and directory writes.
pub struct SecurityManager {
    store: Arc<dyn Directory>,
    memberships: MembershipResolver,
    policies: PolicyStore,
    registry: Arc<RoleRegistry>,
    passwords: PasswordValidator,
    api_keys: ApiKeyStore,
    transform_keys: TransformKeyStore,
    metrics: Arc<SecurityMetrics>,
    config: SecurityConfig,
}

impl SecurityManager {
    pub fn new(config: SecurityConfig, store: Arc<dyn Directory>) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(SecurityMetrics::new());
        let registry = Arc::new(RoleRegistry::standard());
        let memberships =
            MembershipResolver::new(Arc::clone(&store), &config.cache, Arc::clone(&metrics));
        let policies = PolicyStore::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            &config.cache,
            Arc::clone(&metrics),
        );
        let passwords = PasswordValidator::from_config(&config.password);
        let api_keys = api_key_store(config.session.api_key_prefix.clone());
        let transform_keys = transform_key_store(config.session.transform_key_prefix.clone());
        Ok(Self {
            store,
            memberships,
            policies,
            registry,
            passwords,
            api_keys,
            transform_keys,
            metrics,
            config,
        })
    }

    // ---- reads ------------------------------------------------------------

    /// Transitive group closure of a principal, implicit groups included.
    pub fn groups_of(&self, principal: PrincipalId) -> Result<PrincipalSet> {
        self.memberships.groups_of(principal)
    }

    pub fn is_member(&self, principal: PrincipalId, group: PrincipalId) -> Result<bool> {
        self.memberships.is_member(principal, group)
    }

    pub fn group(&self, id: PrincipalId) -> Result<Option<Group>> {
        self.memberships.group(id)
    }

    pub fn groups_in(
        &self,
        container: Option<&ContainerId>,
        include_site_groups: bool,
    ) -> Result<Vec<Group>> {
        self.memberships.groups_in(container, include_site_groups)
    }

    pub fn members_of(&self, group: PrincipalId) -> Result<PrincipalSet> {
        self.memberships.members_of(group)
    }

    pub fn members_of_kind(&self, group: PrincipalId, filter: MemberFilter) -> Result<PrincipalSet> {
        self.memberships.members_of_kind(group, filter)
    }

    /// Every permission the principal holds on `resource`.
    ///
    /// Contextual roles apply first, then every policy on the inheritance
    /// chain. An unknown resource yields the empty set through the same path
    /// as a denied one, so existence never leaks from here.
    pub fn permissions_of(
        &self,
        principal: &EffectivePrincipal,
        resource: &ResourceId,
    ) -> Result<HashSet<Permission>> {
        let matching = self.matching_principals(principal)?;
        let mut granted: HashSet<Permission> = HashSet::new();
        for role in principal.contextual_roles() {
            granted.extend(role.permissions());
        }
        for policy in self.policies.effective_chain(resource)? {
            for role in policy.roles_for(&matching) {
                granted.extend(role.permissions());
            }
        }
        Ok(granted)
    }

    /// Whether the principal holds `permission` on `resource`.
    ///
    /// Short-circuits on the first grant; the outcome is identical to
    /// consulting `permissions_of`.
    pub fn has_permission(
        &self,
        principal: &EffectivePrincipal,
        resource: &ResourceId,
        permission: Permission,
    ) -> Result<bool> {
        let allowed = self.check_permission(principal, resource, permission)?;
        self.metrics.record_permission_check(allowed);
        if !allowed {
            tracing::debug!(
                principal = %principal.id(),
                resource = %resource,
                %permission,
                "permission denied"
            );
        }
        Ok(allowed)
    }

    /// `has_permission` for a plain principal id with no decoration.
    pub fn user_has_permission(
        &self,
        principal: PrincipalId,
        resource: &ResourceId,
        permission: Permission,
    ) -> Result<bool> {
        self.has_permission(&EffectivePrincipal::base(principal), resource, permission)
    }

    fn check_permission(
        &self,
        principal: &EffectivePrincipal,
        resource: &ResourceId,
        permission: Permission,
    ) -> Result<bool> {
        if principal
            .contextual_roles()
            .iter()
            .any(|role| role.grants(permission))
        {
            return Ok(true);
        }
        let matching = self.matching_principals(principal)?;
        for policy in self.policies.effective_chain(resource)? {
            if policy
                .roles_for(&matching)
                .iter()
                .any(|role| role.grants(permission))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The identities a policy assignment may match against: the principal's
    /// group closure plus its own id, or the group override verbatim. An
    /// override stands in for the whole set, so direct grants to the
    /// principal's own id are masked along with its memberships.
    fn matching_principals(&self, principal: &EffectivePrincipal) -> Result<PrincipalSet> {
        match principal.group_override() {
            Some(groups) => Ok(groups.clone()),
            None => {
                let closure = self.memberships.groups_of(principal.id())?;
                Ok(PrincipalSet::new(
                    closure.iter().chain(std::iter::once(principal.id())),
                ))
            }
        }
    }

    /// Returns `principal` unchanged when it already holds `permission` on
    /// `resource`, otherwise a copy elevated with `role_name`. The decision
    /// is made once; the caller carries the returned value for the duration
    /// of the operation.
    pub fn ensure_contextual_role(
        &self,
        principal: &EffectivePrincipal,
        resource: &ResourceId,
        permission: Permission,
        role_name: &str,
    ) -> Result<EffectivePrincipal> {
        if self.has_permission(principal, resource, permission)? {
            return Ok(principal.clone());
        }
        let role = self.registry.require(role_name)?;
        Ok(EffectivePrincipal::elevated(principal, vec![role]))
    }

    pub fn policy_for(&self, resource: &ResourceId) -> Result<Arc<SecurityPolicy>> {
        self.policies.policy_for(resource)
    }

    pub fn effective_chain(&self, resource: &ResourceId) -> Result<Vec<Arc<SecurityPolicy>>> {
        self.policies.effective_chain(resource)
    }

    // ---- writes -----------------------------------------------------------

    /// Create a user with an explicit id and a validated email address.
    pub fn create_user(
        &self,
        id: PrincipalId,
        email: &str,
        display_name: &str,
    ) -> Result<User> {
        let email = ValidEmail::parse(email)?;
        self.store.insert_user(PrincipalRow {
            id,
            name: email.as_str().to_string(),
            display_name: (!display_name.is_empty()).then(|| display_name.to_string()),
            kind: PrincipalKind::User,
            container: None,
            owner: None,
        })?;
        tracing::info!(user = %id, email = email.as_str(), "user created");
        Ok(User::new(id, email.as_str(), display_name))
    }

    /// Create a group in `container` (site-wide when `None`).
    ///
    /// Blank names and names already taken in the same scope are rejected;
    /// the comparison is case-insensitive and, at site scope, covers the
    /// built-in system groups as well. Uniqueness against stored groups is
    /// enforced by the store under its own lock, so two racing creates of
    /// the same name resolve to exactly one winner.
    pub fn create_group(
        &self,
        name: &str,
        container: Option<ContainerId>,
        owner: Option<PrincipalId>,
    ) -> Result<Group> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(AuthError::InvalidInput("group name must not be blank".into()));
        }
        let lowered = trimmed.to_lowercase();
        if container.is_none() {
            for system in Group::system_groups() {
                if system.name.to_lowercase() == lowered
                    || system.display_name().to_lowercase() == lowered
                {
                    return Err(AuthError::GroupExists(trimmed.to_string()));
                }
            }
        }
        let row = self.store.insert_group(trimmed, container, owner)?;
        let group = Group::new(row.id, row.name, row.container, row.owner);
        self.memberships.invalidate_group(&group);
        self.metrics.record_group_write();
        tracing::info!(group = %group.id, name = %group.name, "group created");
        Ok(group)
    }

    /// Delete a group and everything that references it.
    ///
    /// System groups are refused. Membership edges and role assignments
    /// naming the group are cascaded before the row itself goes; cached
    /// policies may hold stale assignments for the group, so the policy
    /// cache is cleared wholesale.
    pub fn delete_group(&self, id: PrincipalId) -> Result<()> {
        self.memberships.ensure_not_system(id)?;
        let group = self
            .memberships
            .group(id)?
            .ok_or_else(|| AuthError::NotFound(format!("group {id}")))?;

        self.store.delete_assignments_for(id)?;
        self.store.delete_memberships_of(id)?;
        self.store.delete_principal(id)?;

        self.memberships.invalidate_group(&group);
        self.policies.invalidate_all();
        self.metrics.record_group_write();
        tracing::info!(group = %id, name = %group.name, "group deleted");
        Ok(())
    }

    pub fn add_member(&self, group: PrincipalId, member: PrincipalId) -> Result<()> {
        self.memberships.add_member(group, member)
    }

    pub fn remove_member(&self, group: PrincipalId, member: PrincipalId) -> Result<()> {
        self.memberships.remove_member(group, member)
    }

    pub fn save_policy(&self, policy: &SecurityPolicy) -> Result<()> {
        self.policies.save_policy(policy)
    }

    pub fn delete_policy(&self, resource: &ResourceId) -> Result<()> {
        self.policies.delete_policy(resource)
    }

    pub fn set_resource_parent(&self, resource: ResourceId, parent: ResourceId) -> Result<()> {
        self.store.set_resource_parent(resource, parent)?;
        // The chain for the resource and its descendants changed shape.
        self.policies.invalidate_all();
        Ok(())
    }

    // ---- passwords --------------------------------------------------------

    /// Validate a candidate password for `user` against the configured rule.
    pub fn validate_password(
        &self,
        user: PrincipalId,
        password: &str,
        confirm: &str,
    ) -> Result<PasswordVerdict> {
        let row = self
            .store
            .principal_row(user)?
            .ok_or_else(|| AuthError::NotFound(format!("principal {user}")))?;
        let info = UserInfo {
            email: row.name,
            display_name: row.display_name.unwrap_or_default(),
            recent_passwords: self
                .store
                .password_history(user, self.config.password.history_depth)?,
        };
        Ok(self.passwords.validate(password, confirm, &info))
    }

    /// Record an accepted password digest in the reuse history.
    pub fn record_password(&self, user: PrincipalId, digest: String) -> Result<()> {
        self.store.record_password(user, digest)
    }

    // ---- accessors --------------------------------------------------------

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    pub fn api_keys(&self) -> &ApiKeyStore {
        &self.api_keys
    }

    pub fn transform_keys(&self) -> &TransformKeyStore {
        &self.transform_keys
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }
}
