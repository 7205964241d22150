//! Group membership and closure behavior through the manager.

use super::test_utils::{Fixture, ALICE, BOB, CAROL};
use crate::error::AuthError;
use crate::types::{ContainerId, PrincipalId, GROUP_ADMINISTRATORS, GROUP_GUESTS, GROUP_USERS};
use pretty_assertions::assert_eq;

#[test]
fn test_closure_includes_nested_and_implicit_groups() {
    let fx = Fixture::new();

    let groups = fx.manager.groups_of(ALICE).expect("closure");
    assert!(groups.contains(fx.editors), "direct membership");
    assert!(groups.contains(fx.staff), "transitive through editors");
    assert!(groups.contains(GROUP_GUESTS), "implicit guests");
    assert!(groups.contains(GROUP_USERS), "implicit users");

    let groups = fx.manager.groups_of(BOB).expect("closure");
    assert!(groups.contains(fx.staff));
    assert!(!groups.contains(fx.editors), "membership is not symmetric");
}

#[test]
fn test_unknown_principal_has_empty_closure() {
    let fx = Fixture::new();
    let groups = fx.manager.groups_of(PrincipalId(999)).expect("closure");
    assert!(groups.is_empty());
    assert!(!fx
        .manager
        .is_member(PrincipalId(999), fx.staff)
        .expect("is_member"));
}

#[test]
fn test_membership_edits_are_read_your_own_write() {
    let fx = Fixture::new();

    // Warm the cache.
    assert!(!fx.manager.is_member(CAROL, fx.staff).expect("cold read"));

    fx.manager.add_member(fx.staff, CAROL).expect("add");
    assert!(fx.manager.is_member(CAROL, fx.staff).expect("after add"));

    fx.manager.remove_member(fx.staff, CAROL).expect("remove");
    assert!(!fx.manager.is_member(CAROL, fx.staff).expect("after remove"));
}

#[test]
fn test_nested_edit_invalidates_distant_closures() {
    let fx = Fixture::new();

    // Alice reaches staff only through editors; warm her closure first.
    assert!(fx.manager.is_member(ALICE, fx.staff).expect("warm"));

    fx.manager
        .remove_member(fx.staff, fx.editors)
        .expect("unnest editors");
    assert!(
        !fx.manager.is_member(ALICE, fx.staff).expect("reread"),
        "removing the group edge must drop every closure built through it"
    );
    assert!(fx.manager.is_member(ALICE, fx.editors).expect("direct"));
}

#[test]
fn test_duplicate_group_name_rejected_case_insensitively() {
    let fx = Fixture::new();

    let err = fx
        .manager
        .create_group("STAFF", None, None)
        .expect_err("duplicate site group");
    assert!(matches!(err, AuthError::GroupExists(_)));

    let err = fx
        .manager
        .create_group("Editors", Some(fx.project.clone()), None)
        .expect_err("duplicate in project");
    assert!(matches!(err, AuthError::GroupExists(_)));

    // Same name in a different container is fine.
    fx.manager
        .create_group("editors", Some(ContainerId("project-b".to_string())), None)
        .expect("distinct scope");
}

#[test]
fn test_blank_group_name_rejected() {
    let fx = Fixture::new();
    let err = fx
        .manager
        .create_group("   ", None, None)
        .expect_err("blank name");
    assert!(matches!(err, AuthError::InvalidInput(_)));
}

#[test]
fn test_system_group_cannot_be_deleted_or_shadowed() {
    let fx = Fixture::new();

    let err = fx
        .manager
        .delete_group(GROUP_ADMINISTRATORS)
        .expect_err("system delete");
    assert!(matches!(err, AuthError::SystemGroup(_)));

    let err = fx
        .manager
        .create_group("Administrators", None, None)
        .expect_err("shadow system name");
    assert!(matches!(err, AuthError::GroupExists(_)));
}

#[test]
fn test_delete_group_cascades_memberships() {
    let fx = Fixture::new();

    assert!(fx.manager.is_member(ALICE, fx.editors).expect("before"));
    fx.manager.delete_group(fx.editors).expect("delete");

    assert!(fx.manager.group(fx.editors).expect("lookup").is_none());
    assert!(!fx.manager.is_member(ALICE, fx.editors).expect("after"));
    assert!(
        !fx.manager.is_member(ALICE, fx.staff).expect("transitive"),
        "the path through the deleted group is gone"
    );
}

#[test]
fn test_group_listing_orders_site_groups_first() {
    let fx = Fixture::new();

    let listed = fx
        .manager
        .groups_in(Some(&fx.project), true)
        .expect("listing");
    let names: Vec<&str> = listed.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["staff", "editors"]);

    let scoped = fx
        .manager
        .groups_in(Some(&fx.project), false)
        .expect("scoped listing");
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].name, "editors");
}

#[test]
fn test_new_group_appears_in_listing_immediately() {
    let fx = Fixture::new();

    // Warm the listing cache.
    fx.manager
        .groups_in(Some(&fx.project), false)
        .expect("warm");

    fx.manager
        .create_group("authors", Some(fx.project.clone()), None)
        .expect("create");
    let names: Vec<String> = fx
        .manager
        .groups_in(Some(&fx.project), false)
        .expect("reread")
        .into_iter()
        .map(|g| g.name)
        .collect();
    assert_eq!(names, vec!["authors".to_string(), "editors".to_string()]);
}
