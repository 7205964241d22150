//! Cached read paths under concurrent load.
//!
//! The single-flight behavior of the caches themselves is covered in
//! `cache.rs`; these tests drive whole-manager scenarios across threads and
//! assert that readers only ever observe consistent before/after states.

use super::test_utils::{Fixture, ALICE, CAROL};
use crate::roles::names;
use crate::session::SessionId;
use crate::types::{ContainerId, Permission};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_parallel_cold_reads_agree() {
    let fx = Arc::new(Fixture::new());
    let r = Fixture::resource("r1");
    fx.grant(&r, fx.staff, names::EDITOR);

    let barrier = Arc::new(Barrier::new(16));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let fx = Arc::clone(&fx);
            let r = r.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                fx.manager
                    .user_has_permission(ALICE, &r, Permission::Update)
                    .expect("check")
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().expect("no panic"));
    }
}

#[test]
fn test_writer_and_readers_interleave_safely() {
    let fx = Arc::new(Fixture::new());
    let r = Fixture::resource("r1");
    fx.grant(&r, fx.staff, names::READER);

    let barrier = Arc::new(Barrier::new(9));
    let readers: Vec<_> = (0..8)
        .map(|_| {
            let fx = Arc::clone(&fx);
            let r = r.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    // Either outcome is valid while the write races; what
                    // must hold is that the check never errors.
                    fx.manager
                        .user_has_permission(CAROL, &r, Permission::Read)
                        .expect("check");
                }
            })
        })
        .collect();

    let writer = {
        let fx = Arc::clone(&fx);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            fx.manager.add_member(fx.staff, CAROL).expect("add");
        })
    };

    writer.join().expect("writer");
    for reader in readers {
        reader.join().expect("reader");
    }

    // The write invalidated the closure caches, detaching any load still in
    // flight, so every read from here on sees the new membership.
    assert!(fx
        .manager
        .user_has_permission(CAROL, &r, Permission::Read)
        .expect("final"));
}

#[test]
fn test_concurrent_group_creation_with_distinct_names() {
    let fx = Arc::new(Fixture::new());
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let fx = Arc::clone(&fx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                fx.manager
                    .create_group(
                        &format!("team-{i}"),
                        Some(ContainerId("project-b".to_string())),
                        None,
                    )
                    .expect("create")
                    .id
            })
        })
        .collect();

    let mut ids: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("no panic"))
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8, "every creation got a distinct id");

    // Each create invalidated the listing cache, detaching any load still
    // in flight, so the listing now reflects every insert.
    let container = ContainerId("project-b".to_string());
    let listed = fx
        .manager
        .groups_in(Some(&container), false)
        .expect("listing");
    assert_eq!(listed.len(), 8);
}

#[test]
fn test_racing_same_name_creates_have_one_winner() {
    let fx = Arc::new(Fixture::new());
    let container = ContainerId("project-b".to_string());
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let fx = Arc::clone(&fx);
            let container = container.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                fx.manager.create_group("ops", Some(container), None)
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("no panic"))
        .collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one create may claim the name");
    for result in results {
        if let Err(err) = result {
            assert!(matches!(err, crate::error::AuthError::GroupExists(_)));
        }
    }

    let listed = fx
        .manager
        .groups_in(Some(&container), false)
        .expect("listing");
    assert_eq!(listed.iter().filter(|g| g.name == "ops").count(), 1);
}

#[test]
fn test_concurrent_api_key_issue_and_resolve() {
    let fx = Arc::new(Fixture::new());
    let session = SessionId::from("shared");
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let fx = Arc::clone(&fx);
            let session = session.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let key = fx.manager.api_keys().issue(&session, session.clone());
                assert_eq!(fx.manager.api_keys().resolve(&key), Some(session.clone()));
                key
            })
        })
        .collect();

    let keys: Vec<String> = handles
        .into_iter()
        .map(|h| h.join().expect("no panic"))
        .collect();
    assert_eq!(fx.manager.api_keys().keys_for(&session), 8);

    fx.manager.api_keys().on_session_end(&session);
    for key in keys {
        assert_eq!(fx.manager.api_keys().resolve(&key), None);
    }
}
