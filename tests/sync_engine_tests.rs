//! End-to-end synchronization passes against real repositories:
//! identifier stability, idempotence, conflict halting, durable prefixes,
//! resume, and the signing invariant.

mod common;

use common::{StubSigner, UnavailableSigner};
use unstacked::errors::UnstackedError;
use unstacked::stack::ChangeState;

/// Build the three-change stack A -> B -> C used by most tests
fn stack_abc(repo_path: &std::path::Path) -> unstacked::stack::StackManager {
    let mut manager = common::open_manager(repo_path);
    manager.create_stack("feature", None).unwrap();

    common::write_file(repo_path, "a.txt", "a content\n");
    manager
        .new_change(&StubSigner, "Change A", None, false)
        .unwrap();

    common::write_file(repo_path, "b.txt", "line1 changed by b\n");
    manager
        .new_change(&StubSigner, "Change B", None, false)
        .unwrap();

    common::write_file(repo_path, "c.txt", "c content\n");
    manager
        .new_change(&StubSigner, "Change C", None, false)
        .unwrap();

    manager
}

#[test]
fn clean_upstream_move_rewrites_whole_stack() {
    let (tmp, _repo) = common::init_repo();
    let mut manager = stack_abc(tmp.path());

    let ids_before: Vec<_> = manager
        .load_validated("feature")
        .unwrap()
        .changes
        .iter()
        .map(|c| c.id)
        .collect();

    let new_base = common::commit_on_branch(
        tmp.path(),
        "main",
        &[("upstream.txt", "upstream\n")],
        "Upstream change",
    );

    let result = manager.sync(&StubSigner, None).unwrap();
    assert!(result.success);
    assert_eq!(result.rewritten_count(), 3);

    // Identifier stability: reload from refs, same ids in the same order
    let reloaded = common::open_manager(tmp.path());
    let stack = reloaded.load_validated("feature").unwrap();
    let ids_after: Vec<_> = stack.changes.iter().map(|c| c.id).collect();
    assert_eq!(ids_before, ids_after);

    // The chain is contiguous from the new base
    assert_eq!(stack.base_hash, new_base.to_string());
    let bottom = git2::Oid::from_str(&stack.changes[0].commit_hash).unwrap();
    assert_eq!(common::commit_parent(tmp.path(), bottom), new_base);

    // Every rewritten commit carries a verifiable signature
    assert_eq!(reloaded.verify(&StubSigner).unwrap(), 3);
}

#[test]
fn second_sync_is_a_no_op() {
    let (tmp, _repo) = common::init_repo();
    let mut manager = stack_abc(tmp.path());

    common::commit_on_branch(
        tmp.path(),
        "main",
        &[("upstream.txt", "upstream\n")],
        "Upstream change",
    );

    let first = manager.sync(&StubSigner, None).unwrap();
    assert!(first.success);

    let hashes_after_first: Vec<_> = manager
        .load_validated("feature")
        .unwrap()
        .changes
        .iter()
        .map(|c| c.commit_hash.clone())
        .collect();

    let second = manager.sync(&StubSigner, None).unwrap();
    assert!(second.success);
    assert_eq!(second.rewritten_count(), 0);
    assert_eq!(second.unchanged_count(), 3);

    let hashes_after_second: Vec<_> = manager
        .load_validated("feature")
        .unwrap()
        .changes
        .iter()
        .map(|c| c.commit_hash.clone())
        .collect();
    assert_eq!(hashes_after_first, hashes_after_second);
}

#[test]
fn conflict_halts_after_durable_prefix() {
    // b.txt exists in the initial commit so B's edit genuinely overlaps
    // the upstream edit to the same line.
    let (tmp, _repo) = common::init_repo_with(&[("base.txt", "base\n"), ("b.txt", "line1\n")]);
    let mut manager = stack_abc(tmp.path());

    let before: Vec<_> = manager
        .load_validated("feature")
        .unwrap()
        .changes
        .iter()
        .map(|c| (c.branch.clone(), c.commit_hash.clone()))
        .collect();

    let new_base = common::commit_on_branch(
        tmp.path(),
        "main",
        &[("b.txt", "line1 changed upstream\n")],
        "Upstream overlapping change",
    );

    let result = manager.sync(&StubSigner, None).unwrap();
    assert!(!result.success);

    assert!(matches!(
        result.outcomes[0].state,
        ChangeState::Rewritten { .. }
    ));
    match &result.outcomes[1].state {
        ChangeState::Conflicted { paths } => assert_eq!(paths, &vec!["b.txt".to_string()]),
        other => panic!("expected B conflicted, got {other:?}"),
    }
    assert_eq!(result.outcomes[2].state, ChangeState::Skipped);

    // A's ref moved and is durable; B's and C's refs are untouched
    let a_oid = common::branch_oid(tmp.path(), &before[0].0);
    assert_ne!(a_oid.to_string(), before[0].1);
    assert_eq!(common::commit_parent(tmp.path(), a_oid), new_base);
    assert_eq!(
        common::branch_oid(tmp.path(), &before[1].0).to_string(),
        before[1].1
    );
    assert_eq!(
        common::branch_oid(tmp.path(), &before[2].0).to_string(),
        before[2].1
    );

    // The interrupted pass is visible and the stack still loads
    assert!(manager.sync_in_progress("feature"));
    assert!(manager.load_validated("feature").is_ok());
}

#[test]
fn conflicted_pass_resumes_after_resolution() {
    let (tmp, _repo) = common::init_repo_with(&[("base.txt", "base\n"), ("b.txt", "line1\n")]);
    let mut manager = stack_abc(tmp.path());

    let ids_before: Vec<_> = manager
        .load_validated("feature")
        .unwrap()
        .changes
        .iter()
        .map(|c| c.id)
        .collect();

    let new_base = common::commit_on_branch(
        tmp.path(),
        "main",
        &[("b.txt", "line1 changed upstream\n")],
        "Upstream overlapping change",
    );

    let halted = manager.sync(&StubSigner, None).unwrap();
    assert!(!halted.success);

    // Build the resolution on top of the rewritten parent of B
    let a_branch = halted.outcomes[0].branch.clone();
    common::checkout_branch(tmp.path(), &a_branch);
    common::write_file(
        tmp.path(),
        "b.txt",
        "line1 changed upstream\nline1 changed by b\n",
    );

    let resumed = manager.sync_continue(&StubSigner).unwrap();
    assert!(resumed.success);

    // Only the suffix was written: A untouched, B resolved, C rebased
    assert_eq!(resumed.outcomes[0].state, ChangeState::Unchanged);
    assert_eq!(resumed.outcomes[1].state, ChangeState::Unchanged);
    assert!(matches!(
        resumed.outcomes[2].state,
        ChangeState::Rewritten { .. }
    ));

    assert!(!manager.sync_in_progress("feature"));

    let stack = manager.load_validated("feature").unwrap();
    let ids_after: Vec<_> = stack.changes.iter().map(|c| c.id).collect();
    assert_eq!(ids_before, ids_after);
    assert_eq!(stack.base_hash, new_base.to_string());

    // Chain is contiguous again and fully signed
    let bottom = git2::Oid::from_str(&stack.changes[0].commit_hash).unwrap();
    assert_eq!(common::commit_parent(tmp.path(), bottom), new_base);
    assert_eq!(manager.verify(&StubSigner).unwrap(), 3);
}

#[test]
fn signing_failure_halts_without_writing() {
    let (tmp, _repo) = common::init_repo();
    let mut manager = stack_abc(tmp.path());

    let before: Vec<_> = manager
        .load_validated("feature")
        .unwrap()
        .changes
        .iter()
        .map(|c| (c.branch.clone(), c.commit_hash.clone()))
        .collect();

    common::commit_on_branch(
        tmp.path(),
        "main",
        &[("upstream.txt", "upstream\n")],
        "Upstream change",
    );

    let err = manager.sync(&UnavailableSigner, None).unwrap_err();
    assert!(matches!(err, UnstackedError::SigningUnavailable { .. }));

    // No unsigned commit was persisted, no ref moved
    for (branch, hash) in &before {
        assert_eq!(common::branch_oid(tmp.path(), branch).to_string(), *hash);
    }

    // The pass succeeds once signing is available again
    let result = manager.sync(&StubSigner, None).unwrap();
    assert!(result.success);
    assert_eq!(result.rewritten_count(), 3);
}

#[test]
fn ref_moved_after_load_fails_with_ref_conflict() {
    let (tmp, _repo) = common::init_repo();
    let manager = stack_abc(tmp.path());

    let target = common::commit_on_branch(
        tmp.path(),
        "main",
        &[("upstream.txt", "upstream\n")],
        "Upstream change",
    );

    // Load the stack, then another process moves A's branch
    let mut stack = manager.load_validated("feature").unwrap();
    let a_branch = stack.changes[0].branch.clone();
    let external = common::commit_on_branch(
        tmp.path(),
        &a_branch,
        &[("external.txt", "x\n")],
        "External commit",
    );

    let git_repo = unstacked::git::GitRepository::open(tmp.path()).unwrap();
    let engine = unstacked::stack::SyncEngine::new(git_repo.object_store(), &StubSigner, None);
    let err = engine.synchronize(&mut stack, target).unwrap_err();
    assert!(matches!(err, UnstackedError::RefConflict { .. }));

    // The ref stays at the externally-set value
    assert_eq!(common::branch_oid(tmp.path(), &a_branch), external);
}

#[test]
fn sync_refuses_dirty_worktree() {
    let (tmp, _repo) = common::init_repo();
    let mut manager = stack_abc(tmp.path());

    common::write_file(tmp.path(), "uncommitted.txt", "wip\n");
    let err = manager.sync(&StubSigner, None).unwrap_err();
    assert!(matches!(err, UnstackedError::Validation(_)));

    std::fs::remove_file(tmp.path().join("uncommitted.txt")).unwrap();
    assert!(manager.sync(&StubSigner, None).unwrap().success);
}

#[test]
fn explicit_onto_target_wins() {
    let (tmp, _repo) = common::init_repo();
    let mut manager = stack_abc(tmp.path());

    let target = common::commit_on_branch(
        tmp.path(),
        "main",
        &[("upstream.txt", "v1\n")],
        "First upstream change",
    );
    common::commit_on_branch(
        tmp.path(),
        "main",
        &[("upstream.txt", "v2\n")],
        "Second upstream change",
    );

    let result = manager
        .sync(&StubSigner, Some(&target.to_string()))
        .unwrap();
    assert!(result.success);

    let stack = manager.load_validated("feature").unwrap();
    assert_eq!(stack.base_hash, target.to_string());
}
