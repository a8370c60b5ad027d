#![allow(dead_code)]

use git2::{Oid, Repository, Signature};
use std::path::Path;
use tempfile::TempDir;
use unstacked::config::Settings;
use unstacked::errors::{Result, UnstackedError};
use unstacked::git::GitRepository;
use unstacked::sign::Signer;
use unstacked::stack::StackManager;

/// Deterministic signer for tests; no GPG agent involved. The signature
/// encodes the payload length so verification genuinely checks that the
/// signature covers the stored payload.
pub struct StubSigner;

impl Signer for StubSigner {
    fn sign(&self, payload: &str, _key_id: Option<&str>) -> Result<String> {
        Ok(format!(
            "-----BEGIN STUB SIGNATURE-----\nlen={}\n-----END STUB SIGNATURE-----",
            payload.len()
        ))
    }

    fn verify(&self, payload: &str, signature: &str, _key_id: Option<&str>) -> Result<bool> {
        Ok(signature.contains(&format!("len={}", payload.len())))
    }
}

/// Signer whose key/agent is unreachable
pub struct UnavailableSigner;

impl Signer for UnavailableSigner {
    fn sign(&self, _payload: &str, _key_id: Option<&str>) -> Result<String> {
        Err(UnstackedError::signing_unavailable("agent not running"))
    }

    fn verify(&self, _payload: &str, _signature: &str, _key_id: Option<&str>) -> Result<bool> {
        Err(UnstackedError::signing_unavailable("agent not running"))
    }
}

fn test_signature() -> Signature<'static> {
    Signature::now("Test User", "test@example.com").unwrap()
}

/// Initialize a repository with an initial commit on `main` containing
/// the given files.
pub fn init_repo_with(files: &[(&str, &str)]) -> (TempDir, GitRepository) {
    let tmp = TempDir::new().unwrap();
    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(tmp.path(), &opts).unwrap();

    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test User").unwrap();
    config.set_str("user.email", "test@example.com").unwrap();

    for (name, content) in files {
        std::fs::write(tmp.path().join(name), content).unwrap();
    }

    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = test_signature();
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .unwrap();

    drop(tree);
    drop(repo);

    let git_repo = GitRepository::open(tmp.path()).unwrap();
    (tmp, git_repo)
}

pub fn init_repo() -> (TempDir, GitRepository) {
    init_repo_with(&[("base.txt", "base\n")])
}

pub fn open_manager(path: &Path) -> StackManager {
    let git_repo = GitRepository::open(path).unwrap();
    StackManager::new(git_repo, Settings::default()).unwrap()
}

/// Commit directly onto a branch without touching HEAD or the work tree
pub fn commit_on_branch(
    repo_path: &Path,
    branch: &str,
    files: &[(&str, &str)],
    message: &str,
) -> Oid {
    let repo = Repository::open(repo_path).unwrap();
    let ref_name = format!("refs/heads/{branch}");
    let parent = repo
        .find_reference(&ref_name)
        .unwrap()
        .peel_to_commit()
        .unwrap();

    let parent_tree = parent.tree().unwrap();
    let mut builder = repo.treebuilder(Some(&parent_tree)).unwrap();
    for (name, content) in files {
        let blob = repo.blob(content.as_bytes()).unwrap();
        builder.insert(name, blob, 0o100644).unwrap();
    }
    let tree = repo.find_tree(builder.write().unwrap()).unwrap();

    let sig = test_signature();
    repo.commit(Some(&ref_name), &sig, &sig, message, &tree, &[&parent])
        .unwrap()
}

/// Force-checkout a branch (work tree, index, HEAD)
pub fn checkout_branch(repo_path: &Path, branch: &str) {
    let repo = Repository::open(repo_path).unwrap();
    let ref_name = format!("refs/heads/{branch}");
    let obj = repo.revparse_single(&ref_name).unwrap();

    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force();
    repo.checkout_tree(&obj, Some(&mut checkout)).unwrap();
    repo.set_head(&ref_name).unwrap();
}

pub fn write_file(repo_path: &Path, name: &str, content: &str) {
    std::fs::write(repo_path.join(name), content).unwrap();
}

pub fn branch_oid(repo_path: &Path, branch: &str) -> Oid {
    let repo = Repository::open(repo_path).unwrap();
    repo.find_reference(&format!("refs/heads/{branch}"))
        .unwrap()
        .peel_to_commit()
        .unwrap()
        .id()
}

pub fn commit_parent(repo_path: &Path, oid: Oid) -> Oid {
    let repo = Repository::open(repo_path).unwrap();
    repo.find_commit(oid).unwrap().parent_id(0).unwrap()
}
