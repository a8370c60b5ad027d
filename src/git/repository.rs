use crate::errors::{Result, UnstackedError};
use crate::git::store::ObjectStore;
use git2::{Oid, Repository, Signature};
use std::path::{Path, PathBuf};

/// Wrapper around git2::Repository with safe operations
pub struct GitRepository {
    repo: Repository,
    path: PathBuf,
}

impl GitRepository {
    /// Open a Git repository at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .map_err(|e| UnstackedError::config(format!("Not a git repository: {e}")))?;

        let workdir = repo
            .workdir()
            .ok_or_else(|| UnstackedError::config("Repository has no working directory"))?
            .to_path_buf();

        Ok(Self {
            repo,
            path: workdir,
        })
    }

    /// Get repository working directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the per-repository git directory (where tool state lives)
    pub fn git_dir(&self) -> PathBuf {
        self.repo.path().to_path_buf()
    }

    /// Borrow the object store view of this repository
    pub fn object_store(&self) -> ObjectStore<'_> {
        ObjectStore::new(&self.repo)
    }

    /// Access the underlying libgit2 handle
    pub fn inner(&self) -> &Repository {
        &self.repo
    }

    /// Get the current branch name
    pub fn get_current_branch(&self) -> Result<String> {
        let head = self
            .repo
            .head()
            .map_err(|e| UnstackedError::branch(format!("Could not get HEAD: {e}")))?;

        if let Some(name) = head.shorthand() {
            Ok(name.to_string())
        } else {
            let commit = head
                .peel_to_commit()
                .map_err(|e| UnstackedError::branch(format!("Could not get HEAD commit: {e}")))?;
            Ok(format!("HEAD@{}", commit.id()))
        }
    }

    /// Get the HEAD commit id
    pub fn head_commit_id(&self) -> Result<Oid> {
        let head = self
            .repo
            .head()
            .map_err(|e| UnstackedError::branch(format!("Could not get HEAD: {e}")))?;
        let commit = head
            .peel_to_commit()
            .map_err(|e| UnstackedError::branch(format!("Could not get HEAD commit: {e}")))?;
        Ok(commit.id())
    }

    /// Resolve an arbitrary committish (branch name, hash, HEAD~2, ...) to a commit id
    pub fn resolve_committish(&self, spec: &str) -> Result<Oid> {
        let obj = self
            .repo
            .revparse_single(spec)
            .map_err(|e| UnstackedError::branch(format!("Could not resolve '{spec}': {e}")))?;
        let commit = obj
            .peel_to_commit()
            .map_err(|e| UnstackedError::branch(format!("'{spec}' is not a commit: {e}")))?;
        Ok(commit.id())
    }

    /// Check if the working directory has uncommitted changes
    pub fn is_dirty(&self) -> Result<bool> {
        let statuses = self.repo.statuses(None).map_err(UnstackedError::Git)?;

        for status in statuses.iter() {
            let flags = status.status();
            if flags.intersects(
                git2::Status::INDEX_MODIFIED
                    | git2::Status::INDEX_NEW
                    | git2::Status::INDEX_DELETED
                    | git2::Status::WT_MODIFIED
                    | git2::Status::WT_NEW
                    | git2::Status::WT_DELETED,
            ) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Get a signature for new commits from the repository config
    pub fn signature(&self) -> Result<Signature<'static>> {
        if let Ok(config) = self.repo.config() {
            if let (Ok(name), Ok(email)) = (
                config.get_string("user.name"),
                config.get_string("user.email"),
            ) {
                return Signature::now(&name, &email).map_err(UnstackedError::Git);
            }
        }

        Err(UnstackedError::config(
            "No git signature configured. Set user.name and user.email.",
        ))
    }

    /// Capture the tree to commit: the index if anything is staged (or
    /// `use_index` forces it), otherwise the working directory applied on
    /// top of the index.
    pub fn capture_tree(&self, use_index: bool) -> Result<Oid> {
        let head = self
            .repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| UnstackedError::branch(format!("Could not get HEAD commit: {e}")))?;

        let mut index = self.repo.index().map_err(UnstackedError::Git)?;
        let index_tree_id = index.write_tree_to(&self.repo).map_err(UnstackedError::Git)?;

        if index_tree_id == head.tree_id() && !use_index {
            // Nothing staged; take the working directory
            let index_tree = self
                .repo
                .find_tree(index_tree_id)
                .map_err(UnstackedError::Git)?;
            let mut diff_opts = git2::DiffOptions::new();
            diff_opts.include_untracked(true).recurse_untracked_dirs(true);
            let diff = self
                .repo
                .diff_tree_to_workdir(Some(&index_tree), Some(&mut diff_opts))
                .map_err(UnstackedError::Git)?;
            let mut applied = self
                .repo
                .apply_to_tree(&index_tree, &diff, None)
                .map_err(UnstackedError::Git)?;

            if applied.has_conflicts() {
                return Err(UnstackedError::validation(
                    "Could not capture working directory changes due to a conflict",
                ));
            }

            applied.write_tree_to(&self.repo).map_err(UnstackedError::Git)
        } else {
            Ok(index_tree_id)
        }
    }
}
