pub mod repository;
pub mod store;

pub use repository::GitRepository;
pub use store::{MergeOutcome, ObjectStore};

use crate::errors::{Result, UnstackedError};
use std::path::Path;

/// Find the root of the Git repository containing `start_path`
pub fn find_repository_root(start_path: &Path) -> Result<std::path::PathBuf> {
    let repo = git2::Repository::discover(start_path).map_err(UnstackedError::Git)?;

    let workdir = repo
        .workdir()
        .ok_or_else(|| UnstackedError::config("Repository has no working directory (bare repo?)"))?;

    Ok(workdir.to_path_buf())
}

/// Open the repository that contains the current working directory
pub fn get_current_repository() -> Result<GitRepository> {
    let current_dir = std::env::current_dir()
        .map_err(|e| UnstackedError::config(format!("Could not get current directory: {e}")))?;

    let repo_root = find_repository_root(&current_dir)?;
    GitRepository::open(&repo_root)
}
