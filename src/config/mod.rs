pub mod settings;

pub use settings::{GitSettings, Settings, SigningSettings, SyncSettings};

use crate::errors::{Result, UnstackedError};
use crate::git::GitRepository;
use std::path::PathBuf;

const CONFIG_FILE: &str = "config.json";

/// Per-repository state directory, inside the git dir so it never shows
/// up in the working tree.
pub fn repo_state_dir(git_repo: &GitRepository) -> PathBuf {
    git_repo.git_dir().join("unstacked")
}

fn repo_config_path(git_repo: &GitRepository) -> PathBuf {
    repo_state_dir(git_repo).join(CONFIG_FILE)
}

/// User-level fallback config (~/.config/unstacked/config.json)
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("unstacked").join(CONFIG_FILE))
}

/// Check if a repository has been initialized
pub fn is_repo_initialized(git_repo: &GitRepository) -> bool {
    repo_config_path(git_repo).exists()
}

/// Load settings: the repository file wins, then the user file, then
/// built-in defaults.
pub fn load_settings(git_repo: &GitRepository) -> Result<Settings> {
    let repo_path = repo_config_path(git_repo);
    if repo_path.exists() {
        let settings = Settings::load_from_file(&repo_path)?;
        settings.validate()?;
        return Ok(settings);
    }

    if let Some(user_path) = user_config_path() {
        if user_path.exists() {
            let settings = Settings::load_from_file(&user_path)?;
            settings.validate()?;
            return Ok(settings);
        }
    }

    Ok(Settings::default())
}

/// Save settings to the repository config file
pub fn save_settings(git_repo: &GitRepository, settings: &Settings) -> Result<()> {
    settings.validate()?;
    settings.save_to_file(&repo_config_path(git_repo))
}

/// Initialize a repository: write the default (or user-derived) config
pub fn initialize_repo(git_repo: &GitRepository, force: bool) -> Result<Settings> {
    if is_repo_initialized(git_repo) && !force {
        return Err(UnstackedError::config(
            "Repository is already initialized (use --force to reinitialize)",
        ));
    }

    let settings = load_settings(git_repo)?;
    save_settings(git_repo, &settings)?;

    tracing::info!(
        "Initialized unstacked repository at {}",
        git_repo.path().display()
    );
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, GitRepository) {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let tree_id = {
            let mut index = repo.index().unwrap();
            index.write_tree().unwrap()
        };
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
        drop(tree);
        drop(repo);
        let git_repo = GitRepository::open(tmp.path()).unwrap();
        (tmp, git_repo)
    }

    #[test]
    fn test_initialize_and_reload() {
        let (_tmp, git_repo) = init_repo();
        assert!(!is_repo_initialized(&git_repo));

        initialize_repo(&git_repo, false).unwrap();
        assert!(is_repo_initialized(&git_repo));

        // Second init without force fails
        assert!(initialize_repo(&git_repo, false).is_err());
        assert!(initialize_repo(&git_repo, true).is_ok());

        let settings = load_settings(&git_repo).unwrap();
        assert_eq!(settings.git.remote, "origin");
    }

    #[test]
    fn test_saved_settings_win() {
        let (_tmp, git_repo) = init_repo();
        let mut settings = initialize_repo(&git_repo, false).unwrap();
        settings.git.upstream_branch = "trunk".to_string();
        save_settings(&git_repo, &settings).unwrap();

        let loaded = load_settings(&git_repo).unwrap();
        assert_eq!(loaded.git.upstream_branch, "trunk");
    }
}
