use crate::errors::{Result, UnstackedError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub git: GitSettings,
    pub signing: SigningSettings,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// Remote the stacks are reconciled against
    pub remote: String,
    /// Default upstream branch new stacks are based on
    pub upstream_branch: String,
    /// Namespace segment for change branches (refs/heads/<namespace>/...)
    pub branch_namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningSettings {
    /// OpenPGP key identifier; the gpg default key when unset
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Upper bound on changes per stack
    pub max_stack_size: usize,
    /// Whether push may delete landed branches on the remote
    pub delete_landed_on_push: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            git: GitSettings::default(),
            signing: SigningSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            upstream_branch: "main".to_string(),
            branch_namespace: "unstacked".to_string(),
        }
    }
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self { key_id: None }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_stack_size: 20,
            delete_landed_on_push: true,
        }
    }
}

impl Settings {
    /// Load settings from a file, falling back to defaults when missing
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| UnstackedError::config(format!("Failed to read config file: {e}")))?;

        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| UnstackedError::config(format!("Failed to parse config file: {e}")))?;

        Ok(settings)
    }

    /// Save settings to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| UnstackedError::config(format!("Failed to serialize config: {e}")))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                UnstackedError::config(format!("Failed to create config directory: {e}"))
            })?;
        }

        fs::write(path, content)
            .map_err(|e| UnstackedError::config(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Update a configuration value by dotted key
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.len() != 2 {
            return Err(UnstackedError::config(format!(
                "Invalid config key format: {key}"
            )));
        }

        match (parts[0], parts[1]) {
            ("git", "remote") => self.git.remote = value.to_string(),
            ("git", "upstream_branch") => self.git.upstream_branch = value.to_string(),
            ("git", "branch_namespace") => self.git.branch_namespace = value.to_string(),
            ("signing", "key_id") => {
                self.signing.key_id = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            ("sync", "max_stack_size") => {
                self.sync.max_stack_size = value
                    .parse()
                    .map_err(|_| UnstackedError::config(format!("Invalid number: {value}")))?;
            }
            ("sync", "delete_landed_on_push") => {
                self.sync.delete_landed_on_push = value
                    .parse()
                    .map_err(|_| UnstackedError::config(format!("Invalid boolean value: {value}")))?;
            }
            _ => return Err(UnstackedError::config(format!("Unknown config key: {key}"))),
        }

        Ok(())
    }

    /// Get a configuration value by dotted key
    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.len() != 2 {
            return Err(UnstackedError::config(format!(
                "Invalid config key format: {key}"
            )));
        }

        let value = match (parts[0], parts[1]) {
            ("git", "remote") => self.git.remote.clone(),
            ("git", "upstream_branch") => self.git.upstream_branch.clone(),
            ("git", "branch_namespace") => self.git.branch_namespace.clone(),
            ("signing", "key_id") => self.signing.key_id.clone().unwrap_or_default(),
            ("sync", "max_stack_size") => self.sync.max_stack_size.to_string(),
            ("sync", "delete_landed_on_push") => self.sync.delete_landed_on_push.to_string(),
            _ => return Err(UnstackedError::config(format!("Unknown config key: {key}"))),
        };

        Ok(value)
    }

    /// All keys and current values, for `config list`
    pub fn list_values(&self) -> Vec<(String, String)> {
        [
            "git.remote",
            "git.upstream_branch",
            "git.branch_namespace",
            "signing.key_id",
            "sync.max_stack_size",
            "sync.delete_landed_on_push",
        ]
        .iter()
        .map(|key| (key.to_string(), self.get_value(key).unwrap_or_default()))
        .collect()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.git.remote.is_empty() {
            return Err(UnstackedError::config("git.remote must not be empty"));
        }
        if self.git.upstream_branch.is_empty() {
            return Err(UnstackedError::config("git.upstream_branch must not be empty"));
        }
        if self.git.branch_namespace.is_empty() || self.git.branch_namespace.contains('/') {
            return Err(UnstackedError::config(
                "git.branch_namespace must be a single path segment",
            ));
        }
        if self.sync.max_stack_size == 0 {
            return Err(UnstackedError::config("sync.max_stack_size must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.git.remote, "origin");
        assert_eq!(settings.git.branch_namespace, "unstacked");
    }

    #[test]
    fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");

        let mut settings = Settings::default();
        settings.set_value("signing.key_id", "ABCD1234").unwrap();
        settings.set_value("git.upstream_branch", "develop").unwrap();
        settings.save_to_file(&path).unwrap();

        let loaded = Settings::load_from_file(&path).unwrap();
        assert_eq!(loaded.signing.key_id.as_deref(), Some("ABCD1234"));
        assert_eq!(loaded.git.upstream_branch, "develop");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let loaded = Settings::load_from_file(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(loaded.git.remote, "origin");
    }

    #[test]
    fn test_get_set_unknown_keys() {
        let mut settings = Settings::default();
        assert!(settings.set_value("nope.key", "x").is_err());
        assert!(settings.get_value("git").is_err());
        assert!(settings.get_value("git.nope").is_err());

        settings.set_value("sync.max_stack_size", "5").unwrap();
        assert_eq!(settings.get_value("sync.max_stack_size").unwrap(), "5");
        assert!(settings.set_value("sync.max_stack_size", "lots").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_namespace() {
        let mut settings = Settings::default();
        settings.git.branch_namespace = "a/b".to_string();
        assert!(settings.validate().is_err());
    }
}
