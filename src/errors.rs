use uuid::Uuid;

/// Unstacked error types
#[derive(Debug, thiserror::Error)]
pub enum UnstackedError {
    /// Git-related errors
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Branch management errors
    #[error("Branch error: {0}")]
    Branch(String),

    /// A loaded stack violates the parent-chain invariant
    #[error("Corrupt stack: change {change_id}: {reason}")]
    CorruptStack { change_id: String, reason: String },

    /// A three-way merge produced overlapping hunks
    #[error("Conflict in change {change_id}: {}", .paths.join(", "))]
    Conflict { change_id: Uuid, paths: Vec<String> },

    /// A ref moved underneath us since it was last observed
    #[error("Ref '{name}' changed concurrently (expected {expected}, found {actual})")]
    RefConflict {
        name: String,
        expected: String,
        actual: String,
    },

    /// The signing key or agent cannot be reached
    #[error("Signing unavailable: {reason}")]
    SigningUnavailable { reason: String },

    /// A signature was checked and is invalid
    #[error("Signature verification failed for commit {commit}")]
    VerificationFailed { commit: String },

    /// Remote branch holds history we did not write
    #[error("Branch '{branch}' has diverged from local history")]
    Diverged { branch: String },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl UnstackedError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        UnstackedError::Config(msg.into())
    }

    pub fn branch<S: Into<String>>(msg: S) -> Self {
        UnstackedError::Branch(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        UnstackedError::Validation(msg.into())
    }

    pub fn corrupt_stack<I: ToString, S: Into<String>>(change_id: I, reason: S) -> Self {
        UnstackedError::CorruptStack {
            change_id: change_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn signing_unavailable<S: Into<String>>(reason: S) -> Self {
        UnstackedError::SigningUnavailable {
            reason: reason.into(),
        }
    }

    pub fn ref_conflict(name: &str, expected: &str, actual: &str) -> Self {
        UnstackedError::RefConflict {
            name: name.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, UnstackedError>;
