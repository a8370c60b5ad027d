pub mod amend;
pub mod cleanup;
pub mod completions;
pub mod config;
pub mod init;
pub mod land;
pub mod new;
pub mod push;
pub mod remove;
pub mod reorder;
pub mod stack;
pub mod status;
pub mod sync;
pub mod verify;

use crate::cli::output::Output;
use crate::errors::{Result, UnstackedError};
use crate::stack::{ChangeState, StackManager, SyncResult};

/// Open the surrounding repository and load its stack manager
pub fn open_manager() -> Result<StackManager> {
    let git_repo = crate::git::get_current_repository()?;

    if !crate::config::is_repo_initialized(&git_repo) {
        return Err(UnstackedError::config(
            "Repository is not initialized. Run 'us init' first.",
        ));
    }

    let settings = crate::config::load_settings(&git_repo)?;
    StackManager::new(git_repo, settings)
}

/// Print the per-change outcomes of a sync pass
pub fn print_sync_result(result: &SyncResult) {
    for outcome in &result.outcomes {
        let full_id = outcome.change_id.to_string();
        let id = &full_id[..8];
        match &outcome.state {
            ChangeState::Rewritten { new_hash } => {
                Output::success(format!(
                    "{id} {} rewritten as {}",
                    outcome.title,
                    &new_hash[..8]
                ));
            }
            ChangeState::Unchanged => {
                Output::bullet(format!("{id} {} unchanged", outcome.title));
            }
            ChangeState::Conflicted { paths } => {
                Output::error(format!("{id} {} conflicted:", outcome.title));
                for path in paths {
                    Output::sub_item(path);
                }
            }
            ChangeState::Skipped => {
                Output::bullet(format!("{id} {} skipped", outcome.title));
            }
        }
    }

    if result.success {
        Output::success(format!("Sync complete: {}", result.summary));
    } else {
        Output::warning(format!("Sync halted: {}", result.summary));
        Output::tip(
            "Check out the rewritten parent of the conflicted change, reproduce the \
             change's content on top of it, then run 'us sync --continue'.",
        );
    }
}
