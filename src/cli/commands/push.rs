use crate::cli::output::Output;
use crate::errors::{Result, UnstackedError};
use crate::remote::Reconciler;
use dialoguer::Confirm;

pub fn run(force_diverged: bool) -> Result<()> {
    let mut manager = super::open_manager()?;

    let name = manager.active_stack_name()?;
    let stack = manager.load_validated(&name)?;
    if stack.is_empty() {
        Output::info("Stack is empty; nothing to push.");
        return Ok(());
    }

    let reconciler = Reconciler::new(manager.git_repo(), manager.settings().git.remote.clone());
    reconciler.fetch()?;
    let records = reconciler.classify(&stack)?;

    let needing_confirmation: Vec<_> =
        records.iter().filter(|r| r.needs_confirmation()).collect();

    let overwrite = if needing_confirmation.is_empty() {
        false
    } else if force_diverged {
        true
    } else {
        Output::warning("These branches hold history this tool did not write:");
        for record in &needing_confirmation {
            Output::bullet(format!(
                "{} ({:?}, remote at {})",
                record.branch,
                record.relationship,
                record
                    .remote_hash
                    .as_deref()
                    .map(|h| &h[..8])
                    .unwrap_or("?")
            ));
        }
        Confirm::new()
            .with_prompt("Overwrite them with the local history?")
            .default(false)
            .interact()
            .map_err(|e| UnstackedError::config(format!("Prompt failed: {e}")))?
    };

    let pushed = reconciler.push(&records, overwrite)?;

    let published: Vec<(String, String)> = records
        .iter()
        .filter(|r| pushed.contains(&r.branch))
        .map(|r| (r.branch.clone(), r.local_hash.clone()))
        .collect();
    manager.record_push(&name, &published)?;

    if pushed.is_empty() {
        Output::info("Everything up to date.");
    } else {
        for branch in &pushed {
            Output::success(format!("Pushed {branch}"));
        }
    }

    let skipped = records
        .iter()
        .filter(|r| r.needs_confirmation() && !overwrite)
        .count();
    if skipped > 0 {
        Output::warning(format!(
            "{skipped} diverged branch(es) left untouched (rerun with --force-diverged to overwrite)"
        ));
    }
    Ok(())
}
