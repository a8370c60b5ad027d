use crate::cli::output::Output;
use crate::errors::Result;
use crate::remote::{Reconciler, RefRelationship};
use console::style;

pub fn run(remote: bool) -> Result<()> {
    let manager = super::open_manager()?;

    let name = match manager.active_stack_name() {
        Ok(name) => name,
        Err(_) => {
            Output::info("No active stack. Create one with 'us stack new <name>'.");
            return Ok(());
        }
    };

    let stack = manager.load_validated(&name)?;
    Output::section(format!("Stack: {name}"));
    Output::sub_item(format!("Upstream: {}", stack.upstream));
    Output::sub_item(format!("Base: {}", &stack.base_hash[..8]));
    if manager.sync_in_progress(&name) {
        Output::warning("A sync pass is in progress; run 'us sync' to resume");
    }

    if stack.is_empty() {
        Output::info("No changes. Create one with 'us new -m <title>'.");
        return Ok(());
    }

    let records = if remote {
        let reconciler =
            Reconciler::new(manager.git_repo(), manager.settings().git.remote.clone());
        reconciler.fetch()?;
        Some(reconciler.classify(&stack)?)
    } else {
        None
    };

    println!();
    for (i, change) in stack.changes.iter().enumerate() {
        let full_id = change.id.to_string();
        let id = &full_id[..8];
        let line = format!(
            "{i} {} {} {}",
            style(id).dim(),
            style(change.short_hash()).yellow(),
            change.title
        );

        match records
            .as_ref()
            .and_then(|r| r.iter().find(|r| r.change_id == change.id))
        {
            Some(record) => {
                let state = match record.relationship {
                    RefRelationship::UpToDate => style("up-to-date").green(),
                    RefRelationship::Ahead => style("ahead").cyan(),
                    RefRelationship::Behind => style("behind").red(),
                    RefRelationship::Diverged => style("diverged").red(),
                    RefRelationship::RemoteMissing => style("not pushed").dim(),
                };
                println!("{line} [{state}]");
            }
            None => println!("{line}"),
        }
    }
    Ok(())
}
