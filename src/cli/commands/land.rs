use crate::cli::output::Output;
use crate::errors::Result;
use crate::remote::Reconciler;

pub fn run(push: bool) -> Result<()> {
    let mut manager = super::open_manager()?;

    let name = manager.active_stack_name()?;
    let upstream = manager.get_stack(&name)?.upstream.clone();
    let landed = manager.land()?;

    Output::success(format!(
        "Landed '{}' onto {} as {}",
        landed.title,
        upstream,
        landed.short_hash()
    ));

    if push {
        let settings = manager.settings().clone();
        let reconciler = Reconciler::new(manager.git_repo(), settings.git.remote);
        reconciler.push_upstream(&upstream)?;
        Output::success(format!("Pushed {upstream}"));

        if settings.sync.delete_landed_on_push {
            reconciler.delete_remote_branch(&landed.branch)?;
            Output::sub_item(format!("Deleted remote branch {}", landed.branch));
        }
    } else {
        Output::tip(format!("Push the result with 'git push' or 'us land --push' next time; branch '{}' was deleted locally.", landed.branch));
    }
    Ok(())
}
