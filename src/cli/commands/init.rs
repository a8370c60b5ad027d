use crate::cli::output::Output;
use crate::errors::Result;

pub fn run(force: bool) -> Result<()> {
    let git_repo = crate::git::get_current_repository()?;
    let settings = crate::config::initialize_repo(&git_repo, force)?;

    Output::success(format!(
        "Initialized unstacked in {}",
        git_repo.path().display()
    ));
    Output::sub_item(format!("Remote: {}", settings.git.remote));
    Output::sub_item(format!("Upstream branch: {}", settings.git.upstream_branch));
    match &settings.signing.key_id {
        Some(key) => Output::sub_item(format!("Signing key: {key}")),
        None => Output::sub_item("Signing key: gpg default"),
    }
    Output::tip("Create a stack with 'us stack new <name>'");
    Ok(())
}
