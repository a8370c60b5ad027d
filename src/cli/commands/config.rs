use crate::cli::output::Output;
use crate::cli::ConfigAction;
use crate::errors::Result;

pub fn run(action: ConfigAction) -> Result<()> {
    let git_repo = crate::git::get_current_repository()?;
    let mut settings = crate::config::load_settings(&git_repo)?;

    match action {
        ConfigAction::Set { key, value } => {
            settings.set_value(&key, &value)?;
            crate::config::save_settings(&git_repo, &settings)?;
            Output::success(format!("{key} = {value}"));
        }
        ConfigAction::Get { key } => {
            println!("{}", settings.get_value(&key)?);
        }
        ConfigAction::List => {
            for (key, value) in settings.list_values() {
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}
